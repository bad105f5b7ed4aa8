use crate::checklist::TaskChecklistItem;
use std::fmt::Write as _;

/// Build the execution prompt sent to the agent.
///
/// The prompt carries the generated instructions, the full checklist with
/// both coordinates of every item, and an explicit allow-list of the task ids
/// the agent may report back.
pub fn build_prompt(change_id: &str, instructions: &str, items: &[TaskChecklistItem]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "You are implementing the spec change `{change_id}`.");
    out.push('\n');
    out.push_str("## Instructions\n\n");
    out.push_str(instructions.trim());
    out.push_str("\n\n## Task checklist\n\n");
    for item in items {
        let _ = writeln!(
            out,
            "- index {} (line {}) [{}] {}",
            item.index,
            item.line_number,
            if item.checked { "x" } else { " " },
            item.text
        );
    }

    let indices: Vec<String> = items
        .iter()
        .filter(|i| !i.checked)
        .map(|i| i.index.to_string())
        .collect();
    let refs: Vec<&str> = items
        .iter()
        .filter(|i| !i.checked)
        .filter_map(TaskChecklistItem::dotted_ref)
        .collect();

    out.push_str("\n## Reporting\n\n");
    let _ = writeln!(
        out,
        "Valid task indices: [{}]",
        indices.join(", ")
    );
    if !refs.is_empty() {
        let _ = writeln!(out, "Valid task refs: [{}]", refs.join(", "));
    }
    out.push_str(
        "\nWhen you are done, reply with a single JSON object and nothing else:\n\
         {\"summary\": string, \"changedFiles\": [string], \"tests\": [string], \
         \"checks\": [string], \"noChanges\": bool, \"completedTaskIndices\": [number | string]}\n\
         Only list tasks you fully completed, using values from the lists above. \
         Do not edit the checklist file yourself.\n",
    );
    out
}
