use crate::output::{print_json, print_table};
use anyhow::Context;
use clap::Subcommand;
use speclife_core::LifecycleSession;

#[derive(Subcommand)]
pub enum TaskSubcommand {
    /// List the checklist items of a change
    List { change: String },
    /// Check one item by its index
    Check { change: String, index: usize },
    /// Uncheck one item by its index
    Uncheck { change: String, index: usize },
}

pub async fn run(session: &LifecycleSession, subcmd: TaskSubcommand, json: bool) -> anyhow::Result<()> {
    match subcmd {
        TaskSubcommand::List { change } => list(session, &change, json).await,
        TaskSubcommand::Check { change, index } => toggle(session, &change, index, true, json).await,
        TaskSubcommand::Uncheck { change, index } => {
            toggle(session, &change, index, false, json).await
        }
    }
}

async fn list(session: &LifecycleSession, change: &str, json: bool) -> anyhow::Result<()> {
    let loaded = session
        .load_change_artifacts(change)
        .await
        .with_context(|| format!("failed to load change '{change}'"))?
        .context("artifact load was superseded")?;
    let checklist = loaded
        .checklist
        .with_context(|| format!("change '{change}' has no tasks.md"))?;

    if json {
        return print_json(&checklist);
    }
    if checklist.is_empty() {
        println!("tasks.md has no checklist items.");
        return Ok(());
    }

    let rows = checklist
        .items
        .iter()
        .map(|item| {
            vec![
                item.index.to_string(),
                item.line_number.to_string(),
                if item.checked { "[x]" } else { "[ ]" }.to_string(),
                item.priority.map(|p| p.to_string()).unwrap_or_default(),
                item.text.clone(),
            ]
        })
        .collect();
    print_table(&["#", "LINE", "DONE", "PRI", "TASK"], rows);
    println!();
    println!("{}", checklist.progress.summary());
    Ok(())
}

async fn toggle(
    session: &LifecycleSession,
    change: &str,
    index: usize,
    checked: bool,
    json: bool,
) -> anyhow::Result<()> {
    let progress = session
        .set_task_checked(change, index, checked)
        .await
        .with_context(|| format!("failed to update task {index} of '{change}'"))?;

    if json {
        print_json(&serde_json::json!({
            "change": change,
            "index": index,
            "checked": checked,
            "progress": progress,
        }))?;
    } else {
        let verb = if checked { "Checked" } else { "Unchecked" };
        println!("{verb} task {index} ({})", progress.summary());
    }
    Ok(())
}
