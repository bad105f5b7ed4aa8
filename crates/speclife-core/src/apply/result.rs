//! Parsing the agent's final answer and reconciling reported task ids
//! against the checklist.
//!
//! Agents are asked for a JSON object but name its fields inconsistently, so
//! every field has an ordered list of candidate keys and the first present
//! one wins.

use crate::checklist::TaskChecklistItem;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::OnceLock;

const SUMMARY_KEYS: &[&str] = &["summary", "result", "message", "description"];
const CHANGED_FILES_KEYS: &[&str] = &[
    "changedFiles",
    "changed_files",
    "filesChanged",
    "files_changed",
    "files",
];
const TESTS_KEYS: &[&str] = &["tests", "testsRun", "tests_run", "testResults", "test_results"];
const CHECKS_KEYS: &[&str] = &["checks", "validations", "verification"];
const NO_CHANGES_KEYS: &[&str] = &["noChanges", "no_changes", "nothingChanged", "nothing_changed"];
const COMPLETED_KEYS: &[&str] = &[
    "completedTaskIndices",
    "completed_task_indices",
    "completedTasks",
    "completed_tasks",
    "tasksCompleted",
    "tasks_completed",
    "completed",
];

/// What the agent reported, after shape normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentReport {
    /// False when no JSON object could be found; `summary` then holds the raw text.
    pub parsed: bool,
    pub summary: Option<String>,
    pub changed_files: Vec<String>,
    pub tests: Vec<String>,
    pub checks: Vec<String>,
    pub no_changes: bool,
    pub completed_indices: Vec<i64>,
    pub completed_refs: Vec<String>,
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

static FENCE_RE: OnceLock<Regex> = OnceLock::new();

fn as_object(text: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Whole text, then a fenced block, then the outermost braces.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    if let Some(map) = as_object(text) {
        return Some(map);
    }
    let fence = FENCE_RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n(.*?)```").unwrap());
    for caps in fence.captures_iter(text) {
        if let Some(map) = as_object(&caps[1]) {
            return Some(map);
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    as_object(&text[start..=end])
}

// ---------------------------------------------------------------------------
// Field extraction
// ---------------------------------------------------------------------------

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

fn object_label(obj: &Map<String, Value>) -> Option<String> {
    let name = first(obj, &["path", "file", "name", "command", "title", "id"])?
        .as_str()?
        .to_string();
    match first(obj, &["status", "result", "outcome"]).and_then(Value::as_str) {
        Some(status) => Some(format!("{name}: {status}")),
        None => Some(name),
    }
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Object(obj) => object_label(obj),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes"),
        _ => false,
    }
}

enum TaskRef {
    Index(i64),
    Dotted(String),
}

fn task_ref_from_str(s: &str) -> Option<TaskRef> {
    let s = s.trim().trim_end_matches('.');
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(TaskRef::Index(n));
    }
    let dotted = s.split('.').all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()));
    dotted.then(|| TaskRef::Dotted(s.to_string()))
}

fn task_ref(item: &Value) -> Option<TaskRef> {
    match item {
        Value::Number(n) => n.as_i64().map(TaskRef::Index),
        Value::String(s) => task_ref_from_str(s),
        Value::Object(obj) => {
            if let Some(n) = first(obj, &["index", "taskIndex", "task_index"]).and_then(Value::as_i64) {
                return Some(TaskRef::Index(n));
            }
            first(obj, &["ref", "id", "task"])
                .and_then(Value::as_str)
                .and_then(task_ref_from_str)
        }
        _ => None,
    }
}

/// Normalize the agent's final text into an [`AgentReport`].
pub fn parse_agent_report(text: &str) -> AgentReport {
    let Some(obj) = extract_json_object(text) else {
        let trimmed = text.trim();
        return AgentReport {
            parsed: false,
            summary: (!trimmed.is_empty()).then(|| trimmed.to_string()),
            ..Default::default()
        };
    };

    let mut report = AgentReport {
        parsed: true,
        summary: first(&obj, SUMMARY_KEYS)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        changed_files: string_list(first(&obj, CHANGED_FILES_KEYS)),
        tests: string_list(first(&obj, TESTS_KEYS)),
        checks: string_list(first(&obj, CHECKS_KEYS)),
        no_changes: truthy(first(&obj, NO_CHANGES_KEYS)),
        ..Default::default()
    };

    let refs: Vec<TaskRef> = match first(&obj, COMPLETED_KEYS) {
        Some(Value::Array(items)) => items.iter().filter_map(task_ref).collect(),
        Some(single) => task_ref(single).into_iter().collect(),
        None => Vec::new(),
    };
    for r in refs {
        match r {
            TaskRef::Index(n) => report.completed_indices.push(n),
            TaskRef::Dotted(s) => report.completed_refs.push(s),
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciled {
    pub indices: BTreeSet<usize>,
    /// One log line per reference that matched nothing.
    pub skipped: Vec<String>,
}

/// Resolve one integer: exact index, then 1-based line number, then
/// off-by-one (`n - 1`).
fn resolve_integer(items: &[TaskChecklistItem], n: i64) -> Option<usize> {
    let as_index = usize::try_from(n).ok()?;
    if as_index < items.len() {
        return Some(as_index);
    }
    if let Some(item) = items.iter().find(|i| i.line_number == as_index) {
        return Some(item.index);
    }
    as_index
        .checked_sub(1)
        .filter(|&i| i < items.len())
}

pub fn reconcile(items: &[TaskChecklistItem], report: &AgentReport) -> Reconciled {
    let mut out = Reconciled::default();
    for &n in &report.completed_indices {
        match resolve_integer(items, n) {
            Some(index) => {
                out.indices.insert(index);
            }
            None => out
                .skipped
                .push(format!("Skipped task reference {n}: no matching checklist item")),
        }
    }
    for r in &report.completed_refs {
        let matched: Vec<usize> = items
            .iter()
            .filter(|item| item.dotted_ref() == Some(r.as_str()))
            .map(|item| item.index)
            .collect();
        if matched.is_empty() {
            out.skipped
                .push(format!("Skipped task reference \"{r}\": no checklist item starts with it"));
        }
        out.indices.extend(matched);
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
