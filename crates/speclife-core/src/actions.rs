//! Action gate: which of `continue | apply | verify | archive` a change
//! can run right now, and why not.

use crate::checklist::TaskProgress;
use crate::environment::EnvironmentHealth;
use crate::ports::VerifyOutcome;
use crate::snapshot::{
    ChangeSummary, EMPTY_CHECKLIST, MISSING_DESIGN, MISSING_SPECS_DELTA, MISSING_TASKS,
};
use crate::types::{ActionKey, Provider, SupportLevel};
use serde::{Deserialize, Serialize};

pub const RUN_CONTINUE_FIRST: &str = "Run continue first to generate a specs delta";
pub const RUN_VERIFY_FIRST: &str = "Run verify before archiving";
pub const LAST_VERIFY_FAILED: &str = "Last verify failed; fix issues and re-run verify";
pub const CHANGE_ARCHIVED: &str = "Change is archived";
pub const TASK_PROGRESS_UNAVAILABLE: &str = "Task progress unavailable";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub key: ActionKey,
    pub label: String,
    pub available: bool,
    pub blockers: Vec<String>,
}

/// Everything the gate looks at. `task_progress` is passed separately from the
/// change so callers can supply a fresher reading than the snapshot's.
#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    pub change: &'a ChangeSummary,
    pub support_level: SupportLevel,
    pub provider: Provider,
    pub environment: &'a EnvironmentHealth,
    pub last_verify: Option<&'a VerifyOutcome>,
    pub task_progress: Option<&'a TaskProgress>,
}

fn ignored_by(key: ActionKey) -> &'static [&'static str] {
    match key {
        ActionKey::Continue => &[MISSING_DESIGN, MISSING_TASKS, MISSING_SPECS_DELTA, EMPTY_CHECKLIST],
        ActionKey::Apply => &[MISSING_DESIGN, MISSING_SPECS_DELTA],
        ActionKey::Verify => &[MISSING_DESIGN],
        ActionKey::Archive => &[],
    }
}

fn shared_blockers(input: &GateInput<'_>) -> Vec<String> {
    let mut out = Vec::new();
    if input.environment.is_blocked() {
        if input.environment.blockers.is_empty() {
            out.push("Environment is blocked".to_string());
        } else {
            out.extend(input.environment.blockers.iter().cloned());
        }
    }
    if input.support_level != SupportLevel::Full {
        out.push(format!(
            "Provider {} is not fully supported ({} support)",
            input.provider, input.support_level
        ));
    }
    if input.change.archived {
        out.push(CHANGE_ARCHIVED.to_string());
    }
    out
}

fn push_unique(list: &mut Vec<String>, blocker: String) {
    if !list.contains(&blocker) {
        list.push(blocker);
    }
}

fn archive_extra(input: &GateInput<'_>) -> Vec<String> {
    let mut out: Vec<String> = input.change.archive_blockers.clone();
    match input.last_verify {
        None => out.push(RUN_VERIFY_FIRST.to_string()),
        Some(v) if !v.success => out.push(LAST_VERIFY_FAILED.to_string()),
        Some(_) => {}
    }
    match input.task_progress {
        None => out.push(TASK_PROGRESS_UNAVAILABLE.to_string()),
        Some(p) if !p.all_required_checked() => out.push(format!(
            "Complete all required tasks before archiving ({}/{} done)",
            p.required_checked, p.required_total
        )),
        Some(_) => {}
    }
    out
}

/// Compute all four actions for one change. Pure.
pub fn compute_actions(input: &GateInput<'_>) -> Vec<Action> {
    let shared = shared_blockers(input);
    let mut candidates: Vec<String> = Vec::new();
    for b in input
        .change
        .blockers
        .iter()
        .cloned()
        .chain(input.change.artifacts.missing_blockers())
    {
        push_unique(&mut candidates, b);
    }

    ActionKey::all()
        .iter()
        .map(|&key| {
            let ignore = ignored_by(key);
            let mut blockers = shared.clone();
            for b in candidates.iter().filter(|b| !ignore.contains(&b.as_str())) {
                push_unique(&mut blockers, b.clone());
            }
            match key {
                ActionKey::Apply if input.change.artifacts.spec_paths.is_empty() => {
                    push_unique(&mut blockers, RUN_CONTINUE_FIRST.to_string());
                }
                ActionKey::Archive => {
                    for b in archive_extra(input) {
                        push_unique(&mut blockers, b);
                    }
                }
                _ => {}
            }
            Action {
                key,
                label: key.label().to_string(),
                available: blockers.is_empty() && input.provider == Provider::Openspec,
                blockers,
            }
        })
        .collect()
}

pub fn find(actions: &[Action], key: ActionKey) -> Option<&Action> {
    actions.iter().find(|a| a.key == key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
