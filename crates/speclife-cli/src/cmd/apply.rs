use crate::output::{print_json, print_list};
use agent_bridge::Executor;
use anyhow::Context;
use speclife_core::apply::ApplyExecutionState;
use speclife_core::types::ApplyStatus;
use speclife_core::LifecycleSession;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub async fn run(
    session: &LifecycleSession,
    change: &str,
    executor: Option<Executor>,
    json: bool,
) -> anyhow::Result<()> {
    // Stream log lines while the run is in progress.
    let printed = Arc::new(AtomicUsize::new(0));
    let follower = (!json).then(|| {
        let mut rx = session.subscribe_apply();
        let printed = printed.clone();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                print_new_logs(&state, &printed);
            }
        })
    });

    let result = session.run_apply(change, executor).await;
    if let Some(follower) = follower {
        follower.abort();
    }
    let state = result.with_context(|| format!("apply failed to start for '{change}'"))?;

    if json {
        print_json(&state)?;
    } else {
        print_new_logs(&state, &printed);
        println!();
        println!("Status:   {}", state.status);
        println!("Phase:    {}", state.phase);
        if let Some(summary) = &state.summary {
            println!("Summary:  {summary}");
        }
        if state.no_changes {
            println!("The agent reported no changes.");
        }
        print_list("Changed files", &state.changed_files);
        print_list("Tests", &state.tests);
        print_list("Checks", &state.checks);
        if !state.completed_task_indices.is_empty() {
            let indices: Vec<String> = state
                .completed_task_indices
                .iter()
                .map(usize::to_string)
                .collect();
            println!("Completed tasks: {}", indices.join(", "));
        }
    }

    if state.status != ApplyStatus::Success {
        anyhow::bail!(
            "apply failed in {}: {}",
            state.phase,
            state.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

fn print_new_logs(state: &ApplyExecutionState, printed: &AtomicUsize) {
    let from = printed.load(Ordering::SeqCst);
    // A shorter log means the state was replaced by another scope's.
    if state.logs.len() < from {
        return;
    }
    for line in &state.logs[from..] {
        eprintln!("  {line}");
    }
    printed.store(state.logs.len(), Ordering::SeqCst);
}
