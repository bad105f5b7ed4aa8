use crate::output::{print_json, print_list, print_table};
use anyhow::Context;
use speclife_core::snapshot::{ChangeSummary, WorkspaceSnapshot};
use speclife_core::{LifecycleSession, RefreshMode};

pub async fn run(session: &LifecycleSession, json: bool) -> anyhow::Result<()> {
    let snapshot = latest_snapshot(session).await?;

    if json {
        return print_json(&snapshot);
    }

    println!(
        "Provider:     {} ({} support)",
        snapshot.provider, snapshot.support_level
    );
    if let Some(root) = &snapshot.spec_root {
        println!("Spec root:    {root}");
    }
    println!(
        "Environment:  {} ({})",
        snapshot.environment.status, snapshot.environment.mode
    );
    print_list("Blockers", &snapshot.blockers);
    print_list("Environment blockers", &snapshot.environment.blockers);

    if snapshot.changes.is_empty() {
        println!();
        println!("No changes found.");
        return Ok(());
    }

    println!();
    let rows = snapshot.changes.iter().map(change_row).collect();
    print_table(&["CHANGE", "STATUS", "UPDATED", "TASKS", "BLOCKERS"], rows);
    Ok(())
}

pub async fn latest_snapshot(session: &LifecycleSession) -> anyhow::Result<WorkspaceSnapshot> {
    let refreshed = session
        .refresh(RefreshMode::Explicit)
        .await
        .context("failed to scan workspace")?;
    refreshed
        .or_else(|| session.snapshot())
        .context("workspace snapshot unavailable")
}

fn change_row(change: &ChangeSummary) -> Vec<String> {
    let tasks = change
        .task_progress
        .map(|p| format!("{}/{}", p.checked, p.total))
        .unwrap_or_else(|| "-".to_string());
    let updated = change
        .updated_at
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    vec![
        change.id.clone(),
        change.status.to_string(),
        updated,
        tasks,
        change.blockers.len().to_string(),
    ]
}

/// Probe the environment without scanning the workspace.
pub fn doctor(session: &LifecycleSession, json: bool) -> anyhow::Result<()> {
    let health = session.probe_environment();

    if json {
        return print_json(&health);
    }

    println!("Mode:    {}", health.mode);
    println!("Status:  {}", health.status);
    println!();
    let rows = health
        .checks
        .iter()
        .map(|c| {
            vec![
                c.label.clone(),
                if c.required { "required" } else { "optional" }.to_string(),
                if c.ok { "ok" } else { "missing" }.to_string(),
                c.detail.clone(),
            ]
        })
        .collect();
    print_table(&["TOOL", "NEED", "STATE", "DETAIL"], rows);
    print_list("Blockers", &health.blockers);
    print_list("Hints", &health.hints);
    Ok(())
}
