use crate::output::{print_json, print_list, print_table};
use anyhow::Context;
use speclife_core::ports::ArtifactRead;
use speclife_core::LifecycleSession;

pub async fn show(session: &LifecycleSession, change: &str, json: bool) -> anyhow::Result<()> {
    let loaded = session
        .load_change_artifacts(change)
        .await
        .with_context(|| format!("failed to load change '{change}'"))?
        .context("artifact load was superseded")?;

    if json {
        return print_json(&loaded);
    }

    println!("Change:        {}", loaded.change_id);
    if loaded.archived {
        println!("Archived:      yes");
    }
    println!("proposal.md    {}", describe(&loaded.proposal));
    println!("design.md      {}", describe(&loaded.design));
    println!("tasks.md       {}", describe(&loaded.tasks));
    println!("verification   {}", describe(&loaded.verification));
    for (path, read) in &loaded.specs {
        println!("{path}  {}", describe(read));
    }

    if let Some(checklist) = &loaded.checklist {
        println!();
        println!("Tasks: {}", checklist.progress.summary());
        for item in &checklist.items {
            let mark = if item.checked { "x" } else { " " };
            let priority = item
                .priority
                .map(|p| format!(" [{p}]"))
                .unwrap_or_default();
            println!("  {:>3}  [{mark}] {}{priority}", item.index, item.text);
        }
    }
    Ok(())
}

fn describe(read: &ArtifactRead) -> String {
    match (read.exists, read.truncated) {
        (false, _) => "missing".to_string(),
        (true, false) => format!("{} bytes", read.content.len()),
        (true, true) => format!("{} bytes (truncated)", read.content.len()),
    }
}

pub async fn actions(session: &LifecycleSession, change: &str, json: bool) -> anyhow::Result<()> {
    let actions = session
        .actions_for(change)
        .await
        .with_context(|| format!("failed to compute actions for '{change}'"))?;

    if json {
        return print_json(&actions);
    }

    let rows = actions
        .iter()
        .map(|a| {
            vec![
                a.label.clone(),
                if a.available { "available" } else { "blocked" }.to_string(),
                a.blockers.join("; "),
            ]
        })
        .collect();
    print_table(&["ACTION", "STATE", "BLOCKERS"], rows);
    Ok(())
}

pub async fn preflight(session: &LifecycleSession, change: &str, json: bool) -> anyhow::Result<()> {
    let preflight = session
        .archive_preflight(change)
        .await
        .with_context(|| format!("failed to run archive preflight for '{change}'"))?;

    if json {
        print_json(&preflight)?;
    } else if preflight.is_clear() {
        println!("Archive preflight clear for {change}.");
    } else {
        print_list("Blockers", &preflight.blockers);
        print_list("Hints", &preflight.hints);
    }

    if !preflight.is_clear() {
        anyhow::bail!("archive preflight found {} blocker(s)", preflight.blockers.len());
    }
    Ok(())
}
