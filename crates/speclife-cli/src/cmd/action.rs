use crate::output::{print_json, print_list};
use anyhow::Context;
use speclife_core::timeline::{IssueLevel, TimelineEvent};
use speclife_core::types::ActionKey;
use speclife_core::LifecycleSession;

pub async fn run(session: &LifecycleSession, key: ActionKey, change: &str, json: bool) -> anyhow::Result<()> {
    let event = session
        .run_action(key, change)
        .await
        .with_context(|| format!("{key} failed for '{change}'"))?;
    report(&event, json)
}

pub async fn bootstrap(session: &LifecycleSession, json: bool) -> anyhow::Result<()> {
    let event = session.bootstrap().await.context("bootstrap failed")?;
    report(&event, json)
}

fn report(event: &TimelineEvent, json: bool) -> anyhow::Result<()> {
    if json {
        print_json(event)?;
    } else {
        if let Some(command) = &event.command {
            println!("$ {command}");
        }
        if !event.output.is_empty() {
            println!("{}", event.output);
        }
        let issues: Vec<String> = event
            .validation_issues
            .iter()
            .map(|i| {
                let level = match i.level {
                    IssueLevel::Error => "error",
                    IssueLevel::Warning => "warning",
                };
                format!("[{level}] {}", i.message)
            })
            .collect();
        print_list("Issues", &issues);
    }

    if !event.success {
        anyhow::bail!("{} did not succeed", event.action);
    }
    Ok(())
}
