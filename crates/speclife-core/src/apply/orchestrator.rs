use super::prompt::build_prompt;
use super::result::{parse_agent_report, reconcile};
use super::writeback::write_back;
use super::{ApplyExecutionState, ApplyHost};
use crate::checklist::parse_checklist;
use crate::error::{LifecycleError, Result};
use crate::ports::{CommandOptions, CommandRunner};
use crate::types::ApplyPhase;
use agent_bridge::{
    extract_session_id, wait_for_tracked, AgentDispatcher, AgentError, DispatchRequest, EventBus,
    Executor, TrackedSession, TurnProgress,
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Everything decided before the run starts.
#[derive(Debug, Clone)]
pub struct ApplyRequest {
    pub workspace_id: String,
    pub change_id: String,
    pub executor: Executor,
    /// Gate blockers for `apply`, computed by the caller.
    pub gate_blockers: Vec<String>,
    pub instructions_argv: Vec<String>,
    pub command_options: CommandOptions,
    pub agent_timeout: Duration,
    pub heartbeat: Duration,
}

#[derive(Clone, Copy)]
pub struct ApplyDeps<'a> {
    pub runner: &'a dyn CommandRunner,
    pub dispatcher: &'a dyn AgentDispatcher,
    pub bus: &'a EventBus,
    pub host: &'a dyn ApplyHost,
}

/// Drive one apply run to completion. Never returns an error: failures end
/// up in the returned state with `status: failed`.
pub async fn run_apply(req: ApplyRequest, deps: ApplyDeps<'_>) -> ApplyExecutionState {
    let mut state = ApplyExecutionState::started(&req.change_id, req.executor);
    state.log(format!(
        "Applying {} with {}",
        req.change_id, req.executor
    ));
    deps.host.publish(&state);

    match drive(&req, deps, &mut state).await {
        Ok(()) => state.succeed(),
        Err(e) => state.fail(&e),
    }
    deps.host.publish(&state);
    info!(
        change = %req.change_id,
        status = %state.status,
        phase = %state.phase,
        "apply run ended"
    );
    state
}

async fn drive(req: &ApplyRequest, deps: ApplyDeps<'_>, state: &mut ApplyExecutionState) -> Result<()> {
    // preflight
    if !req.gate_blockers.is_empty() {
        return Err(LifecycleError::Preflight(format!(
            "Apply is blocked: {}",
            req.gate_blockers.join("; ")
        )));
    }
    let tasks = deps
        .host
        .read_tasks(&req.change_id)
        .await
        .map_err(|e| LifecycleError::Preflight(format!("Unable to read tasks.md: {e}")))?;
    let checklist = parse_checklist(&tasks);
    state.log(format!("Checklist: {}", checklist.progress.summary()));

    // instructions
    state.enter(ApplyPhase::Instructions);
    deps.host.publish(state);
    let output = deps
        .runner
        .run(&req.workspace_id, &req.instructions_argv, req.command_options.clone())
        .await
        .map_err(|e| LifecycleError::Instructions(e.to_string()))?;
    if !output.success {
        return Err(LifecycleError::Instructions(output.message()));
    }
    state.instructions_output = output.stdout;

    // execution
    state.enter(ApplyPhase::Execution);
    deps.host.publish(state);
    let prompt = build_prompt(&req.change_id, &state.instructions_output, &checklist.items);
    let text = execute(req, deps, prompt, state).await?;
    state.execution_output = text.clone();

    let report = parse_agent_report(&text);
    if !report.parsed {
        state.log("Agent reply was not JSON; keeping it as the summary without task write-back");
    }
    // The agent may have edited tasks.md itself; only toggle what is unchecked now.
    let tasks = deps
        .host
        .read_tasks(&req.change_id)
        .await
        .map_err(|e| LifecycleError::TaskWriteback(format!("unable to re-read tasks.md: {e}")))?;
    let checklist = parse_checklist(&tasks);
    let reconciled = reconcile(&checklist.items, &report);
    for line in &reconciled.skipped {
        state.log(line.clone());
    }
    state.summary = report.summary;
    state.changed_files = report.changed_files;
    state.tests = report.tests;
    state.checks = report.checks;
    state.no_changes = report.no_changes;
    state.completed_task_indices = reconciled.indices.iter().copied().collect();

    let pending: Vec<usize> = reconciled
        .indices
        .iter()
        .copied()
        .filter(|&i| checklist.items.get(i).is_some_and(|item| !item.checked))
        .collect();

    // task-writeback
    if pending.is_empty() {
        state.log("No unchecked tasks to write back");
    } else {
        state.enter(ApplyPhase::TaskWriteback);
        deps.host.publish(state);
        write_back(deps.host, &req.change_id, &pending, state).await?;
    }

    // finalize
    state.enter(ApplyPhase::Finalize);
    deps.host.publish(state);
    deps.host.refresh().await?;
    Ok(())
}

/// Session strategy when the executor acknowledges with a session id,
/// synchronous round-trip otherwise. Both are bounded by `agent_timeout`.
async fn execute(
    req: &ApplyRequest,
    deps: ApplyDeps<'_>,
    prompt: String,
    state: &mut ApplyExecutionState,
) -> Result<String> {
    let ws = req.workspace_id.as_str();
    let ack = deps.dispatcher.open_session(ws, req.executor).await?;
    let request = DispatchRequest::new(prompt, req.executor);

    if let Some(session_id) = ack.as_ref().and_then(extract_session_id) {
        state.log(format!("Session {session_id} opened"));
        deps.host.publish(state);

        // Subscribe before dispatch so no event is missed.
        let rx = deps.bus.subscribe();
        let sent = deps.dispatcher.send_async(ws, &session_id, request).await?;
        let mut tracked = TrackedSession::new(session_id.as_str());
        if let Some(dispatched_id) = extract_session_id(&sent) {
            if tracked.track(dispatched_id.as_str()) {
                state.log(format!("Session {session_id} dispatched as {dispatched_id}"));
            }
        }
        let host = deps.host;
        let outcome = wait_for_tracked(rx, ws, tracked, req.agent_timeout, |progress| {
            let line = match progress {
                TurnProgress::Promoted { from, to } => format!("Session {from} continued as {to}"),
                TurnProgress::ToolStarted(name) => format!("Tool started: {name}"),
                TurnProgress::ToolCompleted(name) => format!("Tool finished: {name}"),
                TurnProgress::Heartbeat => "Agent is still working".to_string(),
                TurnProgress::Delta(_) => return,
            };
            state.log(line);
            host.publish(state);
        })
        .await?;
        debug!(sessions = ?outcome.session_ids, "turn completed");
        return Ok(outcome.text);
    }

    state.log("Executor has no session support; waiting for a synchronous reply");
    deps.host.publish(state);

    let started = Instant::now();
    let reply = deps.dispatcher.send_sync(ws, request);
    tokio::pin!(reply);
    let deadline = tokio::time::sleep(req.agent_timeout);
    tokio::pin!(deadline);
    let mut heartbeat = tokio::time::interval_at(started + req.heartbeat, req.heartbeat);

    loop {
        tokio::select! {
            result = &mut reply => return Ok(result?.text),
            _ = &mut deadline => return Err(AgentError::Timeout(req.agent_timeout).into()),
            _ = heartbeat.tick() => {
                state.log(format!(
                    "Still waiting for {} ({}s elapsed)",
                    req.executor,
                    started.elapsed().as_secs()
                ));
                deps.host.publish(state);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checklist::set_item_checked;
    use crate::fakes::{failed_output, ok_output, ScriptedDispatcher, ScriptedRunner, SyncBehavior};
    use crate::types::ApplyStatus;
    use agent_bridge::{methods, BusEvent};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashSet;
    use std::sync::Mutex;

    const INSTRUCTIONS: &str = "openspec instructions apply --change c";

    struct FakeHost {
        tasks: Mutex<String>,
        reads: Mutex<usize>,
        /// Content the agent leaves in tasks.md, visible from the second read on.
        agent_edit: Mutex<Option<String>>,
        fail_on: HashSet<usize>,
        calls: Mutex<Vec<(usize, bool)>>,
        refreshes: Mutex<usize>,
        published: Mutex<Vec<ApplyExecutionState>>,
    }

    impl FakeHost {
        fn new(tasks: &str) -> Self {
            Self {
                tasks: Mutex::new(tasks.to_string()),
                reads: Mutex::new(0),
                agent_edit: Mutex::new(None),
                fail_on: HashSet::new(),
                calls: Mutex::new(Vec::new()),
                refreshes: Mutex::new(0),
                published: Mutex::new(Vec::new()),
            }
        }

        fn failing(mut self, index: usize) -> Self {
            self.fail_on.insert(index);
            self
        }

        fn edited_during_turn(self, tasks: &str) -> Self {
            *self.agent_edit.lock().unwrap() = Some(tasks.to_string());
            self
        }

        fn tasks(&self) -> String {
            self.tasks.lock().unwrap().clone()
        }

        fn calls(&self) -> Vec<(usize, bool)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ApplyHost for FakeHost {
        fn publish(&self, state: &ApplyExecutionState) {
            self.published.lock().unwrap().push(state.clone());
        }

        async fn read_tasks(&self, _change_id: &str) -> Result<String> {
            let mut reads = self.reads.lock().unwrap();
            *reads += 1;
            if *reads > 1 {
                if let Some(edited) = self.agent_edit.lock().unwrap().take() {
                    *self.tasks.lock().unwrap() = edited;
                }
            }
            Ok(self.tasks())
        }

        async fn set_task_checked(&self, _change_id: &str, index: usize, checked: bool) -> Result<()> {
            self.calls.lock().unwrap().push((index, checked));
            if checked && self.fail_on.contains(&index) {
                return Err(LifecycleError::Io(std::io::Error::other("disk full")));
            }
            let mut tasks = self.tasks.lock().unwrap();
            *tasks = set_item_checked(&tasks, index, checked)?;
            Ok(())
        }

        async fn refresh(&self) -> Result<()> {
            *self.refreshes.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn request(blockers: Vec<String>) -> ApplyRequest {
        ApplyRequest {
            workspace_id: "ws".into(),
            change_id: "c".into(),
            executor: Executor::Codex,
            gate_blockers: blockers,
            instructions_argv: INSTRUCTIONS.split(' ').map(String::from).collect(),
            command_options: CommandOptions {
                custom_root_override: None,
                timeout: Duration::from_secs(180),
            },
            agent_timeout: Duration::from_secs(15 * 60),
            heartbeat: Duration::from_secs(30),
        }
    }

    async fn run(
        req: ApplyRequest,
        runner: &ScriptedRunner,
        dispatcher: &ScriptedDispatcher,
        host: &FakeHost,
    ) -> ApplyExecutionState {
        let bus = dispatcher.bus.clone();
        run_apply(
            req,
            ApplyDeps {
                runner,
                dispatcher,
                bus: &bus,
                host,
            },
        )
        .await
    }

    fn sync_reply(text: &str) -> ScriptedDispatcher {
        ScriptedDispatcher::sync(EventBus::default(), SyncBehavior::Reply(text.to_string()))
    }

    #[tokio::test]
    async fn line_number_reference_checks_first_item() {
        let tasks = format!("{}- [ ] 1.1 First\n- [ ] 1.2 Second\n", "\n".repeat(72));
        let host = FakeHost::new(&tasks);
        let runner = ScriptedRunner::default().on(INSTRUCTIONS, ok_output("do it"));
        let dispatcher = sync_reply(r#"{"summary": "ok", "completedTaskIndices": [73]}"#);

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;

        assert_eq!(state.status, ApplyStatus::Success, "{:?}", state.error);
        assert_eq!(state.phase, ApplyPhase::Finalize);
        assert_eq!(host.calls(), vec![(0, true)]);
        assert_eq!(state.completed_task_indices, vec![0]);
        assert!(host.tasks().contains("- [x] 1.1 First"));
        assert_eq!(*host.refreshes.lock().unwrap(), 1);
        assert_eq!(state.summary.as_deref(), Some("ok"));
        assert!(dispatcher.last_prompt().unwrap().contains("do it"));
    }

    #[tokio::test]
    async fn unknown_reference_is_skipped_and_logged() {
        let host = FakeHost::new("- [ ] a\n- [ ] b\n");
        let runner = ScriptedRunner::default();
        let dispatcher = sync_reply(r#"{"completedTaskIndices": [999]}"#);

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;

        assert_eq!(state.status, ApplyStatus::Success);
        assert!(host.calls().is_empty());
        assert_eq!(state.logs.iter().filter(|l| l.contains("999")).count(), 1);
        assert!(!state.logs.iter().any(|l| l == "Phase: task-writeback"));
    }

    #[tokio::test]
    async fn writeback_failure_rolls_back() {
        let host = FakeHost::new("- [ ] a\n- [ ] b\n").failing(1);
        let runner = ScriptedRunner::default();
        let dispatcher = sync_reply(r#"{"completedTaskIndices": [0, 1]}"#);

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;

        assert_eq!(state.status, ApplyStatus::Failed);
        assert_eq!(state.phase, ApplyPhase::TaskWriteback);
        assert!(state.error.as_deref().unwrap().starts_with("Task write-back failed"));
        let calls = host.calls();
        assert_eq!(calls, vec![(0, true), (1, true), (0, false)]);
        assert_eq!(calls.iter().rev().find(|(i, _)| *i == 0), Some(&(0, false)));
        assert_eq!(host.tasks(), "- [ ] a\n- [ ] b\n");
        assert_eq!(*host.refreshes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn already_checked_items_are_not_rewritten() {
        let host = FakeHost::new("- [x] a\n- [ ] b\n");
        let runner = ScriptedRunner::default();
        let dispatcher = sync_reply(r#"{"completed": [0, 1]}"#);

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;
        assert_eq!(state.status, ApplyStatus::Success);
        assert_eq!(host.calls(), vec![(1, true)]);
        assert_eq!(state.completed_task_indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn gate_blockers_fail_in_preflight() {
        let host = FakeHost::new("- [ ] a\n");
        let runner = ScriptedRunner::default();
        let dispatcher = sync_reply("{}");

        let state = run(
            request(vec!["Missing tasks.md".into()]),
            &runner,
            &dispatcher,
            &host,
        )
        .await;
        assert_eq!(state.status, ApplyStatus::Failed);
        assert_eq!(state.phase, ApplyPhase::Preflight);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn instruction_failure_is_verbatim() {
        let host = FakeHost::new("- [ ] a\n");
        let runner =
            ScriptedRunner::default().on(INSTRUCTIONS, failed_output("Change 'c' not found\n"));
        let dispatcher = sync_reply("{}");

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;
        assert_eq!(state.status, ApplyStatus::Failed);
        assert_eq!(state.phase, ApplyPhase::Instructions);
        assert_eq!(state.error.as_deref(), Some("Change 'c' not found"));
        assert!(dispatcher.last_prompt().is_none());
    }

    #[tokio::test]
    async fn non_json_reply_is_summary_only() {
        let host = FakeHost::new("- [ ] a\n");
        let runner = ScriptedRunner::default();
        let dispatcher = sync_reply("I did everything.");

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;
        assert_eq!(state.status, ApplyStatus::Success);
        assert_eq!(state.summary.as_deref(), Some("I did everything."));
        assert!(host.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sync_strategy_times_out_with_heartbeats() {
        let host = FakeHost::new("- [ ] a\n");
        let runner = ScriptedRunner::default();
        let dispatcher = ScriptedDispatcher::sync(EventBus::default(), SyncBehavior::Hang);

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;
        assert_eq!(state.status, ApplyStatus::Failed);
        assert_eq!(state.phase, ApplyPhase::Execution);
        assert_eq!(
            state.error.as_deref(),
            Some("Agent execution timed out after 15 minutes")
        );
        let beats = state.logs.iter().filter(|l| l.starts_with("Still waiting")).count();
        assert!(beats >= 29, "expected heartbeats, got {beats}");
    }

    #[tokio::test]
    async fn session_strategy_follows_promotion() {
        let bus = EventBus::default();
        let events = vec![
            BusEvent::new(
                "ws",
                methods::THREAD_STARTED,
                json!({"previousThreadId": "t-1", "threadId": "t-2"}),
            ),
            BusEvent::new(
                "ws",
                methods::TURN_COMPLETED,
                json!({"threadId": "t-2", "text": "{\"completedTaskIndices\": [0]}"}),
            ),
        ];
        let dispatcher = ScriptedDispatcher::session(bus, json!({"threadId": "t-1"}), events);
        let host = FakeHost::new("- [ ] a\n");
        let runner = ScriptedRunner::default();

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;
        assert_eq!(state.status, ApplyStatus::Success, "{:?}", state.error);
        assert_eq!(host.calls(), vec![(0, true)]);
        assert!(state.logs.iter().any(|l| l == "Session t-1 continued as t-2"));
        assert_eq!(dispatcher.bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dispatch_ack_session_id_is_tracked() {
        let bus = EventBus::default();
        let events = vec![BusEvent::new(
            "ws",
            methods::TURN_COMPLETED,
            json!({"threadId": "t-9", "text": "{\"completedTaskIndices\": [0]}"}),
        )];
        let dispatcher = ScriptedDispatcher::session(bus, json!({"threadId": "t-1"}), events)
            .with_send_ack(json!({"result": {"threadId": "t-9"}}));
        let host = FakeHost::new("- [ ] a\n");
        let runner = ScriptedRunner::default();

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;
        assert_eq!(state.status, ApplyStatus::Success, "{:?}", state.error);
        assert_eq!(host.calls(), vec![(0, true)]);
        assert!(state.logs.iter().any(|l| l == "Session t-1 dispatched as t-9"));
    }

    #[tokio::test]
    async fn rollback_leaves_items_the_agent_checked_itself() {
        let host = FakeHost::new("- [ ] a\n- [ ] b\n")
            .failing(1)
            .edited_during_turn("- [x] a\n- [ ] b\n");
        let runner = ScriptedRunner::default();
        let dispatcher = sync_reply(r#"{"completedTaskIndices": [0, 1]}"#);

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;
        assert_eq!(state.status, ApplyStatus::Failed);
        assert_eq!(state.phase, ApplyPhase::TaskWriteback);
        assert_eq!(host.calls(), vec![(1, true)]);
        assert_eq!(host.tasks(), "- [x] a\n- [ ] b\n");
        assert_eq!(state.completed_task_indices, vec![0, 1]);
    }

    #[tokio::test]
    async fn session_error_is_wrapped() {
        let bus = EventBus::default();
        let events = vec![BusEvent::new(
            "ws",
            methods::ERROR,
            json!({"threadId": "t-1", "message": "rate limited"}),
        )];
        let dispatcher = ScriptedDispatcher::session(bus, json!({"threadId": "t-1"}), events);
        let host = FakeHost::new("- [ ] a\n");
        let runner = ScriptedRunner::default();

        let state = run(request(vec![]), &runner, &dispatcher, &host).await;
        assert_eq!(state.status, ApplyStatus::Failed);
        assert_eq!(state.phase, ApplyPhase::Execution);
        assert!(state
            .error
            .as_deref()
            .unwrap()
            .starts_with("Agent execution failed"));
    }
}
