//! Waiting for an asynchronously dispatched turn to finish.
//!
//! A session can be *promoted* mid-flight: the executor starts under a
//! provisional identifier and later announces its durable one. The waiter
//! keeps a set of tracked identifiers for the logical run and matches every
//! event by set membership, so events under either name are routed here.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::types::{methods, BusEvent};
use crate::{AgentError, Result};

/// Hard upper bound for one agent turn.
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(15 * 60);

// ─── TrackedSession ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedSession {
    ids: BTreeSet<String>,
}

impl TrackedSession {
    pub fn new(initial: impl Into<String>) -> Self {
        let mut ids = BTreeSet::new();
        ids.insert(initial.into());
        Self { ids }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Track an additional identifier for the same run. Returns true if it was new.
    pub fn track(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    /// Start tracking `to` if `from` is already tracked. Returns true on a new promotion.
    pub fn promote(&mut self, from: &str, to: &str) -> bool {
        if from == to || !self.ids.contains(from) {
            return false;
        }
        self.ids.insert(to.to_string())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

// ─── Progress / outcome ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum TurnProgress {
    Promoted { from: String, to: String },
    Delta(String),
    ToolStarted(String),
    ToolCompleted(String),
    Heartbeat,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub text: String,
    pub session_ids: Vec<String>,
}

// ─── wait_for_turn ────────────────────────────────────────────────────────

/// Wait on `rx` until the tracked session completes, errors, or `timeout` elapses.
///
/// `rx` must be subscribed *before* the prompt is dispatched so no event is
/// missed. The receiver is dropped (unsubscribed) on every exit path.
pub async fn wait_for_turn<F>(
    rx: broadcast::Receiver<BusEvent>,
    workspace_id: &str,
    session_id: &str,
    timeout: Duration,
    on_progress: F,
) -> Result<TurnOutcome>
where
    F: FnMut(TurnProgress),
{
    wait_for_tracked(rx, workspace_id, TrackedSession::new(session_id), timeout, on_progress).await
}

/// Like [`wait_for_turn`], seeded with every identifier already known for the run.
pub async fn wait_for_tracked<F>(
    rx: broadcast::Receiver<BusEvent>,
    workspace_id: &str,
    mut tracked: TrackedSession,
    timeout: Duration,
    mut on_progress: F,
) -> Result<TurnOutcome>
where
    F: FnMut(TurnProgress),
{
    let mut stream = BroadcastStream::new(rx);
    let mut buffer = String::new();

    let wait = async {
        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(ev) => ev,
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    warn!(skipped = n, "turn waiter lagged behind the event bus");
                    continue;
                }
            };
            if event.workspace_id != workspace_id {
                continue;
            }

            let method = event.method();
            if method == methods::THREAD_STARTED || method == methods::SESSION_STARTED {
                if let (Some(prev), Some(next)) = (event.previous_session_id(), event.session_id()) {
                    if tracked.promote(&prev, &next) {
                        debug!(from = %prev, to = %next, "session promoted");
                        on_progress(TurnProgress::Promoted { from: prev, to: next });
                    }
                }
                continue;
            }

            let Some(id) = event.session_id() else {
                continue;
            };
            if !tracked.contains(&id) {
                continue;
            }

            match method {
                methods::MESSAGE_DELTA => {
                    if let Some(delta) = event.text_param(&["delta", "text"]) {
                        buffer.push_str(&delta);
                        on_progress(TurnProgress::Delta(delta));
                    }
                }
                methods::TOOL_STARTED => {
                    on_progress(TurnProgress::ToolStarted(tool_name(&event)));
                }
                methods::TOOL_COMPLETED => {
                    on_progress(TurnProgress::ToolCompleted(tool_name(&event)));
                }
                methods::HEARTBEAT => on_progress(TurnProgress::Heartbeat),
                methods::ERROR => return Err(AgentError::Turn(error_message(&event))),
                methods::TURN_COMPLETED => {
                    let text = event
                        .text_param(&["text", "result", "output"])
                        .filter(|t| !t.trim().is_empty())
                        .unwrap_or_else(|| buffer.clone());
                    return Ok(TurnOutcome {
                        text,
                        session_ids: tracked.ids().map(str::to_owned).collect(),
                    });
                }
                _ => {}
            }
        }
        Err(AgentError::BusClosed)
    };

    match tokio::time::timeout(timeout, wait).await {
        Ok(result) => result,
        Err(_) => Err(AgentError::Timeout(timeout)),
    }
}

fn tool_name(event: &BusEvent) -> String {
    event
        .text_param(&["tool", "name", "title"])
        .or_else(|| {
            event
                .message
                .params
                .get("item")
                .and_then(|i| i.get("name").or_else(|| i.get("type")))
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .unwrap_or_else(|| "tool".to_string())
}

fn error_message(event: &BusEvent) -> String {
    let params = &event.message.params;
    params
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| params.get("error").and_then(Value::as_str))
        .or_else(|| {
            params
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
        })
        .unwrap_or("executor reported an error")
        .to_string()
}
