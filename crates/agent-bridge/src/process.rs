//! Live dispatcher that drives executor CLIs as subprocesses.
//!
//! `claude` supports sessions: the turn is spawned with
//! `--output-format stream-json` and its JSONL output is translated into bus
//! events. The session starts under a provisional `pending-<uuid>` id and is
//! promoted to the real id once the `system/init` line arrives. `codex` and
//! `gemini` have no session support and are driven as synchronous round-trips.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::bus::EventBus;
use crate::dispatch::AgentDispatcher;
use crate::types::{methods, AccessMode, BusEvent, DispatchRequest, Executor, SyncReply};
use crate::{AgentError, Result};

const PROVISIONAL_PREFIX: &str = "pending-";

pub struct CliDispatcher {
    roots: HashMap<String, PathBuf>,
    bus: EventBus,
}

impl CliDispatcher {
    pub fn new(bus: EventBus) -> Self {
        Self {
            roots: HashMap::new(),
            bus,
        }
    }

    /// Register the working directory used for `workspace_id`.
    pub fn with_workspace(mut self, workspace_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(workspace_id.into(), root.into());
        self
    }

    fn cwd(&self, workspace_id: &str) -> Result<&Path> {
        self.roots
            .get(workspace_id)
            .map(PathBuf::as_path)
            .ok_or_else(|| AgentError::Dispatch(format!("unknown workspace: {workspace_id}")))
    }
}

fn ensure_installed(executor: Executor) -> Result<()> {
    which::which(executor.binary())
        .map(|_| ())
        .map_err(|_| AgentError::ExecutorNotFound(executor.binary().to_string()))
}

/// Build the argv for one executor turn. The prompt is always fed on stdin.
pub(crate) fn build_args(executor: Executor, access: AccessMode, streaming: bool) -> Vec<String> {
    let mut args: Vec<&str> = Vec::new();
    match executor {
        Executor::Claude => {
            args.push("-p");
            if streaming {
                args.extend(["--output-format", "stream-json", "--verbose"]);
            } else {
                args.extend(["--output-format", "text"]);
            }
            match access {
                AccessMode::ReadOnly => args.extend(["--permission-mode", "plan"]),
                AccessMode::Current => args.extend(["--permission-mode", "acceptEdits"]),
                AccessMode::FullAccess => args.push("--dangerously-skip-permissions"),
            }
        }
        Executor::Codex => {
            args.extend(["exec", "--skip-git-repo-check"]);
            match access {
                AccessMode::ReadOnly => args.extend(["--sandbox", "read-only"]),
                AccessMode::Current => args.push("--full-auto"),
                AccessMode::FullAccess => args.push("--dangerously-bypass-approvals-and-sandbox"),
            }
            args.push("-");
        }
        Executor::Gemini => match access {
            AccessMode::ReadOnly => {}
            AccessMode::Current => args.extend(["--approval-mode", "auto_edit"]),
            AccessMode::FullAccess => args.push("--yolo"),
        },
    }
    args.into_iter().map(str::to_owned).collect()
}

async fn spawn_with_prompt(
    executor: Executor,
    args: &[String],
    cwd: &Path,
    prompt: &str,
) -> Result<tokio::process::Child> {
    let mut child = Command::new(executor.binary())
        .args(args)
        .current_dir(cwd)
        .env_remove("CLAUDECODE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(prompt.as_bytes()).await?;
        stdin.flush().await?;
    }
    Ok(child)
}

// ─── stream-json translation ──────────────────────────────────────────────

/// Translate one `claude` stream-json line into bus events.
///
/// `current` holds the id events are currently published under; it is
/// replaced when the init line reveals the durable session id.
pub(crate) fn translate_line(workspace_id: &str, current: &mut String, line: &str) -> Vec<BusEvent> {
    let Ok(value) = serde_json::from_str::<Value>(line) else {
        return Vec::new();
    };
    let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
    let mut out = Vec::new();

    match kind {
        "system" => {
            let is_init = value.get("subtype").and_then(Value::as_str) == Some("init");
            if let Some(real) = value.get("session_id").and_then(Value::as_str) {
                if is_init && real != current.as_str() {
                    out.push(BusEvent::new(
                        workspace_id,
                        methods::THREAD_STARTED,
                        json!({ "threadId": real, "previousThreadId": current.clone() }),
                    ));
                    *current = real.to_string();
                }
            }
        }
        "assistant" => {
            let blocks = value
                .pointer("/message/content")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for block in blocks {
                match block.get("type").and_then(Value::as_str) {
                    Some("text") => {
                        if let Some(text) = block.get("text").and_then(Value::as_str) {
                            out.push(BusEvent::new(
                                workspace_id,
                                methods::MESSAGE_DELTA,
                                json!({ "threadId": current.clone(), "delta": text }),
                            ));
                        }
                    }
                    Some("tool_use") => {
                        let name = block.get("name").and_then(Value::as_str).unwrap_or("tool");
                        out.push(BusEvent::new(
                            workspace_id,
                            methods::TOOL_STARTED,
                            json!({ "threadId": current.clone(), "tool": name }),
                        ));
                    }
                    _ => {}
                }
            }
        }
        "user" => {
            let has_result = value
                .pointer("/message/content")
                .and_then(Value::as_array)
                .is_some_and(|c| {
                    c.iter()
                        .any(|b| b.get("type").and_then(Value::as_str) == Some("tool_result"))
                });
            if has_result {
                out.push(BusEvent::new(
                    workspace_id,
                    methods::TOOL_COMPLETED,
                    json!({ "threadId": current.clone() }),
                ));
            }
        }
        "result" => {
            let is_error = value.get("is_error").and_then(Value::as_bool).unwrap_or(false);
            let text = value.get("result").and_then(Value::as_str).unwrap_or_default();
            if is_error {
                let subtype = value.get("subtype").and_then(Value::as_str).unwrap_or("error");
                let message = if text.is_empty() { subtype } else { text };
                out.push(BusEvent::new(
                    workspace_id,
                    methods::ERROR,
                    json!({ "threadId": current.clone(), "message": message }),
                ));
            } else {
                out.push(BusEvent::new(
                    workspace_id,
                    methods::TURN_COMPLETED,
                    json!({ "threadId": current.clone(), "text": text }),
                ));
            }
        }
        _ => {}
    }
    out
}

// ─── AgentDispatcher impl ─────────────────────────────────────────────────

#[async_trait]
impl AgentDispatcher for CliDispatcher {
    async fn open_session(&self, workspace_id: &str, executor: Executor) -> Result<Option<Value>> {
        self.cwd(workspace_id)?;
        if executor != Executor::Claude {
            return Ok(None);
        }
        ensure_installed(executor)?;
        let provisional = format!("{PROVISIONAL_PREFIX}{}", uuid::Uuid::new_v4());
        Ok(Some(json!({ "threadId": provisional })))
    }

    async fn send_async(
        &self,
        workspace_id: &str,
        session_id: &str,
        request: DispatchRequest,
    ) -> Result<Value> {
        let cwd = self.cwd(workspace_id)?.to_path_buf();
        let args = build_args(request.engine, request.access_mode, true);
        let mut child = spawn_with_prompt(request.engine, &args, &cwd, &request.text).await?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Process("stdout not captured".into()))?;
        let stderr_task = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut collected = String::new();
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    if !collected.is_empty() {
                        collected.push('\n');
                    }
                    collected.push_str(&line);
                }
                collected
            })
        });

        let bus = self.bus.clone();
        let workspace = workspace_id.to_string();
        let mut current = session_id.to_string();
        info!(workspace = %workspace, session = %current, "dispatching streaming turn");

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            let mut finished = false;
            while let Ok(Some(line)) = lines.next_line().await {
                for event in translate_line(&workspace, &mut current, &line) {
                    finished |= matches!(event.method(), methods::TURN_COMPLETED | methods::ERROR);
                    bus.publish(event);
                }
                if finished {
                    break;
                }
            }
            if finished {
                let _ = child.kill().await;
                return;
            }

            let err_text = match stderr_task {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            let code = child.wait().await.ok().and_then(|s| s.code()).unwrap_or(-1);
            warn!(session = %current, code, "executor exited without a result");
            let message = if err_text.trim().is_empty() {
                format!("executor exited with code {code} before completing the turn")
            } else {
                err_text
            };
            bus.publish(BusEvent::new(
                &workspace,
                methods::ERROR,
                json!({ "threadId": current, "message": message }),
            ));
        });

        Ok(json!({ "threadId": session_id, "accepted": true }))
    }

    async fn send_sync(&self, workspace_id: &str, request: DispatchRequest) -> Result<SyncReply> {
        let cwd = self.cwd(workspace_id)?.to_path_buf();
        ensure_installed(request.engine)?;
        let args = build_args(request.engine, request.access_mode, false);
        debug!(executor = %request.engine, ?args, "dispatching synchronous turn");
        let child = spawn_with_prompt(request.engine, &args, &cwd, &request.text).await?;
        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let hint = if stderr.is_empty() {
                format!("exit code {}", output.status.code().unwrap_or(-1))
            } else {
                stderr.chars().take(500).collect()
            };
            return Err(AgentError::Process(format!("{} failed: {hint}", request.engine)));
        }
        Ok(SyncReply {
            text: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_streaming_args() {
        let args = build_args(Executor::Claude, AccessMode::Current, true);
        assert_eq!(
            args,
            vec!["-p", "--output-format", "stream-json", "--verbose", "--permission-mode", "acceptEdits"]
        );
    }

    #[test]
    fn codex_reads_prompt_from_stdin() {
        let args = build_args(Executor::Codex, AccessMode::ReadOnly, false);
        assert_eq!(args.last().map(String::as_str), Some("-"));
        assert!(args.contains(&"read-only".to_string()));
    }

    #[test]
    fn init_line_promotes_provisional_id() {
        let mut current = "pending-1".to_string();
        let events = translate_line(
            "ws",
            &mut current,
            r#"{"type":"system","subtype":"init","session_id":"real-42"}"#,
        );
        assert_eq!(current, "real-42");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].method(), methods::THREAD_STARTED);
        assert_eq!(events[0].previous_session_id().as_deref(), Some("pending-1"));
        assert_eq!(events[0].session_id().as_deref(), Some("real-42"));
    }

    #[test]
    fn assistant_blocks_become_delta_and_tool_events() {
        let mut current = "s".to_string();
        let line = r#"{"type":"assistant","session_id":"s","message":{"content":[
            {"type":"text","text":"working"},
            {"type":"tool_use","name":"Edit","id":"t1","input":{}}]}}"#
            .replace('\n', "");
        let events = translate_line("ws", &mut current, &line);
        let kinds: Vec<&str> = events.iter().map(BusEvent::method).collect();
        assert_eq!(kinds, vec![methods::MESSAGE_DELTA, methods::TOOL_STARTED]);
    }

    #[test]
    fn result_line_maps_to_completion_or_error() {
        let mut current = "s".to_string();
        let ok = translate_line("ws", &mut current, r#"{"type":"result","is_error":false,"result":"{}"}"#);
        assert_eq!(ok[0].method(), methods::TURN_COMPLETED);
        let err = translate_line(
            "ws",
            &mut current,
            r#"{"type":"result","subtype":"error_max_turns","is_error":true}"#,
        );
        assert_eq!(err[0].method(), methods::ERROR);
        assert_eq!(err[0].text_param(&["message"]).as_deref(), Some("error_max_turns"));
    }

    #[test]
    fn garbage_lines_are_ignored() {
        let mut current = "s".to_string();
        assert!(translate_line("ws", &mut current, "not json").is_empty());
    }
}
