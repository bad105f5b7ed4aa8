use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

// ─── Executor ─────────────────────────────────────────────────────────────

/// The interchangeable agent executors an apply run can be dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Executor {
    #[default]
    Codex,
    Claude,
    Gemini,
}

impl Executor {
    pub fn all() -> &'static [Executor] {
        &[Executor::Codex, Executor::Claude, Executor::Gemini]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Executor::Codex => "codex",
            Executor::Claude => "claude",
            Executor::Gemini => "gemini",
        }
    }

    /// Binary name the live dispatcher spawns for this executor.
    pub fn binary(self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Executor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "codex" => Ok(Executor::Codex),
            "claude" => Ok(Executor::Claude),
            "gemini" => Ok(Executor::Gemini),
            other => Err(format!("unknown executor: {other}")),
        }
    }
}

// ─── AccessMode ───────────────────────────────────────────────────────────

/// How much the executor is allowed to touch the workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    ReadOnly,
    #[default]
    Current,
    FullAccess,
}

impl AccessMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "read-only",
            AccessMode::Current => "current",
            AccessMode::FullAccess => "full-access",
        }
    }
}

// ─── Dispatch payloads ────────────────────────────────────────────────────

/// A single prompt sent to an executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub text: String,
    pub engine: Executor,
    #[serde(rename = "accessMode")]
    pub access_mode: AccessMode,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

impl DispatchRequest {
    pub fn new(text: impl Into<String>, engine: Executor) -> Self {
        Self {
            text: text.into(),
            engine,
            access_mode: AccessMode::default(),
            images: Vec::new(),
        }
    }
}

/// The reply of a synchronous round-trip.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncReply {
    pub text: String,
}

// ─── Session id extraction ────────────────────────────────────────────────

/// Candidate locations of a session identifier, first match wins.
///
/// Acknowledgements have used each of these names over time.
const SESSION_ID_PATHS: &[&[&str]] = &[
    &["threadId"],
    &["thread_id"],
    &["sessionId"],
    &["session_id"],
    &["conversationId"],
    &["thread", "id"],
    &["result", "threadId"],
    &["result", "thread", "id"],
];

fn lookup<'a>(value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(value, |v, key| v.get(key))
}

/// Extract a session identifier from a dispatch acknowledgement or event params.
pub fn extract_session_id(value: &Value) -> Option<String> {
    SESSION_ID_PATHS.iter().find_map(|path| {
        lookup(value, path)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    })
}

// ─── Bus events ───────────────────────────────────────────────────────────

pub mod methods {
    pub const THREAD_STARTED: &str = "thread/started";
    pub const SESSION_STARTED: &str = "session/started";
    pub const MESSAGE_DELTA: &str = "item/agentMessage/delta";
    pub const TOOL_STARTED: &str = "item/started";
    pub const TOOL_COMPLETED: &str = "item/completed";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const ERROR: &str = "error";
    pub const TURN_COMPLETED: &str = "turn/completed";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusMessage {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// One event on the app-server bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusEvent {
    pub workspace_id: String,
    pub message: BusMessage,
}

impl BusEvent {
    pub fn new(workspace_id: impl Into<String>, method: &str, params: Value) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            message: BusMessage {
                method: method.to_string(),
                params,
            },
        }
    }

    pub fn method(&self) -> &str {
        &self.message.method
    }

    /// The session this event belongs to, if it names one.
    pub fn session_id(&self) -> Option<String> {
        extract_session_id(&self.message.params)
    }

    /// For promotion events, the identifier the session was known by before.
    pub fn previous_session_id(&self) -> Option<String> {
        ["previousThreadId", "previous_thread_id", "previousSessionId", "fromThreadId"]
            .iter()
            .find_map(|k| self.message.params.get(*k).and_then(Value::as_str))
            .map(str::to_owned)
    }

    pub fn text_param(&self, keys: &[&str]) -> Option<String> {
        keys.iter()
            .find_map(|k| self.message.params.get(*k).and_then(Value::as_str))
            .map(str::to_owned)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
