use thiserror::Error;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("change not found: {0}")]
    ChangeNotFound(String),

    #[error("invalid value for {0}")]
    InvalidValue(String),

    #[error("invalid change id '{0}'")]
    InvalidChangeId(String),

    #[error("missing {artifact} for change '{change}'")]
    MissingArtifact { change: String, artifact: String },

    #[error("task index {index} out of range (checklist has {total} items)")]
    TaskIndexOutOfRange { index: usize, total: usize },

    #[error("custom spec root {root} is not accessible: {reason}")]
    ExternalRoot { root: String, reason: String },

    #[error("unknown workspace: {0}")]
    UnknownWorkspace(String),

    #[error("'{0}' is not installed or not on PATH")]
    ToolNotFound(String),

    #[error("command timed out after {secs}s: {command}")]
    CommandTimeout { command: String, secs: u64 },

    #[error("{0}")]
    Preflight(String),

    /// Instruction generation failed; the message is the command's own output.
    #[error("{0}")]
    Instructions(String),

    #[error("Agent execution failed: {0}")]
    AgentTurn(String),

    #[error("Agent execution timed out after {minutes} minutes")]
    AgentTimeout { minutes: u64 },

    #[error("Task write-back failed: {0}")]
    TaskWriteback(String),

    #[error("blocked by: {0}")]
    Blocked(String),

    #[error("workspace snapshot unavailable; refresh in progress")]
    SnapshotUnavailable,

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<agent_bridge::AgentError> for LifecycleError {
    fn from(e: agent_bridge::AgentError) -> Self {
        match e {
            agent_bridge::AgentError::Timeout(d) => LifecycleError::AgentTimeout {
                minutes: d.as_secs().div_ceil(60),
            },
            agent_bridge::AgentError::Turn(msg) => LifecycleError::AgentTurn(msg),
            other => LifecycleError::AgentTurn(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, LifecycleError>;
