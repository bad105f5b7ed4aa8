use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("executor '{0}' is not installed or not on PATH")]
    ExecutorNotFound(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    /// The executor reported an explicit error for the tracked turn.
    #[error("agent turn failed: {0}")]
    Turn(String),

    #[error("agent turn timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("event bus closed before the turn completed")]
    BusClosed,
}
