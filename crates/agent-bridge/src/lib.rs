//! `agent-bridge`: dispatching agent turns and tracking their completion.
//!
//! # Architecture
//!
//! ```text
//! AgentDispatcher      ← open_session / send_async / send_sync
//!     │                   (CliDispatcher spawns codex | claude | gemini)
//!     ▼
//! EventBus             ← {workspace_id, message: {method, params}}
//!     │                   thread/started, item/agentMessage/delta, turn/completed …
//!     ▼
//! wait_for_turn        ← tracked session-id set (grows on promotion),
//!                         hard timeout, unsubscribes on every exit
//! ```

pub mod bus;
pub mod dispatch;
pub mod error;
pub mod process;
pub mod types;
pub mod waiter;

#[cfg(test)]
mod tests;

pub use bus::EventBus;
pub use dispatch::AgentDispatcher;
pub use error::AgentError;
pub use process::CliDispatcher;
pub use types::{
    extract_session_id, methods, AccessMode, BusEvent, BusMessage, DispatchRequest, Executor,
    SyncReply,
};
pub use waiter::{wait_for_tracked, wait_for_turn, TrackedSession, TurnOutcome, TurnProgress, DEFAULT_TURN_TIMEOUT};

/// Convenience `Result` alias for this crate.
pub type Result<T> = std::result::Result<T, AgentError>;
