use async_trait::async_trait;
use serde_json::Value;

use crate::types::{DispatchRequest, Executor, SyncReply};
use crate::Result;

/// Boundary to whatever actually runs agent turns.
///
/// Executors that can hold a session return an acknowledgement from
/// [`open_session`](AgentDispatcher::open_session); the caller then sends the
/// prompt with [`send_async`](AgentDispatcher::send_async) and watches the
/// [`EventBus`](crate::EventBus) for completion. Executors without sessions
/// return `None` and are driven through [`send_sync`](AgentDispatcher::send_sync).
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    /// Open a session for `executor`. `Ok(None)` means sessions are unsupported.
    async fn open_session(&self, workspace_id: &str, executor: Executor) -> Result<Option<Value>>;

    /// Send a prompt into an open session. Returns the dispatch acknowledgement.
    async fn send_async(
        &self,
        workspace_id: &str,
        session_id: &str,
        request: DispatchRequest,
    ) -> Result<Value>;

    /// Full round-trip: returns once the executor has produced its final text.
    async fn send_sync(&self, workspace_id: &str, request: DispatchRequest) -> Result<SyncReply>;
}
