//! The multi-phase apply run.
//!
//! ```text
//! idle → preflight → instructions → execution → task-writeback → finalize
//!                                                      ↘ (nothing to write) ↗
//! ```
//!
//! Each run produces a fresh [`ApplyExecutionState`]; the previous one for the
//! same scope is replaced, never merged.

pub mod orchestrator;
pub mod prompt;
pub mod result;
pub mod writeback;

use crate::error::{LifecycleError, Result};
use crate::types::{ApplyPhase, ApplyStatus};
use agent_bridge::Executor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub use orchestrator::{run_apply, ApplyDeps, ApplyRequest};
pub use result::{parse_agent_report, reconcile, AgentReport, Reconciled};

// ---------------------------------------------------------------------------
// ApplyExecutionState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyExecutionState {
    pub status: ApplyStatus,
    pub phase: ApplyPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor: Option<Executor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub instructions_output: String,
    pub execution_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub changed_files: Vec<String>,
    pub tests: Vec<String>,
    pub checks: Vec<String>,
    pub completed_task_indices: Vec<usize>,
    pub no_changes: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub logs: Vec<String>,
}

impl ApplyExecutionState {
    /// A fresh running state at `preflight`.
    pub fn started(change_id: &str, executor: Executor) -> Self {
        Self {
            status: ApplyStatus::Running,
            phase: ApplyPhase::Preflight,
            change_id: Some(change_id.to_string()),
            executor: Some(executor),
            started_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ApplyStatus::Running
    }

    pub fn enter(&mut self, phase: ApplyPhase) {
        self.phase = phase;
        self.log(format!("Phase: {phase}"));
    }

    pub fn log(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!(phase = %self.phase, "{line}");
        self.logs.push(line);
    }

    pub fn succeed(&mut self) {
        self.status = ApplyStatus::Success;
        self.finished_at = Some(Utc::now());
        self.log("Apply finished");
    }

    /// Terminal failure; the phase where it happened is kept.
    pub fn fail(&mut self, err: &LifecycleError) {
        let message = err.to_string();
        warn!(phase = %self.phase, error = %message, "apply failed");
        self.status = ApplyStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.logs.push(format!("Failed: {message}"));
        self.error = Some(message);
    }
}

// ---------------------------------------------------------------------------
// ApplyHost
// ---------------------------------------------------------------------------

/// What an apply run needs from the session that launched it. Every call is
/// bound to the scope the run started in.
#[async_trait]
pub trait ApplyHost: Send + Sync {
    /// Called after every state change.
    fn publish(&self, state: &ApplyExecutionState);

    async fn read_tasks(&self, change_id: &str) -> Result<String>;

    /// Toggle one checklist item and persist the document.
    async fn set_task_checked(&self, change_id: &str, index: usize, checked: bool) -> Result<()>;

    /// Forced re-scan of the workspace.
    async fn refresh(&self) -> Result<()>;
}
