use super::{LifecycleSession, RefreshMode};
use crate::apply::{ApplyExecutionState, ApplyHost};
use crate::error::{LifecycleError, Result};
use crate::paths;
use crate::types::Provider;
use async_trait::async_trait;

/// An [`ApplyHost`] pinned to the scope and run generation an apply started
/// in, so a scope switch mid-run cannot redirect its updates.
pub(super) struct ScopedApplyHost {
    pub(super) session: LifecycleSession,
    pub(super) provider: Provider,
    pub(super) run: u64,
}

#[async_trait]
impl ApplyHost for ScopedApplyHost {
    fn publish(&self, state: &ApplyExecutionState) {
        self.session.publish_apply(self.provider, self.run, state);
    }

    async fn read_tasks(&self, change_id: &str) -> Result<String> {
        let custom_root = self.session.settings().custom_root;
        let path = paths::change_file(change_id, false, paths::TASKS_FILE);
        let read = self
            .session
            .shared
            .ports
            .artifacts
            .read(self.session.workspace_id(), &path, custom_root.as_deref())
            .await?;
        if !read.exists {
            return Err(LifecycleError::MissingArtifact {
                change: change_id.to_string(),
                artifact: paths::TASKS_FILE.to_string(),
            });
        }
        Ok(read.content)
    }

    async fn set_task_checked(&self, change_id: &str, index: usize, checked: bool) -> Result<()> {
        self.session
            .set_task_checked_in(self.provider, change_id, index, checked)
            .await
            .map(|_| ())
    }

    async fn refresh(&self) -> Result<()> {
        self.session.refresh(RefreshMode::Forced).await.map(|_| ())
    }
}
