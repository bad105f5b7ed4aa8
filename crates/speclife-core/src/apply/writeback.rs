use super::{ApplyExecutionState, ApplyHost};
use crate::error::{LifecycleError, Result};
use tracing::warn;

/// Check each index in order, persisting one at a time.
///
/// On the first failure every index already checked by this call is
/// unchecked again in reverse order. Rollback errors are logged and
/// swallowed; the original failure is returned as `TaskWriteback`.
pub async fn write_back(
    host: &dyn ApplyHost,
    change_id: &str,
    indices: &[usize],
    state: &mut ApplyExecutionState,
) -> Result<()> {
    let mut applied: Vec<usize> = Vec::with_capacity(indices.len());
    for &index in indices {
        match host.set_task_checked(change_id, index, true).await {
            Ok(()) => {
                applied.push(index);
                state.log(format!("Checked task {index}"));
                host.publish(state);
            }
            Err(e) => {
                state.log(format!(
                    "Checking task {index} failed: {e}; rolling back {} task(s)",
                    applied.len()
                ));
                for &done in applied.iter().rev() {
                    match host.set_task_checked(change_id, done, false).await {
                        Ok(()) => state.log(format!("Reverted task {done}")),
                        Err(re) => {
                            warn!(change = %change_id, index = done, error = %re, "rollback failed");
                            state.log(format!("Reverting task {done} failed: {re}"));
                        }
                    }
                }
                return Err(LifecycleError::TaskWriteback(format!("task {index}: {e}")));
            }
        }
    }
    Ok(())
}
