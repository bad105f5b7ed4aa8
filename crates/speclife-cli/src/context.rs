use agent_bridge::{CliDispatcher, EventBus};
use anyhow::Context;
use speclife_core::config::{EngineConfig, WarnLevel};
use speclife_core::local::{LocalArtifactStore, ProcessCommandRunner, WhichLocator, WorkspaceRoots};
use speclife_core::store::StateDb;
use speclife_core::{paths, LifecycleSession, SessionPorts};
use std::path::Path;
use std::sync::Arc;
use tracing::warn;

/// Wire the live adapters for `root` and open a session on it.
pub fn open_session(root: &Path, workspace_id: &str) -> anyhow::Result<LifecycleSession> {
    let config = EngineConfig::load(root).context("failed to load config")?;
    for w in config.validate() {
        if w.level == WarnLevel::Error {
            anyhow::bail!("invalid config: {} (run `speclife config validate`)", w.message);
        }
        warn!("config: {}", w.message);
    }

    let roots = WorkspaceRoots::new().with_workspace(workspace_id, root);
    let bus = EventBus::default();
    let store = StateDb::open(&paths::state_db_path(root))
        .with_context(|| format!("failed to open state db under {}", root.display()))?;

    let ports = SessionPorts {
        artifacts: Arc::new(LocalArtifactStore::new(roots.clone(), config.max_read_bytes)),
        commands: Arc::new(ProcessCommandRunner::new(roots)),
        agents: Arc::new(CliDispatcher::new(bus.clone()).with_workspace(workspace_id, root)),
        bus,
        tools: Arc::new(WhichLocator),
        store: Arc::new(store),
    };
    LifecycleSession::new(workspace_id, config, ports).context("failed to open lifecycle session")
}
