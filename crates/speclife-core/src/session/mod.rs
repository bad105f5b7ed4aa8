//! The lifecycle session: one per workspace.
//!
//! Holds the latest [`WorkspaceSnapshot`] and one [`ScopeState`] per
//! `{workspace}:{provider}` key. Every imperative operation goes through here.
//! Shared state sits behind a `std::sync::Mutex` that is only ever locked in
//! synchronous sections.

mod host;


use crate::actions::{compute_actions, find, Action, GateInput};
use crate::apply::{self, ApplyDeps, ApplyExecutionState, ApplyRequest};
use crate::checklist::{parse_checklist, set_item_checked, TaskChecklist, TaskProgress};
use crate::config::EngineConfig;
use crate::environment::{probe_environment, spec_cli_argv, EnvironmentHealth};
use crate::error::{LifecycleError, Result};
use crate::paths;
use crate::ports::{
    scope_key, verify_key, ArtifactRead, ArtifactStore, CommandOptions, CommandRunner,
    LifecycleStore, ToolLocator, VerifyOutcome, WorkspaceSettings,
};
use crate::requirements::ArchivePreflight;
use crate::snapshot::{
    build_snapshot, change_artifacts, collect_archive_preflight, ChangeSummary, WorkspaceSnapshot,
};
use crate::timeline::{parse_validation_issues, Timeline, TimelineEvent};
use crate::types::{ActionKey, ApplyStatus, EnvironmentMode, Provider, TimelineKind};
use agent_bridge::{AgentDispatcher, EventBus, Executor};
use host::ScopedApplyHost;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The adapters a session talks to.
#[derive(Clone)]
pub struct SessionPorts {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub commands: Arc<dyn CommandRunner>,
    pub agents: Arc<dyn AgentDispatcher>,
    pub bus: EventBus,
    pub tools: Arc<dyn ToolLocator>,
    pub store: Arc<dyn LifecycleStore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Background refresh, skipped when another silent refresh ran within the
    /// debounce window.
    Silent,
    /// Internal refresh after a mutation.
    Forced,
    /// User-requested.
    Explicit,
}

/// Contents of one change's artifacts, loaded on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeArtifactContents {
    pub change_id: String,
    pub archived: bool,
    pub proposal: ArtifactRead,
    pub design: ArtifactRead,
    pub tasks: ArtifactRead,
    pub verification: ArtifactRead,
    pub specs: Vec<(String, ArtifactRead)>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checklist: Option<TaskChecklist>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ScopeState {
    selected_change_id: Option<String>,
    timeline: Timeline,
    apply: ApplyExecutionState,
    /// Generation of the newest apply run; publishes from older runs are dropped.
    apply_run: u64,
}

impl ScopeState {
    fn new(capacity: usize) -> Self {
        Self {
            selected_change_id: None,
            timeline: Timeline::new(capacity),
            apply: ApplyExecutionState::default(),
            apply_run: 0,
        }
    }
}

struct SessionState {
    settings: WorkspaceSettings,
    snapshot: Option<WorkspaceSnapshot>,
    active_provider: Provider,
    scopes: HashMap<String, ScopeState>,
    refresh_seq: u64,
    last_silent: Option<Instant>,
    artifact_seq: u64,
}

impl SessionState {
    fn scope_mut(&mut self, key: &str, capacity: usize) -> &mut ScopeState {
        self.scopes
            .entry(key.to_string())
            .or_insert_with(|| ScopeState::new(capacity))
    }
}

struct Shared {
    workspace_id: String,
    config: EngineConfig,
    ports: SessionPorts,
    state: Mutex<SessionState>,
    apply_tx: watch::Sender<ApplyExecutionState>,
}

// ---------------------------------------------------------------------------
// LifecycleSession
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct LifecycleSession {
    shared: Arc<Shared>,
}

impl LifecycleSession {
    /// Create a session, restoring persisted workspace settings.
    pub fn new(workspace_id: impl Into<String>, config: EngineConfig, ports: SessionPorts) -> Result<Self> {
        let workspace_id = workspace_id.into();
        let settings = ports.store.settings(&workspace_id)?.unwrap_or_default();
        let (apply_tx, _) = watch::channel(ApplyExecutionState::default());
        let mut scopes = HashMap::new();
        scopes.insert(
            scope_key(&workspace_id, Provider::Unknown),
            ScopeState::new(config.timeline_capacity),
        );
        debug!(workspace = %workspace_id, mode = %settings.mode, "session created");
        Ok(Self {
            shared: Arc::new(Shared {
                workspace_id,
                config,
                ports,
                state: Mutex::new(SessionState {
                    settings,
                    snapshot: None,
                    active_provider: Provider::Unknown,
                    scopes,
                    refresh_seq: 0,
                    last_silent: None,
                    artifact_seq: 0,
                }),
                apply_tx,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn capacity(&self) -> usize {
        self.shared.config.timeline_capacity
    }

    fn active_scope_key(&self, st: &SessionState) -> String {
        scope_key(&self.shared.workspace_id, st.active_provider)
    }

    fn command_options(&self, settings: &WorkspaceSettings) -> CommandOptions {
        CommandOptions {
            custom_root_override: settings.custom_root.clone(),
            timeout: self.shared.config.command_timeout(),
        }
    }

    fn cli_argv(&self, mode: EnvironmentMode, args: &[&str]) -> Vec<String> {
        spec_cli_argv(mode, &self.shared.config.managed_package, args)
    }

    // -- accessors ----------------------------------------------------------

    pub fn workspace_id(&self) -> &str {
        &self.shared.workspace_id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn settings(&self) -> WorkspaceSettings {
        self.lock().settings.clone()
    }

    pub fn snapshot(&self) -> Option<WorkspaceSnapshot> {
        self.lock().snapshot.clone()
    }

    /// Probe tool health for the persisted mode without scanning the workspace.
    pub fn probe_environment(&self) -> EnvironmentHealth {
        probe_environment(self.settings().mode, self.shared.ports.tools.as_ref())
    }

    pub fn active_provider(&self) -> Provider {
        self.lock().active_provider
    }

    pub fn selected_change(&self) -> Option<String> {
        let mut st = self.lock();
        let key = self.active_scope_key(&st);
        st.scope_mut(&key, self.capacity()).selected_change_id.clone()
    }

    /// Timeline of the active scope, oldest first.
    pub fn timeline(&self) -> Vec<TimelineEvent> {
        let mut st = self.lock();
        let key = self.active_scope_key(&st);
        st.scope_mut(&key, self.capacity()).timeline.events()
    }

    /// Apply state of the active scope.
    pub fn apply_state(&self) -> ApplyExecutionState {
        let mut st = self.lock();
        let key = self.active_scope_key(&st);
        st.scope_mut(&key, self.capacity()).apply.clone()
    }

    /// Follow apply progress of whichever scope is active.
    pub fn subscribe_apply(&self) -> watch::Receiver<ApplyExecutionState> {
        self.shared.apply_tx.subscribe()
    }

    // -- refresh & scope ----------------------------------------------------

    /// Rebuild the snapshot.
    ///
    /// Returns `None` when a silent refresh was debounced or when a newer
    /// refresh started while this one was in flight.
    pub async fn refresh(&self, mode: RefreshMode) -> Result<Option<WorkspaceSnapshot>> {
        let (seq, settings) = {
            let mut st = self.lock();
            if mode == RefreshMode::Silent {
                let now = Instant::now();
                if let Some(last) = st.last_silent {
                    if now.duration_since(last) < self.shared.config.refresh_debounce() {
                        debug!("silent refresh debounced");
                        return Ok(None);
                    }
                }
                st.last_silent = Some(now);
            }
            st.refresh_seq += 1;
            (st.refresh_seq, st.settings.clone())
        };

        let environment = probe_environment(settings.mode, self.shared.ports.tools.as_ref());
        let snapshot = build_snapshot(
            self.shared.ports.artifacts.as_ref(),
            &self.shared.workspace_id,
            settings.custom_root.as_deref(),
            environment,
        )
        .await?;

        let mut st = self.lock();
        if st.refresh_seq != seq {
            debug!(seq, latest = st.refresh_seq, "discarding superseded refresh");
            return Ok(None);
        }
        if snapshot.provider != st.active_provider {
            self.activate(&mut st, snapshot.provider);
        }
        let key = self.active_scope_key(&st);
        let scope = st.scope_mut(&key, self.capacity());
        if let Some(selected) = &scope.selected_change_id {
            if snapshot.change(selected).is_none() {
                debug!(change = %selected, "selected change disappeared");
                scope.selected_change_id = None;
            }
        }
        st.snapshot = Some(snapshot.clone());
        Ok(Some(snapshot))
    }

    /// Make `provider`'s scope the active one.
    pub fn switch_scope(&self, provider: Provider) {
        let mut st = self.lock();
        if st.active_provider != provider {
            self.activate(&mut st, provider);
        }
    }

    fn activate(&self, st: &mut SessionState, provider: Provider) {
        info!(
            workspace = %self.shared.workspace_id,
            from = %st.active_provider,
            to = %provider,
            "switching scope"
        );
        st.active_provider = provider;
        let key = self.active_scope_key(st);
        let apply = st.scope_mut(&key, self.capacity()).apply.clone();
        self.shared.apply_tx.send_replace(apply);
    }

    /// The stored snapshot, building one first if there is none yet.
    async fn current_snapshot(&self) -> Result<WorkspaceSnapshot> {
        if let Some(snapshot) = self.snapshot() {
            return Ok(snapshot);
        }
        if let Some(snapshot) = self.refresh(RefreshMode::Forced).await? {
            return Ok(snapshot);
        }
        self.snapshot().ok_or(LifecycleError::SnapshotUnavailable)
    }

    fn find_change(snapshot: &WorkspaceSnapshot, change_id: &str) -> Result<ChangeSummary> {
        snapshot
            .change(change_id)
            .cloned()
            .ok_or_else(|| LifecycleError::ChangeNotFound(change_id.to_string()))
    }

    // -- selection ----------------------------------------------------------

    pub async fn select_change(&self, change_id: &str) -> Result<()> {
        paths::validate_change_id(change_id)?;
        let snapshot = self.current_snapshot().await?;
        Self::find_change(&snapshot, change_id)?;
        let mut st = self.lock();
        let key = self.active_scope_key(&st);
        st.scope_mut(&key, self.capacity()).selected_change_id = Some(change_id.to_string());
        Ok(())
    }

    /// Read every artifact of a change.
    ///
    /// Returns `None` when a later load started before this one finished.
    pub async fn load_change_artifacts(&self, change_id: &str) -> Result<Option<ChangeArtifactContents>> {
        paths::validate_change_id(change_id)?;
        let (seq, custom_root) = {
            let mut st = self.lock();
            st.artifact_seq += 1;
            (st.artifact_seq, st.settings.custom_root.clone())
        };
        let snapshot = self.current_snapshot().await?;
        let change = Self::find_change(&snapshot, change_id)?;

        let store = self.shared.ports.artifacts.as_ref();
        let ws = self.shared.workspace_id.as_str();
        let root = custom_root.as_deref();
        let archived = change.archived;
        let read = |file: &'static str| {
            let path = paths::change_file(change_id, archived, file);
            async move { store.read(ws, &path, root).await }
        };

        let proposal = read(paths::PROPOSAL_FILE).await?;
        let design = read(paths::DESIGN_FILE).await?;
        let tasks = read(paths::TASKS_FILE).await?;
        let verification = read(paths::VERIFICATION_FILE).await?;
        let mut specs = Vec::with_capacity(change.artifacts.spec_paths.len());
        for path in &change.artifacts.spec_paths {
            specs.push((path.clone(), store.read(ws, path, root).await?));
        }
        let checklist = tasks.exists.then(|| parse_checklist(&tasks.content));

        if self.lock().artifact_seq != seq {
            debug!(change = %change_id, "discarding superseded artifact load");
            return Ok(None);
        }
        Ok(Some(ChangeArtifactContents {
            change_id: change_id.to_string(),
            archived,
            proposal,
            design,
            tasks,
            verification,
            specs,
            checklist,
        }))
    }

    // -- gate ---------------------------------------------------------------

    /// Latest verify for `change_id` in `provider`'s scope: this session's
    /// timeline first, then the persisted outcome.
    fn last_verify(&self, provider: Provider, change_id: &str) -> Result<Option<VerifyOutcome>> {
        let from_timeline = {
            let mut st = self.lock();
            let key = scope_key(&self.shared.workspace_id, provider);
            st.scope_mut(&key, self.capacity()).timeline.last_verify(change_id)
        };
        match from_timeline {
            Some(outcome) => Ok(Some(outcome)),
            None => self
                .shared
                .ports
                .store
                .verify_outcome(&verify_key(&self.shared.workspace_id, provider, change_id)),
        }
    }

    pub async fn actions_for(&self, change_id: &str) -> Result<Vec<Action>> {
        paths::validate_change_id(change_id)?;
        let snapshot = self.current_snapshot().await?;
        let change = Self::find_change(&snapshot, change_id)?;
        let last_verify = self.last_verify(snapshot.provider, change_id)?;
        Ok(compute_actions(&GateInput {
            change: &change,
            support_level: snapshot.support_level,
            provider: snapshot.provider,
            environment: &snapshot.environment,
            last_verify: last_verify.as_ref(),
            task_progress: change.task_progress.as_ref(),
        }))
    }

    /// Archive preflight against a fresh listing of the tree.
    pub async fn archive_preflight(&self, change_id: &str) -> Result<ArchivePreflight> {
        paths::validate_change_id(change_id)?;
        let custom_root = self.settings().custom_root;
        let root = custom_root.as_deref();
        let store = self.shared.ports.artifacts.as_ref();
        let ws = self.shared.workspace_id.as_str();

        let tree = store.list_tree(ws, root).await?;
        if !tree.has_dir(&paths::change_dir(change_id, false)) {
            return Err(LifecycleError::ChangeNotFound(change_id.to_string()));
        }
        let artifacts = change_artifacts(&tree, change_id, false);
        let preflight =
            collect_archive_preflight(store, ws, root, &tree, change_id, false, &artifacts.spec_paths)
                .await?;
        debug!(change = %change_id, blockers = preflight.blockers.len(), "archive preflight");
        Ok(preflight)
    }

    // -- commands -----------------------------------------------------------

    /// Run `continue`, `verify` or `archive` for a change and record the
    /// outcome on the timeline. Apply goes through [`Self::run_apply`].
    pub async fn run_action(&self, key: ActionKey, change_id: &str) -> Result<TimelineEvent> {
        paths::validate_change_id(change_id)?;
        let snapshot = self.current_snapshot().await?;
        let change = Self::find_change(&snapshot, change_id)?;
        let Some(args) = action_args(key, &change) else {
            return Err(LifecycleError::InvalidValue(
                "action: apply runs through run_apply".to_string(),
            ));
        };
        let actions = self.actions_for(change_id).await?;
        if let Some(action) = find(&actions, key).filter(|a| !a.available) {
            return Err(LifecycleError::Blocked(action.blockers.join("; ")));
        }
        if key == ActionKey::Archive {
            let preflight = self.archive_preflight(change_id).await?;
            if !preflight.is_clear() {
                return Err(LifecycleError::Blocked(preflight.blockers.join("; ")));
            }
        }

        let settings = self.settings();
        let argv = self.cli_argv(settings.mode, &args);
        info!(change = %change_id, action = %key, "running action");
        let (success, output) = self.run_command(&argv, &settings).await;

        let kind = if key == ActionKey::Verify {
            TimelineKind::Validate
        } else {
            TimelineKind::Action
        };
        let mut event = TimelineEvent::new(kind, key.as_str(), Some(change_id))
            .with_command(&argv)
            .with_result(success, output);
        if key == ActionKey::Verify {
            event.validation_issues = parse_validation_issues(&event.output);
            let outcome = VerifyOutcome {
                success,
                at: event.at,
            };
            let vkey = verify_key(&self.shared.workspace_id, snapshot.provider, change_id);
            if let Err(e) = self.shared.ports.store.record_verify(&vkey, &outcome) {
                warn!(key = %vkey, error = %e, "failed to persist verify outcome");
            }
        }
        self.push_event(snapshot.provider, event.clone());
        self.refresh_after_mutation().await;
        Ok(event)
    }

    /// Initialize the spec provider in the workspace.
    pub async fn bootstrap(&self) -> Result<TimelineEvent> {
        let settings = self.settings();
        let argv = self.cli_argv(settings.mode, &["init"]);
        info!(workspace = %self.shared.workspace_id, "bootstrapping workspace");
        let (success, output) = self.run_command(&argv, &settings).await;
        let event = TimelineEvent::new(TimelineKind::Action, "bootstrap", None)
            .with_command(&argv)
            .with_result(success, output);
        let provider = self.active_provider();
        self.push_event(provider, event.clone());
        self.refresh_after_mutation().await;
        Ok(event)
    }

    /// Command errors such as timeouts become a failed result.
    async fn run_command(&self, argv: &[String], settings: &WorkspaceSettings) -> (bool, String) {
        let result = self
            .shared
            .ports
            .commands
            .run(&self.shared.workspace_id, argv, self.command_options(settings))
            .await;
        match result {
            Ok(out) => (out.success, out.combined()),
            Err(e) => {
                warn!(command = %argv.join(" "), error = %e, "command failed to run");
                (false, e.to_string())
            }
        }
    }

    async fn refresh_after_mutation(&self) {
        if let Err(e) = self.refresh(RefreshMode::Forced).await {
            warn!(error = %e, "refresh after mutation failed");
        }
    }

    fn push_event(&self, provider: Provider, event: TimelineEvent) {
        let mut st = self.lock();
        let key = scope_key(&self.shared.workspace_id, provider);
        st.scope_mut(&key, self.capacity()).timeline.push(event);
    }

    // -- tasks & git --------------------------------------------------------

    /// Toggle one checklist item of an active change and persist `tasks.md`.
    pub async fn set_task_checked(&self, change_id: &str, index: usize, checked: bool) -> Result<TaskProgress> {
        let provider = self.active_provider();
        self.set_task_checked_in(provider, change_id, index, checked).await
    }

    async fn set_task_checked_in(
        &self,
        provider: Provider,
        change_id: &str,
        index: usize,
        checked: bool,
    ) -> Result<TaskProgress> {
        paths::validate_change_id(change_id)?;
        let custom_root = self.settings().custom_root;
        let root = custom_root.as_deref();
        let store = self.shared.ports.artifacts.as_ref();
        let ws = self.shared.workspace_id.as_str();

        let path = paths::change_file(change_id, false, paths::TASKS_FILE);
        let current = store.read(ws, &path, root).await?;
        if !current.exists {
            return Err(LifecycleError::MissingArtifact {
                change: change_id.to_string(),
                artifact: paths::TASKS_FILE.to_string(),
            });
        }
        if current.truncated {
            return Err(LifecycleError::InvalidValue(format!(
                "{path}: file exceeds the read limit and cannot be edited"
            )));
        }
        let updated = set_item_checked(&current.content, index, checked)?;
        store.write(ws, &path, &updated, root).await?;

        let checklist = parse_checklist(&updated);
        let text = checklist
            .get(index)
            .map(|item| item.text.clone())
            .unwrap_or_default();
        let verb = if checked { "Checked" } else { "Unchecked" };
        debug!(change = %change_id, index, checked, "task toggled");
        self.push_event(
            provider,
            TimelineEvent::new(TimelineKind::TaskUpdate, "task-update", Some(change_id))
                .with_result(true, format!("{verb} task {index}: {text}")),
        );
        Ok(checklist.progress)
    }

    pub fn record_git_link(&self, change_id: &str, refs: &[String]) -> Result<TimelineEvent> {
        paths::validate_change_id(change_id)?;
        let refs: Vec<String> = refs
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if refs.is_empty() {
            return Err(LifecycleError::InvalidValue("git refs: none given".to_string()));
        }
        let mut event = TimelineEvent::new(TimelineKind::GitLink, "git-link", Some(change_id))
            .with_result(true, format!("Linked {}", refs.join(", ")));
        event.git_refs = refs;
        let provider = self.active_provider();
        self.push_event(provider, event.clone());
        Ok(event)
    }

    // -- apply --------------------------------------------------------------

    /// Run apply for a change in the active scope and wait for it to end.
    ///
    /// A run already in progress for the scope is superseded: its later
    /// updates are ignored.
    pub async fn run_apply(&self, change_id: &str, executor: Option<Executor>) -> Result<ApplyExecutionState> {
        paths::validate_change_id(change_id)?;
        let snapshot = self.current_snapshot().await?;
        let provider = snapshot.provider;
        let gate_blockers = match self.actions_for(change_id).await {
            Ok(actions) => find(&actions, ActionKey::Apply)
                .map(|a| a.blockers.clone())
                .unwrap_or_default(),
            Err(LifecycleError::ChangeNotFound(id)) => vec![format!("Change {id} not found")],
            Err(e) => return Err(e),
        };
        let executor = executor.unwrap_or(self.shared.config.default_executor);
        let settings = self.settings();

        let run = {
            let mut st = self.lock();
            let key = scope_key(&self.shared.workspace_id, provider);
            let scope = st.scope_mut(&key, self.capacity());
            scope.apply_run += 1;
            scope.apply = ApplyExecutionState::started(change_id, executor);
            scope.apply_run
        };
        let host = ScopedApplyHost {
            session: self.clone(),
            provider,
            run,
        };
        let request = ApplyRequest {
            workspace_id: self.shared.workspace_id.clone(),
            change_id: change_id.to_string(),
            executor,
            gate_blockers,
            instructions_argv: self.cli_argv(
                settings.mode,
                &["instructions", "apply", "--change", change_id],
            ),
            command_options: self.command_options(&settings),
            agent_timeout: self.shared.config.agent_timeout(),
            heartbeat: self.shared.config.heartbeat(),
        };
        let ports = &self.shared.ports;
        let state = apply::run_apply(
            request,
            ApplyDeps {
                runner: ports.commands.as_ref(),
                dispatcher: ports.agents.as_ref(),
                bus: &ports.bus,
                host: &host,
            },
        )
        .await;

        let success = state.status == ApplyStatus::Success;
        let output = match (&state.error, &state.summary) {
            (Some(error), _) => error.clone(),
            (None, Some(summary)) => summary.clone(),
            (None, None) => String::new(),
        };
        self.push_event(
            provider,
            TimelineEvent::new(TimelineKind::Action, ActionKey::Apply.as_str(), Some(change_id))
                .with_result(success, output),
        );
        Ok(state)
    }

    /// Store `state` as the scope's apply state if `run` is still current.
    fn publish_apply(&self, provider: Provider, run: u64, state: &ApplyExecutionState) {
        let mut st = self.lock();
        let key = scope_key(&self.shared.workspace_id, provider);
        let active = st.active_provider == provider;
        let scope = st.scope_mut(&key, self.capacity());
        if scope.apply_run != run {
            debug!(run, current = scope.apply_run, "dropping update from superseded apply run");
            return;
        }
        scope.apply = state.clone();
        if active {
            self.shared.apply_tx.send_replace(state.clone());
        }
    }

    // -- settings -----------------------------------------------------------

    pub fn set_environment_mode(&self, mode: EnvironmentMode) -> Result<WorkspaceSettings> {
        self.update_settings(|s| s.mode = mode)
    }

    /// Point the session at an external spec root, or back at the workspace.
    pub fn set_custom_root(&self, root: Option<PathBuf>) -> Result<WorkspaceSettings> {
        if let Some(root) = &root {
            if !root.is_absolute() {
                return Err(LifecycleError::InvalidValue(format!(
                    "custom root: {} is not an absolute path",
                    root.display()
                )));
            }
        }
        self.update_settings(|s| s.custom_root = root)
    }

    fn update_settings(&self, f: impl FnOnce(&mut WorkspaceSettings)) -> Result<WorkspaceSettings> {
        let mut next = self.settings();
        f(&mut next);
        self.shared
            .ports
            .store
            .save_settings(&self.shared.workspace_id, &next)?;
        let mut st = self.lock();
        st.settings = next.clone();
        // The next query rebuilds against the new settings.
        st.snapshot = None;
        info!(workspace = %self.shared.workspace_id, mode = %next.mode, "settings updated");
        Ok(next)
    }
}

/// Spec CLI arguments for a command action; `None` for apply.
fn action_args<'a>(key: ActionKey, change: &'a ChangeSummary) -> Option<Vec<&'a str>> {
    let id = change.id.as_str();
    match key {
        ActionKey::Continue => Some(vec!["instructions", next_artifact(change), "--change", id]),
        ActionKey::Verify => Some(vec!["validate", id, "--strict"]),
        ActionKey::Archive => Some(vec!["archive", id, "--yes"]),
        ActionKey::Apply => None,
    }
}

/// The artifact `continue` should generate next.
fn next_artifact(change: &ChangeSummary) -> &'static str {
    let a = &change.artifacts;
    if a.proposal_path.is_none() {
        "proposal"
    } else if a.spec_paths.is_empty() {
        "specs"
    } else if a.design_path.is_none() {
        "design"
    } else if a.tasks_path.is_none() {
        "tasks"
    } else {
        "apply"
    }
}
