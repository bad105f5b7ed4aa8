//! Workspace snapshot: provider detection, change enumeration and status
//! derivation.
//!
//! A snapshot is rebuilt wholesale from a tree listing on every refresh.
//! Nothing in it is patched incrementally; status in particular is always
//! re-derived from the artifacts present at build time.

use crate::checklist::{parse_checklist, TaskProgress};
use crate::environment::EnvironmentHealth;
use crate::error::Result;
use crate::paths;
use crate::ports::{ArtifactRead, ArtifactStore, TreeListing};
use crate::requirements::{archive_preflight, delta_operations, ArchivePreflight, DeltaCheck};
use crate::types::{ChangeStatus, HealthStatus, Provider, SupportLevel};
use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Blocker text
// ---------------------------------------------------------------------------

pub const MISSING_PROPOSAL: &str = "Missing proposal.md";
pub const MISSING_DESIGN: &str = "Missing design.md";
pub const MISSING_TASKS: &str = "Missing tasks.md";
pub const MISSING_SPECS_DELTA: &str = "Missing specs delta";
pub const EMPTY_CHECKLIST: &str = "tasks.md has no checklist items";

pub fn delta_without_operations(path: &str) -> String {
    format!("{path} has no ADDED/MODIFIED/REMOVED/RENAMED requirement sections")
}

pub fn inaccessible_root(root: &Path, reason: &str) -> String {
    format!("Custom spec root {} is not accessible: {reason}", root.display())
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeArtifacts {
    pub proposal_path: Option<String>,
    pub design_path: Option<String>,
    pub tasks_path: Option<String>,
    pub verification_path: Option<String>,
    pub spec_paths: Vec<String>,
}

impl ChangeArtifacts {
    /// Proposal, design, tasks and at least one spec delta.
    pub fn is_complete(&self) -> bool {
        self.proposal_path.is_some()
            && self.design_path.is_some()
            && self.tasks_path.is_some()
            && !self.spec_paths.is_empty()
    }

    /// Blockers for each artifact that is not there yet.
    pub fn missing_blockers(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.proposal_path.is_none() {
            out.push(MISSING_PROPOSAL.to_string());
        }
        if self.design_path.is_none() {
            out.push(MISSING_DESIGN.to_string());
        }
        if self.tasks_path.is_none() {
            out.push(MISSING_TASKS.to_string());
        }
        if self.spec_paths.is_empty() {
            out.push(MISSING_SPECS_DELTA.to_string());
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub id: String,
    pub status: ChangeStatus,
    pub updated_at: Option<NaiveDate>,
    pub archived: bool,
    pub artifacts: ChangeArtifacts,
    pub blockers: Vec<String>,
    pub archive_blockers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_progress: Option<TaskProgress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSnapshot {
    pub provider: Provider,
    pub support_level: SupportLevel,
    /// The external root when one is configured, else the provider directory.
    pub spec_root: Option<String>,
    pub environment: EnvironmentHealth,
    pub changes: Vec<ChangeSummary>,
    pub blockers: Vec<String>,
}

impl WorkspaceSnapshot {
    pub fn change(&self, id: &str) -> Option<&ChangeSummary> {
        self.changes.iter().find(|c| c.id == id)
    }
}

// ---------------------------------------------------------------------------
// Pure derivations
// ---------------------------------------------------------------------------

/// Provider by marker directory.
pub fn detect_provider(tree: &TreeListing) -> Provider {
    if tree.has_dir(paths::OPENSPEC_ROOT) {
        Provider::Openspec
    } else if tree.has_dir(paths::SPECKIT_ROOT) {
        Provider::Speckit
    } else {
        Provider::Unknown
    }
}

/// Status of an active change.
///
/// Blockers take precedence over completeness: a change that carries any
/// blocker is `blocked`, an incomplete one without blockers is `draft`.
pub fn derive_status(
    artifacts: &ChangeArtifacts,
    blockers: &[String],
    progress: Option<&TaskProgress>,
) -> ChangeStatus {
    if !blockers.is_empty() {
        return ChangeStatus::Blocked;
    }
    if !artifacts.is_complete() {
        return ChangeStatus::Draft;
    }
    let p = progress.copied().unwrap_or_default();
    if p.checked > 0 && p.required_checked < p.required_total {
        return ChangeStatus::Implementing;
    }
    let all_required = p.required_total > 0 && p.required_checked == p.required_total;
    let all_checked = p.total > 0 && p.checked == p.total;
    if artifacts.verification_path.is_some() || all_required || all_checked {
        return ChangeStatus::Verified;
    }
    ChangeStatus::Ready
}

static DATE_RE: OnceLock<Regex> = OnceLock::new();

/// Latest `YYYY-MM-DD` embedded in a change id.
pub fn date_from_id(id: &str) -> Option<NaiveDate> {
    let re = DATE_RE.get_or_init(|| Regex::new(r"\d{4}-\d{2}-\d{2}").unwrap());
    // Overlapping candidates: scan from every position so `2024-01-022025-02-03` finds both.
    (0..id.len())
        .filter(|&i| id.is_char_boundary(i))
        .filter_map(|i| re.find_at(id, i).filter(|m| m.start() == i))
        .filter_map(|m| NaiveDate::parse_from_str(m.as_str(), "%Y-%m-%d").ok())
        .max()
}

/// Newest first, undated last, ties by id ascending.
pub fn compare_changes(a: &ChangeSummary, b: &ChangeSummary) -> Ordering {
    match (a.updated_at, b.updated_at) {
        (Some(x), Some(y)) => y.cmp(&x).then_with(|| a.id.cmp(&b.id)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    }
}

/// Artifact paths for a change, from the file set only.
pub fn change_artifacts(tree: &TreeListing, change_id: &str, archived: bool) -> ChangeArtifacts {
    let present = |file: &str| {
        let path = paths::change_file(change_id, archived, file);
        tree.has_file(&path).then_some(path)
    };
    let prefix = paths::change_specs_prefix(change_id, archived);
    ChangeArtifacts {
        proposal_path: present(paths::PROPOSAL_FILE),
        design_path: present(paths::DESIGN_FILE),
        tasks_path: present(paths::TASKS_FILE),
        verification_path: present(paths::VERIFICATION_FILE),
        spec_paths: tree
            .files_under(&prefix)
            .filter(|f| f.ends_with(".md"))
            .cloned()
            .collect(),
    }
}

/// Active and archived change ids, validated, each set sorted.
pub fn list_change_ids(tree: &TreeListing) -> (Vec<String>, Vec<String>) {
    let valid = |id: &String| paths::validate_change_id(id).is_ok();
    let active = tree
        .child_dirs(paths::CHANGES_DIR)
        .into_iter()
        .filter(|id| id != paths::ARCHIVE_SEGMENT)
        .filter(valid)
        .collect();
    let archived = tree
        .child_dirs(paths::ARCHIVE_DIR)
        .into_iter()
        .filter(valid)
        .collect();
    (active, archived)
}

// ---------------------------------------------------------------------------
// Archive preflight (shared by snapshot and on-demand checks)
// ---------------------------------------------------------------------------

/// Read every delta of a change plus its target spec and run the matcher.
///
/// A target absent from `tree`, or one that reads back as missing, counts as
/// non-existent.
pub async fn collect_archive_preflight(
    store: &dyn ArtifactStore,
    workspace_id: &str,
    custom_root: Option<&Path>,
    tree: &TreeListing,
    change_id: &str,
    archived: bool,
    spec_paths: &[String],
) -> Result<ArchivePreflight> {
    let mut deltas = Vec::with_capacity(spec_paths.len());
    for delta_path in spec_paths {
        let delta = store.read(workspace_id, delta_path, custom_root).await?;
        deltas.push((delta_path.clone(), delta));
    }
    preflight_from_deltas(store, workspace_id, custom_root, tree, change_id, archived, deltas).await
}

/// Run the matcher over deltas that were already read, reading only targets.
async fn preflight_from_deltas(
    store: &dyn ArtifactStore,
    workspace_id: &str,
    custom_root: Option<&Path>,
    tree: &TreeListing,
    change_id: &str,
    archived: bool,
    deltas: Vec<(String, ArtifactRead)>,
) -> Result<ArchivePreflight> {
    let mut checks = Vec::with_capacity(deltas.len());
    for (delta_path, delta) in deltas {
        if !delta.exists {
            continue;
        }
        let Some(target_path) = paths::delta_target_path(change_id, archived, &delta_path) else {
            continue;
        };
        let target_text = if tree.has_file(&target_path) {
            let target = store.read(workspace_id, &target_path, custom_root).await?;
            target.exists.then_some(target.content)
        } else {
            None
        };
        checks.push(DeltaCheck {
            target_path,
            delta_text: delta.content,
            target_text,
        });
    }
    Ok(archive_preflight(&checks))
}

// ---------------------------------------------------------------------------
// Snapshot building
// ---------------------------------------------------------------------------

async fn summarize_active(
    store: &dyn ArtifactStore,
    workspace_id: &str,
    custom_root: Option<&Path>,
    tree: &TreeListing,
    change_id: &str,
) -> Result<ChangeSummary> {
    let artifacts = change_artifacts(tree, change_id, false);
    let mut blockers = Vec::new();
    if artifacts.proposal_path.is_none() {
        blockers.push(MISSING_PROPOSAL.to_string());
    }

    let mut task_progress = None;
    if let Some(tasks_path) = &artifacts.tasks_path {
        let tasks = store.read(workspace_id, tasks_path, custom_root).await?;
        let checklist = parse_checklist(&tasks.content);
        if checklist.is_empty() {
            blockers.push(EMPTY_CHECKLIST.to_string());
        }
        task_progress = Some(checklist.progress);
    }

    let mut deltas = Vec::with_capacity(artifacts.spec_paths.len());
    for delta_path in &artifacts.spec_paths {
        let delta = store.read(workspace_id, delta_path, custom_root).await?;
        if delta_operations(&delta.content).is_empty() {
            blockers.push(delta_without_operations(delta_path));
        }
        deltas.push((delta_path.clone(), delta));
    }

    let preflight =
        preflight_from_deltas(store, workspace_id, custom_root, tree, change_id, false, deltas)
            .await?;

    let status = derive_status(&artifacts, &blockers, task_progress.as_ref());
    debug!(change = %change_id, status = %status, "classified change");
    Ok(ChangeSummary {
        id: change_id.to_string(),
        status,
        updated_at: date_from_id(change_id),
        archived: false,
        artifacts,
        blockers,
        archive_blockers: preflight.blockers,
        task_progress,
    })
}

fn summarize_archived(tree: &TreeListing, change_id: &str) -> ChangeSummary {
    ChangeSummary {
        id: change_id.to_string(),
        status: ChangeStatus::Archived,
        updated_at: date_from_id(change_id),
        archived: true,
        artifacts: change_artifacts(tree, change_id, true),
        blockers: Vec::new(),
        archive_blockers: Vec::new(),
        task_progress: None,
    }
}

fn provider_blockers(provider: Provider) -> Vec<String> {
    match provider {
        Provider::Openspec => Vec::new(),
        Provider::Speckit => {
            vec!["Spec Kit workspaces have minimal support; lifecycle actions are unavailable".to_string()]
        }
        Provider::Unknown => {
            vec!["No spec provider detected (expected openspec/ or .specify/)".to_string()]
        }
    }
}

/// Build a snapshot for `workspace_id`.
///
/// When `custom_root` is set and cannot be listed, the result is a degraded
/// snapshot carrying the reason as a blocker rather than an error.
pub async fn build_snapshot(
    store: &dyn ArtifactStore,
    workspace_id: &str,
    custom_root: Option<&Path>,
    mut environment: EnvironmentHealth,
) -> Result<WorkspaceSnapshot> {
    let tree = match store.list_tree(workspace_id, custom_root).await {
        Ok(tree) => tree,
        Err(e) => match custom_root {
            Some(root) => {
                warn!(root = %root.display(), error = %e, "custom spec root not accessible");
                environment.degrade_to(HealthStatus::Degraded);
                return Ok(WorkspaceSnapshot {
                    provider: Provider::Unknown,
                    support_level: SupportLevel::None,
                    spec_root: Some(root.display().to_string()),
                    environment,
                    changes: Vec::new(),
                    blockers: vec![inaccessible_root(root, &e.to_string())],
                });
            }
            None => return Err(e),
        },
    };

    let provider = detect_provider(&tree);
    let spec_root = match (custom_root, provider) {
        (Some(root), _) => Some(root.display().to_string()),
        (None, Provider::Openspec) => Some(paths::OPENSPEC_ROOT.to_string()),
        (None, Provider::Speckit) => Some(paths::SPECKIT_ROOT.to_string()),
        (None, Provider::Unknown) => None,
    };

    let mut changes = Vec::new();
    if provider == Provider::Openspec {
        let (active, archived) = list_change_ids(&tree);
        for id in &active {
            changes.push(summarize_active(store, workspace_id, custom_root, &tree, id).await?);
        }
        changes.extend(archived.iter().map(|id| summarize_archived(&tree, id)));
        changes.sort_by(compare_changes);
    }

    info!(
        workspace = %workspace_id,
        provider = %provider,
        changes = changes.len(),
        environment = %environment.status,
        "workspace snapshot built"
    );
    Ok(WorkspaceSnapshot {
        provider,
        support_level: provider.support_level(),
        spec_root,
        environment,
        changes,
        blockers: provider_blockers(provider),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::MemoryArtifacts;
    use crate::types::EnvironmentMode;

    fn healthy() -> EnvironmentHealth {
        EnvironmentHealth {
            mode: EnvironmentMode::Managed,
            status: HealthStatus::Healthy,
            checks: Vec::new(),
            blockers: Vec::new(),
            hints: Vec::new(),
        }
    }

    fn complete(extra: &[(&str, &str)], tasks: &str) -> MemoryArtifacts {
        let mut files = vec![
            ("openspec/changes/c/proposal.md", "# P"),
            ("openspec/changes/c/design.md", "# D"),
            ("openspec/changes/c/tasks.md", tasks),
            (
                "openspec/changes/c/specs/auth/spec.md",
                "## ADDED Requirements\n### Requirement: Login\n",
            ),
        ];
        files.extend_from_slice(extra);
        MemoryArtifacts::with_files(&files)
    }

    #[test]
    fn status_rules() {
        let full = ChangeArtifacts {
            proposal_path: Some("p".into()),
            design_path: Some("d".into()),
            tasks_path: Some("t".into()),
            verification_path: None,
            spec_paths: vec!["s".into()],
        };
        let progress = |total, checked, rt, rc| TaskProgress {
            total,
            checked,
            required_total: rt,
            required_checked: rc,
        };

        let draft = ChangeArtifacts {
            design_path: None,
            ..full.clone()
        };
        assert_eq!(derive_status(&draft, &[], None), ChangeStatus::Draft);
        assert_eq!(
            derive_status(&draft, &[MISSING_PROPOSAL.to_string()], None),
            ChangeStatus::Blocked
        );
        assert_eq!(derive_status(&full, &[], Some(&progress(3, 0, 2, 0))), ChangeStatus::Ready);
        assert_eq!(
            derive_status(&full, &[], Some(&progress(3, 1, 2, 1))),
            ChangeStatus::Implementing
        );
        // Only the p2 item left: all required done.
        assert_eq!(
            derive_status(&full, &[], Some(&progress(3, 2, 2, 2))),
            ChangeStatus::Verified
        );
        // All-p2 checklist fully checked.
        assert_eq!(
            derive_status(&full, &[], Some(&progress(2, 2, 0, 0))),
            ChangeStatus::Verified
        );
        let with_verification = ChangeArtifacts {
            verification_path: Some("v".into()),
            ..full.clone()
        };
        assert_eq!(
            derive_status(&with_verification, &[], Some(&progress(3, 0, 2, 0))),
            ChangeStatus::Verified
        );
    }

    #[test]
    fn dates_from_ids() {
        assert_eq!(
            date_from_id("2024-03-01-add-auth"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(
            date_from_id("2024-03-01-redo-2025-01-15"),
            NaiveDate::from_ymd_opt(2025, 1, 15)
        );
        assert_eq!(date_from_id("add-auth"), None);
        assert_eq!(date_from_id("2024-13-40-bad"), None);
    }

    #[test]
    fn sort_newest_first_undated_last() {
        let mk = |id: &str| ChangeSummary {
            id: id.into(),
            status: ChangeStatus::Draft,
            updated_at: date_from_id(id),
            archived: false,
            artifacts: ChangeArtifacts::default(),
            blockers: vec![],
            archive_blockers: vec![],
            task_progress: None,
        };
        let mut v = vec![mk("zeta"), mk("2024-01-01-b"), mk("alpha"), mk("2025-01-01-a"), mk("2024-01-01-a")];
        v.sort_by(compare_changes);
        let ids: Vec<&str> = v.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["2025-01-01-a", "2024-01-01-a", "2024-01-01-b", "alpha", "zeta"]);
    }

    #[tokio::test]
    async fn builds_openspec_snapshot() {
        let store = complete(
            &[
                ("openspec/changes/archive/2024-01-01-old/proposal.md", "# old"),
                ("openspec/changes/archive/2024-01-01-old/tasks.md", "- [ ] never read"),
                ("openspec/changes/draft-one/proposal.md", "# P"),
            ],
            "- [x] 1.1 a\n- [ ] 1.2 b\n",
        );
        let snap = build_snapshot(&store, "ws", None, healthy()).await.unwrap();
        assert_eq!(snap.provider, Provider::Openspec);
        assert_eq!(snap.support_level, SupportLevel::Full);
        assert_eq!(snap.spec_root.as_deref(), Some("openspec"));

        let c = snap.change("c").unwrap();
        assert_eq!(c.status, ChangeStatus::Implementing);
        assert_eq!(c.artifacts.spec_paths, vec!["openspec/changes/c/specs/auth/spec.md"]);

        let draft = snap.change("draft-one").unwrap();
        assert_eq!(draft.status, ChangeStatus::Draft);

        let old = snap.change("2024-01-01-old").unwrap();
        assert_eq!(old.status, ChangeStatus::Archived);
        assert!(old.task_progress.is_none());
        assert!(!store.was_read("openspec/changes/archive/2024-01-01-old/tasks.md"));
        assert_eq!(snap.changes[0].id, "2024-01-01-old");
    }

    #[tokio::test]
    async fn change_blockers_are_collected() {
        let store = MemoryArtifacts::with_files(&[
            ("openspec/changes/x/tasks.md", "just prose\n"),
            ("openspec/changes/x/specs/auth/spec.md", "no headings\n"),
        ]);
        let snap = build_snapshot(&store, "ws", None, healthy()).await.unwrap();
        let x = snap.change("x").unwrap();
        assert_eq!(x.status, ChangeStatus::Blocked);
        assert_eq!(
            x.blockers,
            vec![
                MISSING_PROPOSAL.to_string(),
                EMPTY_CHECKLIST.to_string(),
                delta_without_operations("openspec/changes/x/specs/auth/spec.md"),
            ]
        );
    }

    #[tokio::test]
    async fn archive_blockers_come_from_matcher() {
        let store = complete(
            &[(
                "openspec/changes/c/specs/billing/spec.md",
                "## MODIFIED Requirements\n### Requirement: Invoices\n",
            )],
            "- [ ] a\n",
        );
        let snap = build_snapshot(&store, "ws", None, healthy()).await.unwrap();
        assert_eq!(
            snap.change("c").unwrap().archive_blockers,
            vec!["delta MODIFIED requires existing openspec/specs/billing/spec.md"]
        );
    }

    #[tokio::test]
    async fn each_delta_is_read_once_per_snapshot() {
        let delta = "openspec/changes/c/specs/auth/spec.md";
        let target = "openspec/specs/auth/spec.md";
        let store = complete(
            &[
                (delta, "## MODIFIED Requirements\n### Requirement: Login\n"),
                (target, "### Requirement: Login\n"),
            ],
            "- [ ] a\n",
        );
        let snap = build_snapshot(&store, "ws", None, healthy()).await.unwrap();
        assert!(snap.change("c").unwrap().archive_blockers.is_empty());
        assert_eq!(store.read_count(delta), 1);
        assert_eq!(store.read_count(target), 1);
    }

    #[tokio::test]
    async fn speckit_and_unknown_providers() {
        let store = MemoryArtifacts::with_files(&[(".specify/memory/constitution.md", "x")]);
        let snap = build_snapshot(&store, "ws", None, healthy()).await.unwrap();
        assert_eq!(snap.provider, Provider::Speckit);
        assert_eq!(snap.support_level, SupportLevel::Minimal);
        assert!(snap.changes.is_empty());

        let store = MemoryArtifacts::with_files(&[("README.md", "x")]);
        let snap = build_snapshot(&store, "ws", None, healthy()).await.unwrap();
        assert_eq!(snap.provider, Provider::Unknown);
        assert_eq!(snap.blockers.len(), 1);
    }

    #[tokio::test]
    async fn inaccessible_custom_root_degrades() {
        let store = MemoryArtifacts::default();
        store.fail_listing("permission denied");
        let root = Path::new("/mnt/specs");
        let snap = build_snapshot(&store, "ws", Some(root), healthy()).await.unwrap();
        assert_eq!(snap.provider, Provider::Unknown);
        assert_eq!(snap.support_level, SupportLevel::None);
        assert_eq!(snap.environment.status, HealthStatus::Degraded);
        assert_eq!(snap.blockers.len(), 1);
        assert!(snap.blockers[0].starts_with("Custom spec root /mnt/specs is not accessible: "));
        assert!(snap.blockers[0].contains("permission denied"));
    }
}
