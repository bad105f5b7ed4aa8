use crate::error::{LifecycleError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Layout constants
// ---------------------------------------------------------------------------

// Workspace-relative paths always use `/` separators.

pub const OPENSPEC_ROOT: &str = "openspec";
pub const CHANGES_DIR: &str = "openspec/changes";
pub const ARCHIVE_DIR: &str = "openspec/changes/archive";
pub const SPECS_DIR: &str = "openspec/specs";
pub const ARCHIVE_SEGMENT: &str = "archive";

pub const SPECKIT_ROOT: &str = ".specify";

pub const PROPOSAL_FILE: &str = "proposal.md";
pub const DESIGN_FILE: &str = "design.md";
pub const TASKS_FILE: &str = "tasks.md";
pub const VERIFICATION_FILE: &str = "verification.md";
pub const CHANGE_SPECS_SEGMENT: &str = "specs";

pub const ENGINE_DIR: &str = ".speclife";
pub const CONFIG_FILE: &str = ".speclife/config.yaml";
pub const STATE_DB_FILE: &str = ".speclife/state.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// `openspec/changes/<id>` or `openspec/changes/archive/<id>`.
pub fn change_dir(change_id: &str, archived: bool) -> String {
    if archived {
        format!("{ARCHIVE_DIR}/{change_id}")
    } else {
        format!("{CHANGES_DIR}/{change_id}")
    }
}

pub fn change_file(change_id: &str, archived: bool, filename: &str) -> String {
    format!("{}/{filename}", change_dir(change_id, archived))
}

/// `openspec/changes/<id>/specs/` (trailing slash included).
pub fn change_specs_prefix(change_id: &str, archived: bool) -> String {
    format!("{}/{CHANGE_SPECS_SEGMENT}/", change_dir(change_id, archived))
}

/// Map a delta document path to the canonical spec it modifies.
///
/// `openspec/changes/<id>/specs/auth/spec.md` → `openspec/specs/auth/spec.md`.
/// Returns `None` when `delta_path` is not under the change's specs area.
pub fn delta_target_path(change_id: &str, archived: bool, delta_path: &str) -> Option<String> {
    let prefix = change_specs_prefix(change_id, archived);
    let rest = delta_path.strip_prefix(&prefix)?;
    if rest.is_empty() {
        return None;
    }
    Some(format!("{SPECS_DIR}/{rest}"))
}

/// Resolve a workspace-relative `/` path against an absolute root.
pub fn resolve(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .filter(|seg| !seg.is_empty())
        .fold(root.to_path_buf(), |acc, seg| acc.join(seg))
}

pub fn config_path(root: &Path) -> PathBuf {
    resolve(root, CONFIG_FILE)
}

pub fn state_db_path(root: &Path) -> PathBuf {
    resolve(root, STATE_DB_FILE)
}

// ---------------------------------------------------------------------------
// Change id validation
// ---------------------------------------------------------------------------

static CHANGE_ID_RE: OnceLock<Regex> = OnceLock::new();

fn change_id_re() -> &'static Regex {
    CHANGE_ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._\-]*$").unwrap())
}

/// Change ids come from directory names; reject anything that could escape them.
pub fn validate_change_id(id: &str) -> Result<()> {
    if id.is_empty() || id.len() > 128 || id.contains("..") || !change_id_re().is_match(id) {
        return Err(LifecycleError::InvalidChangeId(id.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
