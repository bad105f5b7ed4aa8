//! Boundaries between the lifecycle engine and the outside world.
//!
//! The engine never touches the filesystem, spawns processes, or opens a
//! database directly; it goes through these traits. Live implementations are
//! in [`crate::local`] and [`crate::store`]; tests use hand-written fakes.
//! The agent boundary is [`agent_bridge::AgentDispatcher`].

use crate::error::Result;
use crate::types::{EnvironmentMode, Provider};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

// ---------------------------------------------------------------------------
// CommandRunner
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CommandOptions {
    /// Run in this directory instead of the workspace root.
    pub custom_root_override: Option<PathBuf>,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// The command's own diagnostic: stderr if it wrote any, stdout otherwise.
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }

    /// stdout and stderr joined, for timeline output.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, _) => self.stderr.trim_end().to_string(),
        }
    }
}

/// Runs fixed argv lists. Never goes through a shell.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        workspace_id: &str,
        argv: &[String],
        options: CommandOptions,
    ) -> Result<CommandOutput>;
}

// ---------------------------------------------------------------------------
// ArtifactStore
// ---------------------------------------------------------------------------

/// Workspace-relative `/` paths of every file and directory under a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeListing {
    pub files: BTreeSet<String>,
    pub dirs: BTreeSet<String>,
}

impl TreeListing {
    pub fn has_file(&self, path: &str) -> bool {
        self.files.contains(path)
    }

    /// True when `dir` exists or anything is listed beneath it.
    pub fn has_dir(&self, dir: &str) -> bool {
        let prefix = format!("{dir}/");
        self.dirs.contains(dir)
            || self.dirs.iter().any(|d| d.starts_with(&prefix))
            || self.files.iter().any(|f| f.starts_with(&prefix))
    }

    /// Names of the immediate child directories of `dir`, inferred from both
    /// the directory set and file paths.
    pub fn child_dirs(&self, dir: &str) -> BTreeSet<String> {
        let prefix = format!("{dir}/");
        let from_dirs = self
            .dirs
            .iter()
            .filter_map(|d| d.strip_prefix(&prefix))
            .map(|rest| rest.split('/').next().unwrap_or(rest));
        let from_files = self
            .files
            .iter()
            .filter_map(|f| f.strip_prefix(&prefix))
            .filter_map(|rest| rest.split_once('/').map(|(head, _)| head));
        from_dirs
            .chain(from_files)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Files under `prefix` (which should end with `/`).
    pub fn files_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.files.iter().filter(move |f| f.starts_with(prefix))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRead {
    pub content: String,
    pub truncated: bool,
    pub exists: bool,
}

impl ArtifactRead {
    pub fn missing() -> Self {
        Self::default()
    }
}

/// Text artifacts under the workspace root, or under an operator-supplied
/// external root when `custom_root` is set.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn list_tree(&self, workspace_id: &str, custom_root: Option<&Path>)
        -> Result<TreeListing>;

    /// A missing file is `Ok` with `exists: false`, not an error.
    async fn read(
        &self,
        workspace_id: &str,
        path: &str,
        custom_root: Option<&Path>,
    ) -> Result<ArtifactRead>;

    async fn write(
        &self,
        workspace_id: &str,
        path: &str,
        content: &str,
        custom_root: Option<&Path>,
    ) -> Result<()>;
}

// ---------------------------------------------------------------------------
// ToolLocator
// ---------------------------------------------------------------------------

/// Finds executables for the environment health probes.
pub trait ToolLocator: Send + Sync {
    fn locate(&self, tool: &str) -> Option<PathBuf>;
}

// ---------------------------------------------------------------------------
// LifecycleStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyOutcome {
    pub success: bool,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceSettings {
    #[serde(default)]
    pub mode: EnvironmentMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_root: Option<PathBuf>,
}

/// `{workspace}:{provider}`
pub fn scope_key(workspace_id: &str, provider: Provider) -> String {
    format!("{workspace_id}:{provider}")
}

/// `{workspace}:{provider}.{change}`
pub fn verify_key(workspace_id: &str, provider: Provider, change_id: &str) -> String {
    format!("{}.{change_id}", scope_key(workspace_id, provider))
}

/// Small key-value persistence for state that must survive restarts.
pub trait LifecycleStore: Send + Sync {
    fn verify_outcome(&self, key: &str) -> Result<Option<VerifyOutcome>>;
    fn record_verify(&self, key: &str, outcome: &VerifyOutcome) -> Result<()>;
    fn settings(&self, workspace_id: &str) -> Result<Option<WorkspaceSettings>>;
    fn save_settings(&self, workspace_id: &str, settings: &WorkspaceSettings) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_prefers_stderr() {
        let out = CommandOutput {
            exit_code: Some(1),
            success: false,
            stdout: "partial\n".into(),
            stderr: "  change not found\n".into(),
        };
        assert_eq!(out.message(), "change not found");
        let out = CommandOutput {
            stderr: "\n".into(),
            ..out
        };
        assert_eq!(out.message(), "partial");
    }

    #[test]
    fn tree_child_dirs_merge_files_and_dirs() {
        let tree = TreeListing {
            files: ["openspec/changes/a/proposal.md", "openspec/changes/README.md"]
                .into_iter()
                .map(String::from)
                .collect(),
            dirs: ["openspec", "openspec/changes", "openspec/changes/b", "openspec/changes/b/specs"]
                .into_iter()
                .map(String::from)
                .collect(),
        };
        let children: Vec<String> = tree.child_dirs("openspec/changes").into_iter().collect();
        assert_eq!(children, vec!["a", "b"]);
        assert!(tree.has_dir("openspec"));
        assert!(!tree.has_dir(".specify"));
    }

    #[test]
    fn keys_are_scoped() {
        assert_eq!(scope_key("ws1", Provider::Openspec), "ws1:openspec");
        assert_eq!(
            verify_key("ws1", Provider::Openspec, "add-auth"),
            "ws1:openspec.add-auth"
        );
    }
}
