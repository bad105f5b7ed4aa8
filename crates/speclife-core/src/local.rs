//! Live adapters backed by the local machine: tokio filesystem access,
//! tokio child processes, and `which` for tool detection.

use crate::error::{LifecycleError, Result};
use crate::ports::{
    ArtifactRead, ArtifactStore, CommandOptions, CommandOutput, CommandRunner, ToolLocator,
    TreeListing,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, warn};

/// Directory names never descended into when listing a workspace.
const SKIP_DIRS: &[&str] = &[".git", "node_modules", "target", ".speclife"];

// ---------------------------------------------------------------------------
// WorkspaceRoots
// ---------------------------------------------------------------------------

/// Registry of workspace id → absolute root directory.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceRoots {
    roots: HashMap<String, PathBuf>,
}

impl WorkspaceRoots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workspace(mut self, workspace_id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.roots.insert(workspace_id.into(), root.into());
        self
    }

    pub fn get(&self, workspace_id: &str) -> Result<&Path> {
        self.roots
            .get(workspace_id)
            .map(PathBuf::as_path)
            .ok_or_else(|| LifecycleError::UnknownWorkspace(workspace_id.to_string()))
    }

    fn base(&self, workspace_id: &str, custom_root: Option<&Path>) -> Result<PathBuf> {
        match custom_root {
            Some(root) => Ok(root.to_path_buf()),
            None => self.get(workspace_id).map(Path::to_path_buf),
        }
    }
}

/// Reject relative paths that could escape the root.
fn checked_relative(path: &str) -> Result<&str> {
    let escapes = path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|seg| seg == "..");
    if path.is_empty() || escapes {
        return Err(LifecycleError::InvalidValue(format!("artifact path: {path}")));
    }
    Ok(path)
}

// ---------------------------------------------------------------------------
// LocalArtifactStore
// ---------------------------------------------------------------------------

pub struct LocalArtifactStore {
    roots: WorkspaceRoots,
    max_read_bytes: usize,
}

impl LocalArtifactStore {
    pub fn new(roots: WorkspaceRoots, max_read_bytes: usize) -> Self {
        Self {
            roots,
            max_read_bytes,
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn list_tree(
        &self,
        workspace_id: &str,
        custom_root: Option<&Path>,
    ) -> Result<TreeListing> {
        let base = self.roots.base(workspace_id, custom_root)?;
        let meta = tokio::fs::metadata(&base).await?;
        if !meta.is_dir() {
            return Err(
                std::io::Error::other(format!("{} is not a directory", base.display())).into(),
            );
        }

        let mut listing = TreeListing::default();
        let mut pending: Vec<(PathBuf, String)> = vec![(base, String::new())];
        while let Some((dir, rel)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // Only the root must be readable; unreadable subdirectories are skipped.
                Err(e) if !rel.is_empty() => {
                    warn!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let child_rel = if rel.is_empty() {
                    name.clone()
                } else {
                    format!("{rel}/{name}")
                };
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if SKIP_DIRS.contains(&name.as_str()) {
                        continue;
                    }
                    listing.dirs.insert(child_rel.clone());
                    pending.push((entry.path(), child_rel));
                } else if file_type.is_file() {
                    listing.files.insert(child_rel);
                }
            }
        }
        debug!(
            workspace = %workspace_id,
            files = listing.files.len(),
            dirs = listing.dirs.len(),
            "listed workspace tree"
        );
        Ok(listing)
    }

    async fn read(
        &self,
        workspace_id: &str,
        path: &str,
        custom_root: Option<&Path>,
    ) -> Result<ArtifactRead> {
        let rel = checked_relative(path)?;
        let full = crate::paths::resolve(&self.roots.base(workspace_id, custom_root)?, rel);
        let bytes = match tokio::fs::read(&full).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ArtifactRead::missing()),
            Err(e) => return Err(e.into()),
        };
        let truncated = bytes.len() > self.max_read_bytes;
        let slice = if truncated {
            &bytes[..self.max_read_bytes]
        } else {
            &bytes[..]
        };
        Ok(ArtifactRead {
            content: String::from_utf8_lossy(slice).into_owned(),
            truncated,
            exists: true,
        })
    }

    async fn write(
        &self,
        workspace_id: &str,
        path: &str,
        content: &str,
        custom_root: Option<&Path>,
    ) -> Result<()> {
        let rel = checked_relative(path)?;
        let full = crate::paths::resolve(&self.roots.base(workspace_id, custom_root)?, rel);
        crate::io::atomic_write_async(full, content.as_bytes().to_vec()).await
    }
}

// ---------------------------------------------------------------------------
// ProcessCommandRunner
// ---------------------------------------------------------------------------

pub struct ProcessCommandRunner {
    roots: WorkspaceRoots,
}

impl ProcessCommandRunner {
    pub fn new(roots: WorkspaceRoots) -> Self {
        Self { roots }
    }
}

#[async_trait]
impl CommandRunner for ProcessCommandRunner {
    async fn run(
        &self,
        workspace_id: &str,
        argv: &[String],
        options: CommandOptions,
    ) -> Result<CommandOutput> {
        let Some((program, args)) = argv.split_first() else {
            return Err(LifecycleError::InvalidValue("empty command".to_string()));
        };
        let program_path =
            which::which(program).map_err(|_| LifecycleError::ToolNotFound(program.clone()))?;
        let cwd = self
            .roots
            .base(workspace_id, options.custom_root_override.as_deref())?;
        let command_line = argv.join(" ");
        debug!(command = %command_line, cwd = %cwd.display(), "running command");

        let child = tokio::process::Command::new(program_path)
            .args(args)
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(options.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(command = %command_line, secs = options.timeout.as_secs(), "command timed out");
                return Err(LifecycleError::CommandTimeout {
                    command: command_line,
                    secs: options.timeout.as_secs(),
                });
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// WhichLocator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct WhichLocator;

impl ToolLocator for WhichLocator {
    fn locate(&self, tool: &str) -> Option<PathBuf> {
        which::which(tool).ok()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn store(dir: &TempDir, max: usize) -> LocalArtifactStore {
        LocalArtifactStore::new(WorkspaceRoots::new().with_workspace("ws", dir.path()), max)
    }

    #[tokio::test]
    async fn list_tree_skips_vendor_dirs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("openspec/changes/a/specs/auth")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        std::fs::write(dir.path().join("openspec/changes/a/proposal.md"), "p").unwrap();
        std::fs::write(dir.path().join("node_modules/x/index.js"), "").unwrap();

        let tree = store(&dir, 1024).list_tree("ws", None).await.unwrap();
        assert!(tree.has_file("openspec/changes/a/proposal.md"));
        assert!(tree.dirs.contains("openspec/changes/a/specs/auth"));
        assert!(!tree.files.iter().any(|f| f.starts_with("node_modules")));
    }

    #[tokio::test]
    async fn list_tree_fails_for_missing_custom_root() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let err = store(&dir, 1024)
            .list_tree("ws", Some(&missing))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Io(_)));
    }

    #[tokio::test]
    async fn read_reports_missing_and_truncation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("big.md"), "0123456789").unwrap();
        let s = store(&dir, 4);

        let missing = s.read("ws", "absent.md", None).await.unwrap();
        assert!(!missing.exists);

        let big = s.read("ws", "big.md", None).await.unwrap();
        assert!(big.exists && big.truncated);
        assert_eq!(big.content, "0123");
    }

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, 1024);
        s.write("ws", "openspec/changes/a/tasks.md", "- [x] done\n", None)
            .await
            .unwrap();
        let read = s.read("ws", "openspec/changes/a/tasks.md", None).await.unwrap();
        assert_eq!(read.content, "- [x] done\n");
    }

    #[tokio::test]
    async fn paths_outside_root_are_rejected() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, 1024);
        assert!(s.read("ws", "../etc/passwd", None).await.is_err());
        assert!(s.write("ws", "/abs.md", "", None).await.is_err());
    }

    #[tokio::test]
    async fn unknown_workspace_errors() {
        let dir = TempDir::new().unwrap();
        let err = store(&dir, 1024).list_tree("other", None).await.unwrap_err();
        assert!(matches!(err, LifecycleError::UnknownWorkspace(_)));
    }

    #[tokio::test]
    async fn runner_reports_missing_tool() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessCommandRunner::new(WorkspaceRoots::new().with_workspace("ws", dir.path()));
        let err = runner
            .run(
                "ws",
                &["definitely-not-a-real-binary-9f2c".to_string()],
                CommandOptions {
                    custom_root_override: None,
                    timeout: Duration::from_secs(5),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::ToolNotFound(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runner_times_out_with_the_full_command_line() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessCommandRunner::new(WorkspaceRoots::new().with_workspace("ws", dir.path()));
        let err = runner
            .run(
                "ws",
                &["sleep".to_string(), "5".to_string()],
                CommandOptions {
                    custom_root_override: None,
                    timeout: Duration::from_millis(100),
                },
            )
            .await
            .unwrap_err();
        match err {
            LifecycleError::CommandTimeout { command, .. } => assert_eq!(command, "sleep 5"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn runner_captures_exit_status_and_output() {
        let dir = TempDir::new().unwrap();
        let runner = ProcessCommandRunner::new(WorkspaceRoots::new().with_workspace("ws", dir.path()));
        let out = runner
            .run(
                "ws",
                &["sh".to_string(), "-c".to_string(), "echo hi; exit 3".to_string()],
                CommandOptions {
                    custom_root_override: None,
                    timeout: Duration::from_secs(5),
                },
            )
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout, "hi\n");
    }
}
