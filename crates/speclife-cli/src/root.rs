use std::path::{Path, PathBuf};

/// Directories that mark a workspace root, in priority order.
const MARKERS: &[&str] = &["openspec", ".specify", ".git"];

/// Resolve the workspace root.
///
/// Priority:
/// 1. `--root` flag / `SPECLIFE_ROOT` env var (passed in as `explicit`)
/// 2. The nearest ancestor of `cwd` holding a marker, trying each marker
///    in turn over the whole ancestry
/// 3. `cwd`
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_root(&cwd).unwrap_or(cwd)
}

fn find_root(start: &Path) -> Option<PathBuf> {
    MARKERS.iter().find_map(|marker| {
        start
            .ancestors()
            .find(|dir| dir.join(marker).is_dir())
            .map(Path::to_path_buf)
    })
}
