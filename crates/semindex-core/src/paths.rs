//! Project-scope resolution and path comparisons.
use std::path::{Component, Path, PathBuf};

use crate::error::{Error, Result};

/// Fewest normal path segments a scope may have before a destructive
/// project-level delete is allowed (`/home/user` is refused, `/home/user/app` is not).
pub const MIN_SCOPE_SEGMENTS: usize = 3;

/// Absolute, lexically normalised form of `path` (relative paths are taken
/// against the current directory). Does not touch the filesystem.
pub fn resolve_scope(path: &Path) -> Result<PathBuf> {
    let abs = if path.is_absolute() { path.to_path_buf() } else { std::env::current_dir()?.join(path) };
    Ok(normalize(&abs))
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `path` and refuse it if it is the filesystem root or too shallow
/// to plausibly be a single project.
pub fn guard_destructive_scope(path: &Path) -> Result<PathBuf> {
    let resolved = resolve_scope(path)?;
    let segments = resolved.components().filter(|c| matches!(c, Component::Normal(_))).count();
    if resolved.parent().is_none() || segments < MIN_SCOPE_SEGMENTS {
        return Err(Error::IntegrityGuard(format!(
            "'{}' has {} path segment(s); at least {} required",
            resolved.display(),
            segments,
            MIN_SCOPE_SEGMENTS
        )));
    }
    Ok(resolved)
}

/// String form used in the `project_path` column.
pub fn scope_key(scope: &Path) -> String { scope.to_string_lossy().to_string() }

/// Display name of a project, derived from its last path segment.
pub fn project_name(scope: &Path) -> String {
    scope
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "root".to_string())
}

/// `file` relative to `project`, with `/` separators. Paths outside the
/// project are returned unchanged.
pub fn relative_path(project: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(project).unwrap_or(file);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Shared leading directory segments over the longer directory depth, in [0, 1].
pub fn path_similarity(a: &str, b: &str) -> f32 {
    let dirs = |p: &str| -> Vec<String> {
        let parts: Vec<&str> = p.split(['/', '\\']).filter(|s| !s.is_empty() && *s != ".").collect();
        parts[..parts.len().saturating_sub(1)].iter().map(|s| s.to_string()).collect()
    };
    let (da, db) = (dirs(a), dirs(b));
    let longest = da.len().max(db.len());
    if longest == 0 {
        return if a.is_empty() || b.is_empty() { 0.0 } else { 1.0 };
    }
    let shared = da.iter().zip(db.iter()).take_while(|(x, y)| x == y).count();
    shared as f32 / longest as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_rejects_root_and_shallow_paths() {
        assert!(matches!(guard_destructive_scope(Path::new("/")), Err(Error::IntegrityGuard(_))));
        assert!(matches!(guard_destructive_scope(Path::new("/home/user")), Err(Error::IntegrityGuard(_))));
        let ok = guard_destructive_scope(Path::new("/home/user/app")).expect("deep enough");
        assert_eq!(ok, PathBuf::from("/home/user/app"));
    }

    #[test]
    fn guard_normalises_before_counting() {
        assert!(guard_destructive_scope(Path::new("/home/user/app/..")).is_err());
    }

    #[test]
    fn relative_path_uses_forward_slashes() {
        let rel = relative_path(Path::new("/p/app"), Path::new("/p/app/src/lib.rs"));
        assert_eq!(rel, "src/lib.rs");
    }

    #[test]
    fn path_similarity_counts_shared_directories() {
        assert_eq!(path_similarity("src/auth/login.ts", "src/auth/session.ts"), 1.0);
        assert_eq!(path_similarity("src/auth/login.ts", "src/db/pool.ts"), 0.5);
        assert_eq!(path_similarity("docs/guide.md", "src/db/pool.ts"), 0.0);
    }
}
