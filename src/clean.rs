//! Destructive pre-clean for `--fresh` runs.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::SyncError;
use crate::fs::count_files;
use crate::manifest::ASSET_MANIFEST;
use crate::registry::REGISTRY_FILE;
use crate::sync::assets::{ASSET_DIRS, ASSET_FILES, HOOKS_DIR};
use crate::sync::skills::SKILLS_DIR;

/// Asset root used by releases that nested everything under one directory.
const LEGACY_ASSET_DIR: &str = "claudekit";

const VENV_DIR: &str = ".venv";

/// Remove every managed location under `codex_home`. Returns the number of
/// files removed (or that would be, in a dry run).
pub fn clean_target(codex_home: &Path, dry_run: bool) -> Result<usize> {
    clean_target_in(codex_home, dirs::home_dir().as_deref(), dry_run)
}

/// [`clean_target`] against an explicit home directory.
pub fn clean_target_in(codex_home: &Path, home: Option<&Path>, dry_run: bool) -> Result<usize> {
    ensure_safe_destination(codex_home, home)?;
    let mut removed = 0;

    let dirs = ASSET_DIRS.iter().copied().chain([HOOKS_DIR, LEGACY_ASSET_DIR]);
    for dir in dirs {
        let target = codex_home.join(dir);
        if target.exists() {
            removed += remove_entry(&target, dry_run)?;
        }
    }

    let skills = codex_home.join(SKILLS_DIR);
    if skills.is_dir() {
        let entries = fs::read_dir(&skills)
            .with_context(|| format!("Failed to read {}", skills.display()))?;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if entry.file_name() == VENV_DIR && path.is_symlink() {
                continue;
            }
            removed += remove_entry(&path, dry_run)?;
        }
    }

    let files = [REGISTRY_FILE, ASSET_MANIFEST].into_iter().chain(ASSET_FILES.iter().copied());
    for name in files {
        let target = codex_home.join(name);
        if target.is_file() {
            removed += remove_entry(&target, dry_run)?;
        }
    }

    Ok(removed)
}

/// Refuse to clean the filesystem root or the user's home directory.
pub fn ensure_safe_destination(codex_home: &Path, home: Option<&Path>) -> Result<(), SyncError> {
    let resolved = canonical(codex_home);
    let is_root = resolved.parent().is_none();
    let is_home = home.is_some_and(|home| canonical(home) == resolved);
    if is_root || is_home {
        return Err(SyncError::UnsafeDestination(resolved));
    }
    Ok(())
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize()
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

fn remove_entry(path: &Path, dry_run: bool) -> Result<usize> {
    let is_dir = !path.is_symlink() && path.is_dir();
    let count = if is_dir { count_files(path) } else { 1 };
    debug!(path = %path.display(), files = count, dry_run, "clean");
    if dry_run {
        return Ok(count);
    }
    if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .with_context(|| format!("Failed to remove {}", path.display()))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn populated() -> TempDir {
        let home = TempDir::new().unwrap();
        let root = home.path();
        write(&root.join("agents/planner.toml"), "x");
        write(&root.join("rules/a.md"), "x");
        write(&root.join("rules/nested/b.md"), "x");
        write(&root.join("claudekit/legacy.md"), "x");
        write(&root.join("skills/plan/SKILL.md"), "x");
        write(&root.join("skills/.venv/bin/python3"), "x");
        write(&root.join(REGISTRY_FILE), "{}");
        write(&root.join(".ck.json"), "{}");
        write(&root.join("config.toml"), "model = \"o3\"");
        write(&root.join("prompts/ask.md"), "x");
        home
    }

    #[test]
    fn test_clean_removes_managed_state() {
        let home = populated();
        let removed = clean_target_in(home.path(), None, false).unwrap();
        assert_eq!(removed, 8);

        let root = home.path();
        assert!(!root.join("agents").exists());
        assert!(!root.join("rules").exists());
        assert!(!root.join("claudekit").exists());
        assert!(!root.join("skills/plan").exists());
        assert!(!root.join("skills/.venv").exists());
        assert!(!root.join(REGISTRY_FILE).exists());
        assert!(root.join("config.toml").exists());
        assert!(root.join("prompts/ask.md").exists());
    }

    #[test]
    fn test_dry_run_counts_without_deleting() {
        let home = populated();
        let removed = clean_target_in(home.path(), None, true).unwrap();
        assert_eq!(removed, 8);
        assert!(home.path().join("rules/nested/b.md").exists());
        assert!(home.path().join(REGISTRY_FILE).exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_venv_symlink_kept() {
        let home = TempDir::new().unwrap();
        let shared = TempDir::new().unwrap();
        fs::create_dir_all(home.path().join(SKILLS_DIR)).unwrap();
        std::os::unix::fs::symlink(shared.path(), home.path().join("skills/.venv")).unwrap();

        clean_target_in(home.path(), None, false).unwrap();
        assert!(home.path().join("skills/.venv").is_symlink());
    }

    #[test]
    fn test_refuses_home_directory() {
        let home = populated();
        let err = clean_target_in(home.path(), Some(home.path()), false).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::UnsafeDestination(_))
        ));
        assert!(home.path().join("agents/planner.toml").exists());
        assert!(home.path().join(REGISTRY_FILE).exists());
    }

    #[test]
    fn test_refuses_filesystem_root() {
        let root = Path::new("/");
        assert!(matches!(
            ensure_safe_destination(root, None),
            Err(SyncError::UnsafeDestination(_))
        ));
    }

    #[test]
    fn test_nested_destination_is_safe() {
        let home = TempDir::new().unwrap();
        let dest = home.path().join(".codex");
        assert!(ensure_safe_destination(&dest, Some(home.path())).is_ok());
    }
}
