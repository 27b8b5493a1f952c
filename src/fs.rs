//! File system utilities.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Path components that are never read from a source tree.
pub const EXCLUDED_COMPONENTS: &[&str] = &[
    ".system",
    "node_modules",
    ".venv",
    "dist",
    "build",
    "__pycache__",
    ".pytest_cache",
];

/// Infix that marks a timestamped backup copy.
pub const BACKUP_INFIX: &str = ".ck-backup-";

/// What a write-if-changed call did (or would do in dry-run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Unchanged,
    Added,
    Updated,
}

impl WriteOutcome {
    pub fn changed(self) -> bool {
        self != WriteOutcome::Unchanged
    }
}

/// Write `data` to `path` only when the existing bytes differ.
///
/// Permission bits in `mode` are applied after a write and re-applied to an
/// unchanged file whose bits drifted. Nothing touches the disk in dry-run.
pub fn write_bytes_if_changed(
    path: &Path,
    data: &[u8],
    mode: Option<u32>,
    dry_run: bool,
) -> Result<WriteOutcome> {
    let existing = match fs::read(path) {
        Ok(bytes) => Some(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };

    if existing.as_deref() == Some(data) {
        if let Some(mode) = mode
            && !dry_run
        {
            set_mode(path, mode)?;
        }
        return Ok(WriteOutcome::Unchanged);
    }

    let outcome = if existing.is_some() {
        WriteOutcome::Updated
    } else {
        WriteOutcome::Added
    };
    if dry_run {
        return Ok(outcome);
    }

    ensure_parent(path)?;
    fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    if let Some(mode) = mode {
        set_mode(path, mode)?;
    }
    Ok(outcome)
}

/// Text flavour of [`write_bytes_if_changed`]; executables get `0o755`.
pub fn write_text_if_changed(
    path: &Path,
    text: &str,
    executable: bool,
    dry_run: bool,
) -> Result<bool> {
    let mode = executable.then_some(0o755);
    Ok(write_bytes_if_changed(path, text.as_bytes(), mode, dry_run)?.changed())
}

/// Replace `path` with `data` through a synced temp file in the same directory.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("Path has no parent directory: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let mut temp_file = NamedTempFile::new_in(parent)
        .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
    temp_file.write_all(data)?;
    temp_file.as_file().sync_all()?;
    temp_file
        .persist(path)
        .with_context(|| format!("Failed to persist {}", path.display()))?;
    Ok(())
}

pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let current = fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .permissions()
        .mode()
        & 0o777;
    if current != mode & 0o777 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
            .with_context(|| format!("Failed to chmod {}", path.display()))?;
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// Permission bits worth carrying over from a live source file: only
/// executables are propagated so plain files keep the umask default.
#[cfg(unix)]
pub fn executable_mode(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;

    let mode = metadata.permissions().mode() & 0o777;
    (mode & 0o111 != 0).then_some(mode)
}

#[cfg(not(unix))]
pub fn executable_mode(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

/// Where a backup of `path` taken now would be written.
pub fn backup_path(path: &Path) -> PathBuf {
    let ts = Local::now().format("%Y%m%d-%H%M%S");
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{stem}{BACKUP_INFIX}{ts}.{}", ext.to_string_lossy()),
        None => format!("{stem}{BACKUP_INFIX}{ts}"),
    };
    path.with_file_name(name)
}

/// Copy `path` next to itself under a timestamped backup name.
pub fn create_backup(path: &Path) -> Result<PathBuf> {
    let backup = backup_path(path);
    fs::copy(path, &backup).with_context(|| {
        format!(
            "Failed to back up {} to {}",
            path.display(),
            backup.display()
        )
    })?;
    Ok(backup)
}

pub fn is_backup_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().contains(BACKUP_INFIX))
}

/// True when any component of a relative path is on the exclusion list,
/// or the file is compiled Python.
pub fn is_excluded_path(rel: &str) -> bool {
    rel.ends_with(".pyc")
        || rel
            .split('/')
            .any(|part| EXCLUDED_COMPONENTS.contains(&part))
}

/// Reject absolute paths and parent traversal; normalize separators.
pub fn safe_relative_path(rel: &str) -> Option<String> {
    let normalized = rel.replace('\\', "/");
    if normalized.is_empty() {
        return None;
    }
    let path = Path::new(&normalized);
    let safe = path
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    (safe && !normalized.starts_with('/')).then_some(normalized)
}

/// Remove empty directories below (and including) `root`, deepest first.
/// Failures are ignored: a non-empty or protected directory simply stays.
pub fn prune_empty_dirs(root: &Path) {
    if !root.is_dir() {
        return;
    }
    for entry in WalkDir::new(root)
        .contents_first(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_dir() {
            let _ = fs::remove_dir(entry.path());
        }
    }
}

/// Number of regular files below `dir` (the entry itself if it is a file).
pub fn count_files(dir: &Path) -> usize {
    WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .count()
}
