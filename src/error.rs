//! User-facing sync errors
//!
//! These are the conditions under which the sync refuses to proceed. They
//! travel through `anyhow` and are recovered in `main` to pick the exit code.

use std::path::PathBuf;
use thiserror::Error;

/// Exit status used when a `SyncError` aborts the run.
pub const SYNC_ERROR_EXIT_CODE: u8 = 2;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Claude Code not found at {0}. Use --source to specify.")]
    SourceNotFound(PathBuf),

    #[error("Zip not found: {0}")]
    ArchiveNotFound(PathBuf),

    #[error("No ClaudeKit zip found. Expected /tmp/claudekit-*/*.zip")]
    NoArchiveFound,

    #[error("Unsafe zip entry path: {0}")]
    UnsafeArchivePath(String),

    #[error("Unsafe codex_home: {0}. Refusing --fresh to prevent destructive deletion.")]
    UnsafeDestination(PathBuf),

    #[error("zip sync requires --force for write mode")]
    ArchiveWriteRequiresForce,

    #[error("{0} not found")]
    MissingInterpreter(String),

    #[error("{script} patch failed: upstream pattern changed ({pattern})")]
    PatchTargetChanged {
        script: String,
        pattern: &'static str,
    },

    #[error("Dependency bootstrap reported failures (python: {python}, node: {node})")]
    BootstrapFailed { python: usize, node: usize },
}
