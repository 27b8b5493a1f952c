//! Run configuration
//!
//! Everything one sync run needs to know, resolved up front from the
//! command line and environment and then passed around by reference.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::source::{DEFAULT_SOURCE_DIR, SourceKind};
use crate::sync::SyncOptions;
use crate::sync::skills::SKILLS_DIR;

/// Destination directory name, under the home or project directory.
pub const DESTINATION_DIR: &str = ".codex";

/// Environment variable overriding the global destination.
pub const CODEX_HOME_ENV: &str = "CODEX_HOME";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// `$CODEX_HOME` or `~/.codex`
    Global,
    /// `<cwd>/.codex`
    Project,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Global => write!(f, "global"),
            Scope::Project => write!(f, "project"),
        }
    }
}

/// Where files are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// A live directory; `None` means auto-detect `~/.claude`.
    Live(Option<PathBuf>),
    /// A ClaudeKit archive; `None` means the newest one in the temp dirs.
    Zip(Option<PathBuf>),
}

impl SourceSpec {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSpec::Live(_) => SourceKind::Live,
            SourceSpec::Zip(_) => SourceKind::Zip,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub scope: Scope,
    pub codex_home: PathBuf,
    /// Directory receiving the generated `AGENTS.md`.
    pub workspace: PathBuf,
    pub source: SourceSpec,
    pub fresh: bool,
    pub force: bool,
    pub include_mcp: bool,
    pub include_hooks: bool,
    pub bootstrap: bool,
    pub verify: bool,
    pub dry_run: bool,
}

impl RunConfig {
    /// Defaults for a project-scope live sync rooted at `workspace`.
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            scope: Scope::Project,
            codex_home: workspace.join(DESTINATION_DIR),
            workspace,
            source: SourceSpec::Live(None),
            fresh: false,
            force: false,
            include_mcp: false,
            include_hooks: true,
            bootstrap: true,
            verify: true,
            dry_run: false,
        }
    }

    /// Edit tracking applies to live syncs unless `--force` is given.
    pub fn track_edits(&self) -> bool {
        self.source.kind() == SourceKind::Live && !self.force
    }

    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            dry_run: self.dry_run,
            include_mcp: self.include_mcp,
            include_hooks: self.include_hooks,
            include_conflicts: false,
            track_edits: self.track_edits(),
        }
    }
}

/// Resolve the destination root for `scope`.
pub fn resolve_codex_home(scope: Scope, codex_home: Option<&Path>, cwd: &Path) -> Result<PathBuf> {
    let path = match scope {
        Scope::Project => cwd.join(DESTINATION_DIR),
        Scope::Global => match codex_home {
            Some(path) => expand_tilde(path)?,
            None => home_dir()?.join(DESTINATION_DIR),
        },
    };
    std::path::absolute(&path)
        .with_context(|| format!("Failed to resolve destination {}", path.display()))
}

/// The venv a live source would share, `<source>/skills/.venv`; archives
/// fall back to the default source under the home directory.
pub fn source_venv(source_root: Option<&Path>) -> Option<PathBuf> {
    let root = match source_root {
        Some(root) => root.to_path_buf(),
        None => dirs::home_dir()?.join(DEFAULT_SOURCE_DIR),
    };
    Some(root.join(SKILLS_DIR).join(crate::bootstrap::VENV_DIR))
}

fn expand_tilde(path: &Path) -> Result<PathBuf> {
    match path.strip_prefix("~") {
        Ok(rest) => Ok(home_dir()?.join(rest)),
        Err(_) => Ok(path.to_path_buf()),
    }
}

fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("Could not determine the home directory")
}
