//! Reconcilers
//!
//! Each submodule synchronizes one category of files from a source into
//! the destination root and reports what it did (or would do in dry-run).

pub mod assets;
pub mod prompts;
pub mod skills;

use serde::Serialize;

pub use assets::sync_assets;
pub use prompts::export_prompts;
pub use skills::sync_skills;

/// Options shared by the reconcilers.
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Show what would be done without making changes
    pub dry_run: bool,
    /// Sync MCP skills and the MCP prompt
    pub include_mcp: bool,
    /// Sync the `hooks/` subtree as an asset category
    pub include_hooks: bool,
    /// Sync skills even when a `.system` copy of the same name exists
    pub include_conflicts: bool,
    /// Consult the registry for user edits before overwriting
    pub track_edits: bool,
}

/// Result of a flat-asset sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncResult {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
}

/// Result of a skill bundle sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SkillSyncResult {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub total_skills: usize,
}

/// Result of the prompt export
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PromptExportResult {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    pub removed: usize,
    pub collisions: usize,
    pub total_generated: usize,
}
