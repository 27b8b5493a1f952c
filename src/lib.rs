//! ckc-sync - ClaudeKit to Codex synchronization
//!
//! Copies skills, agents, rules, commands and scripts from a Claude
//! configuration directory (or a ClaudeKit release archive) into the layout
//! the Codex CLI expects. Paths inside synced text are rewritten, agent
//! documents become Codex agent configs, and `config.toml` is merged.
//!
//! Every managed write is recorded in a registry of content hashes, so a
//! file the user edited after the last sync is backed up and left alone
//! instead of being overwritten.

pub mod agents;
pub mod bootstrap;
pub mod bridge;
pub mod clean;
pub mod codex_config;
pub mod config;
pub mod error;
pub mod fs;
pub mod hash;
pub mod manifest;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod registry;
pub mod source;
pub mod sync;
pub mod verify;

pub use config::{RunConfig, Scope, SourceSpec};
pub use error::SyncError;
pub use pipeline::{RunSummary, run};
pub use registry::Registry;
pub use sync::SyncOptions;
