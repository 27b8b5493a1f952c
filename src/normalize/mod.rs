//! Path and content normalization
//!
//! Rewrites Claude-layout references in synced text files, applies the
//! copywriting script patch, seeds the default writing style and keeps the
//! generated command map current.

mod copywriting;
mod rules;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

pub use copywriting::{
    COPYWRITING_SCRIPT, DEFAULT_STYLE, FALLBACK_STYLE, ensure_default_style,
    patch_copywriting_script, patch_source,
};
pub use rules::{AGENT_REPLACER, PROMPT_REPLACER, Replacer, SKILL_REPLACER};

use crate::fs::{EXCLUDED_COMPONENTS, is_backup_file, write_text_if_changed};
use crate::output::{self, Action};
use crate::sync::SyncOptions;
use crate::sync::skills::{MCP_SKILLS, SKILLS_DIR};

/// Generated cross-reference of legacy commands, inside `commands/`.
pub const COMMAND_MAP_FILE: &str = "codex-command-map.md";

const COMMAND_MAP: &str = include_str!("../../templates/command-map.md");

/// Asset directories whose markdown gets the skill path rules.
const NORMALIZED_ASSET_DIRS: &[&str] = &["rules", "output-styles"];

/// Replacer applied to a flat asset before it is written, if any.
pub fn asset_replacer(rel: &str) -> Option<&'static Replacer> {
    let normalized = rel.ends_with(".md")
        && NORMALIZED_ASSET_DIRS
            .iter()
            .any(|dir| rel.strip_prefix(dir).is_some_and(|rest| rest.starts_with('/')));
    normalized.then(|| &*SKILL_REPLACER)
}

/// Normalize synced files under `codex_home`. Returns how many changed.
pub fn normalize_files(codex_home: &Path, options: &SyncOptions) -> Result<usize> {
    let dry_run = options.dry_run;
    let mut changed = 0;

    for path in skill_descriptors(codex_home, options.include_mcp) {
        if rewrite_with(&path, &SKILL_REPLACER, dry_run)? {
            changed += 1;
            output::action(Action::Normalize, display_rel(codex_home, &path));
        }
    }

    for dir in NORMALIZED_ASSET_DIRS {
        for path in markdown_files(&codex_home.join(dir)) {
            if rewrite_with(&path, &SKILL_REPLACER, dry_run)? {
                changed += 1;
                output::action(Action::Normalize, display_rel(codex_home, &path));
            }
        }
    }

    if patch_copywriting_script(codex_home, dry_run)? {
        changed += 1;
        output::action(Action::Normalize, COPYWRITING_SCRIPT);
    }

    if ensure_default_style(codex_home, dry_run)? {
        changed += 1;
        output::action(Action::Add, DEFAULT_STYLE);
    }

    let command_map = codex_home.join("commands").join(COMMAND_MAP_FILE);
    if write_text_if_changed(&command_map, COMMAND_MAP, false, dry_run)? {
        changed += 1;
        output::action(Action::Upsert, format!("commands/{COMMAND_MAP_FILE}"));
    }

    Ok(changed)
}

/// Rewrite a UTF-8 file in place with `replacer`. Returns whether it changed.
pub fn rewrite_with(path: &Path, replacer: &Replacer, dry_run: bool) -> Result<bool> {
    let raw = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let Ok(text) = std::str::from_utf8(&raw) else {
        debug!(path = %path.display(), "skipping non-UTF-8 file");
        return Ok(false);
    };
    let out = replacer.apply(text);
    if out == text {
        return Ok(false);
    }
    if !dry_run {
        fs::write(path, out.as_bytes())
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(true)
}

fn skill_descriptors(codex_home: &Path, include_mcp: bool) -> Vec<std::path::PathBuf> {
    let skills_dir = codex_home.join(SKILLS_DIR);
    if !skills_dir.is_dir() {
        return Vec::new();
    }
    let mut paths: Vec<_> = WalkDir::new(&skills_dir)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            let name: &str = &name;
            let skipped_dir = e.depth() == 1 && !include_mcp && MCP_SKILLS.contains(&name);
            !skipped_dir && !EXCLUDED_COMPONENTS.contains(&name)
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == "SKILL.md")
        .map(|e| e.into_path())
        .collect();
    paths.sort();
    paths
}

fn markdown_files(dir: &Path) -> Vec<std::path::PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    let mut paths: Vec<_> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "md") && !is_backup_file(p))
        .collect();
    paths.sort();
    paths
}

fn display_rel(codex_home: &Path, path: &Path) -> String {
    path.strip_prefix(codex_home)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}
