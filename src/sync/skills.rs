//! Skill bundle reconciler
//!
//! A skill is a directory synced as one unit: when anything differs the
//! destination directory is deleted and recreated from the source, so no
//! file from an older version of the bundle can linger.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

use super::{SkillSyncResult, SyncOptions};
use crate::fs::{is_excluded_path, write_bytes_if_changed};
use crate::normalize::{
    COPYWRITING_SCRIPT, DEFAULT_STYLE, FALLBACK_STYLE, SKILL_REPLACER, patch_source,
};
use crate::output::{self, Action};
use crate::source::{SourceEntry, SourceReader};

pub const SKILLS_DIR: &str = "skills";

/// Skills never synced.
pub const EXCLUDED_SKILLS: &[&str] = &["template-skill"];

/// Skills synced only with MCP inclusion.
pub const MCP_SKILLS: &[&str] = &["mcp-builder", "mcp-management"];

/// Skills that clash with a built-in Codex skill.
pub const CONFLICT_SKILLS: &[&str] = &["skill-creator"];

/// Directory holding Codex's own skills inside `skills/`.
pub const SYSTEM_SKILLS_DIR: &str = ".system";

/// Why a bundle is left out of this run, if it is.
pub fn skip_reason(name: &str, codex_home: &Path, options: &SyncOptions) -> Option<&'static str> {
    if EXCLUDED_SKILLS.contains(&name) {
        return Some("excluded");
    }
    if !options.include_mcp && MCP_SKILLS.contains(&name) {
        return Some("mcp");
    }
    if CONFLICT_SKILLS.contains(&name) {
        return Some("conflict");
    }
    let shadowed = codex_home
        .join(SKILLS_DIR)
        .join(SYSTEM_SKILLS_DIR)
        .join(name)
        .exists();
    if !options.include_conflicts && shadowed {
        return Some("system");
    }
    None
}

pub fn sync_skills(
    source: &mut dyn SourceReader,
    codex_home: &Path,
    options: &SyncOptions,
) -> Result<SkillSyncResult> {
    let dry_run = options.dry_run;
    let skills_dst = codex_home.join(SKILLS_DIR);
    let mut result = SkillSyncResult::default();

    for (name, entries) in group_bundles(source.read_subtree(SKILLS_DIR)?) {
        if let Some(reason) = skip_reason(&name, codex_home, options) {
            result.skipped += 1;
            output::skip(reason, &name);
            continue;
        }

        let entries = prepare_bundle(entries)?;
        let dst = skills_dst.join(&name);
        let exists = dst.exists() || dst.is_symlink();
        if exists && bundle_matches(&dst, &name, &entries)? {
            debug!(skill = %name, "skill unchanged");
            continue;
        }

        if exists {
            result.updated += 1;
            output::action(Action::Update, &name);
        } else {
            result.added += 1;
            output::action(Action::Add, &name);
        }
        if dry_run {
            continue;
        }

        if dst.is_symlink() || dst.is_file() {
            fs::remove_file(&dst)
        } else if exists {
            fs::remove_dir_all(&dst)
        } else {
            Ok(())
        }
        .with_context(|| format!("Failed to remove old skill: {}", dst.display()))?;

        for entry in &entries {
            let target = codex_home.join(&entry.path);
            write_bytes_if_changed(&target, &entry.data, entry.mode, false)?;
        }
    }

    if !dry_run {
        fs::create_dir_all(&skills_dst)
            .with_context(|| format!("Failed to create {}", skills_dst.display()))?;
    }
    result.total_skills = count_skill_descriptors(&skills_dst);
    Ok(result)
}

/// Group `skills/<name>/...` entries by bundle name. Loose files directly
/// under `skills/` and hidden directories are not bundles.
fn group_bundles(entries: Vec<SourceEntry>) -> BTreeMap<String, Vec<SourceEntry>> {
    let mut bundles: BTreeMap<String, Vec<SourceEntry>> = BTreeMap::new();
    let prefix = format!("{SKILLS_DIR}/");
    for entry in entries {
        let Some(rest) = entry.path.strip_prefix(&prefix) else {
            continue;
        };
        let Some((name, _)) = rest.split_once('/') else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        bundles.entry(name.to_string()).or_default().push(entry);
    }
    bundles
}

/// Apply the rewrites the normalize pass makes to a synced bundle, so an
/// unchanged bundle compares equal to its normalized destination.
fn prepare_bundle(entries: Vec<SourceEntry>) -> Result<Vec<SourceEntry>> {
    let mut prepared = Vec::with_capacity(entries.len());
    for mut entry in entries {
        let rewritten = match std::str::from_utf8(&entry.data) {
            Ok(text) if entry.path == COPYWRITING_SCRIPT => patch_source(text)?,
            Ok(text) if entry.path.ends_with("/SKILL.md") => match SKILL_REPLACER.apply(text) {
                Cow::Owned(out) => Some(out),
                Cow::Borrowed(_) => None,
            },
            _ => None,
        };
        if let Some(out) = rewritten {
            entry.data = out.into_bytes();
        }
        prepared.push(entry);
    }

    let has_default = prepared.iter().any(|e| e.path == DEFAULT_STYLE);
    let seeded = prepared
        .iter()
        .find(|e| e.path == FALLBACK_STYLE)
        .filter(|_| !has_default)
        .map(|fallback| SourceEntry {
            path: DEFAULT_STYLE.to_string(),
            ..fallback.clone()
        });
    prepared.extend(seeded);
    Ok(prepared)
}

/// True when the destination bundle holds exactly the source files with the
/// same bytes. Excluded paths (installed dependencies) are ignored.
fn bundle_matches(dst: &Path, name: &str, entries: &[SourceEntry]) -> Result<bool> {
    if !dst.is_dir() {
        return Ok(false);
    }
    let mut existing = BTreeSet::new();
    for entry in WalkDir::new(dst).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(dst) else {
            continue;
        };
        let rel = format!(
            "{SKILLS_DIR}/{name}/{}",
            rel.to_string_lossy().replace('\\', "/")
        );
        if !is_excluded_path(&rel) {
            existing.insert(rel);
        }
    }
    if existing.len() != entries.len() {
        return Ok(false);
    }
    for entry in entries {
        if !existing.contains(&entry.path) {
            return Ok(false);
        }
        let target = dst.join(&entry.path[SKILLS_DIR.len() + name.len() + 2..]);
        let current =
            fs::read(&target).with_context(|| format!("Failed to read {}", target.display()))?;
        if current != entry.data {
            return Ok(false);
        }
    }
    Ok(true)
}

fn count_skill_descriptors(skills_dst: &Path) -> usize {
    if !skills_dst.is_dir() {
        return 0;
    }
    WalkDir::new(skills_dst)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == "SKILL.md")
        .count()
}
