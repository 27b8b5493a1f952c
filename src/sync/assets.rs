//! Flat-asset reconciler
//!
//! Agents, commands, output styles, rules, scripts and a couple of root
//! files are tracked per file. The asset manifest records what the last run
//! managed so that files dropped from the source are removed again.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::{SyncOptions, SyncResult};
use crate::agents::converted_config_path;
use crate::fs::{
    WriteOutcome, backup_path, create_backup, prune_empty_dirs, safe_relative_path,
    write_bytes_if_changed,
};
use crate::hash::{hash_bytes, hash_file};
use crate::manifest::{ASSET_MANIFEST, load_manifest, save_manifest};
use crate::normalize;
use crate::output::{self, Action};
use crate::registry::Registry;
use crate::source::{SourceEntry, SourceReader};

/// Source directories synced as flat assets.
pub const ASSET_DIRS: &[&str] = &["agents", "commands", "output-styles", "rules", "scripts"];

/// Individual root files synced as flat assets.
pub const ASSET_FILES: &[&str] = &[".env.example", ".ck.json"];

pub const HOOKS_DIR: &str = "hooks";

/// Sync flat assets from `source` into `codex_home`.
pub fn sync_assets(
    source: &mut dyn SourceReader,
    codex_home: &Path,
    registry: &mut Registry,
    options: &SyncOptions,
) -> Result<SyncResult> {
    let dry_run = options.dry_run;
    let mut result = SyncResult::default();

    let selected = collect_assets(source, options.include_hooks)?;
    let manifest_path = codex_home.join(ASSET_MANIFEST);
    let old_manifest = load_manifest(&manifest_path)?;
    let new_manifest: BTreeSet<String> = selected.iter().map(|e| e.path.clone()).collect();

    for rel in old_manifest.difference(&new_manifest) {
        let Some(rel) = safe_relative_path(rel) else {
            warn!(path = %rel, "ignoring unsafe manifest entry");
            continue;
        };
        let rel = match converted_config_path(&rel) {
            Some(config_rel)
                if !codex_home.join(&rel).is_file() && registry.get(&config_rel).is_some() =>
            {
                if !dry_run {
                    registry.remove(&rel);
                }
                config_rel
            }
            _ => rel,
        };
        let target = codex_home.join(&rel);
        if !target.is_file() {
            if !dry_run {
                registry.remove(&rel);
            }
            continue;
        }

        if options.track_edits && registry.is_user_edited(&rel, &target)? {
            backup_before_change(&target, &rel, dry_run)?;
        }
        result.removed += 1;
        output::action(Action::Remove, &rel);
        if !dry_run {
            fs::remove_file(&target)
                .with_context(|| format!("Failed to remove {}", target.display()))?;
            registry.remove(&rel);
        }
    }

    for entry in &selected {
        let target = codex_home.join(&entry.path);
        let data = transform_asset(&entry.path, &entry.data);

        if !target.exists() && is_converted_unchanged(&entry.path, &data, codex_home, registry) {
            debug!(path = %entry.path, "already converted, source unchanged");
            continue;
        }

        if options.track_edits && target.is_file() {
            if registry.get(&entry.path).is_some() {
                if registry.is_user_edited(&entry.path, &target)? {
                    if !dry_run {
                        let backup = create_backup(&target)?;
                        debug!(path = %entry.path, backup = %backup.display(), "backed up user edit");
                    }
                    result.skipped += 1;
                    output::skip("user-edit", &entry.path);
                    continue;
                }
            } else if hash_file(&target)? != hash_bytes(&data) {
                backup_before_change(&target, &format!("{} (untracked)", entry.path), dry_run)?;
            }
        }

        match write_bytes_if_changed(&target, &data, entry.mode, dry_run)? {
            WriteOutcome::Added => {
                result.added += 1;
                output::action(Action::Add, &entry.path);
            }
            WriteOutcome::Updated => {
                result.updated += 1;
                output::action(Action::Update, &entry.path);
            }
            WriteOutcome::Unchanged => {}
        }

        if !dry_run {
            registry.record(&entry.path, hash_bytes(&entry.data), hash_bytes(&data));
        }
    }

    save_manifest(&manifest_path, &new_manifest, dry_run)?;

    if !dry_run {
        for dir in ASSET_DIRS.iter().chain(std::iter::once(&HOOKS_DIR)) {
            prune_empty_dirs(&codex_home.join(dir));
        }
    }

    Ok(result)
}

fn collect_assets(source: &mut dyn SourceReader, include_hooks: bool) -> Result<Vec<SourceEntry>> {
    let mut entries = Vec::new();
    let dirs = ASSET_DIRS
        .iter()
        .copied()
        .chain(include_hooks.then_some(HOOKS_DIR));
    for dir in dirs {
        entries.extend(source.read_subtree(dir)?);
    }
    for file in ASSET_FILES {
        if let Some(entry) = source.read_file(file)? {
            entries.push(entry);
        }
    }
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

/// Apply path rules to text assets so the written bytes are already final.
fn transform_asset<'a>(rel: &str, data: &'a [u8]) -> Cow<'a, [u8]> {
    let Some(replacer) = normalize::asset_replacer(rel) else {
        return Cow::Borrowed(data);
    };
    match std::str::from_utf8(data) {
        Ok(text) => match replacer.apply(text) {
            Cow::Owned(out) => Cow::Owned(out.into_bytes()),
            Cow::Borrowed(_) => Cow::Borrowed(data),
        },
        Err(_) => Cow::Borrowed(data),
    }
}

/// An agent document whose converted config is on disk and was produced
/// from these exact bytes.
fn is_converted_unchanged(rel: &str, data: &[u8], codex_home: &Path, registry: &Registry) -> bool {
    let Some(config_rel) = converted_config_path(rel) else {
        return false;
    };
    codex_home.join(&config_rel).is_file()
        && registry
            .get(&config_rel)
            .is_some_and(|entry| entry.source_hash == hash_bytes(data))
}

/// Back up `target` (or name the backup it would get) and log it. Returns
/// the logged detail.
fn backup_before_change(target: &Path, label: &str, dry_run: bool) -> Result<String> {
    let backup = if dry_run {
        backup_path(target)
    } else {
        create_backup(target)?
    };
    let name = backup
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let detail = format!("{label} -> {name}");
    output::action(Action::Backup, &detail);
    Ok(detail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::convert_agents;
    use crate::fs::is_backup_file;
    use crate::source::DirSource;
    use tempfile::TempDir;

    fn live_options() -> SyncOptions {
        SyncOptions {
            include_hooks: true,
            track_edits: true,
            ..Default::default()
        }
    }

    fn write(path: &Path, content: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn backups_in(dir: &Path) -> Vec<String> {
        fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_backup_file(&e.path()))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect()
    }

    // ==========================================================================
    // Change detection
    // ==========================================================================

    #[test]
    fn test_first_sync_adds_then_second_is_noop() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("rules/test.md"), "# Test rule\n");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        let first = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        assert_eq!(first.added, 1);
        assert_eq!(
            fs::read(dst.path().join("rules/test.md")).unwrap(),
            b"# Test rule\n"
        );

        let second = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        assert_eq!(second.added, 0);
        assert_eq!(second.updated, 0);
    }

    #[test]
    fn test_changed_source_counts_update() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("scripts/tool.py"), "print(1)\n");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        write(&src.path().join("scripts/tool.py"), "print(2)\n");
        let result = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        assert_eq!(result.updated, 1);
        assert_eq!(
            fs::read_to_string(dst.path().join("scripts/tool.py")).unwrap(),
            "print(2)\n"
        );
    }

    #[test]
    fn test_root_files_and_manifest() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join(".ck.json"), "{}");
        write(&src.path().join("output-styles/plain.md"), "plain");
        write(&src.path().join("CLAUDE.md"), "not an asset");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        let result = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        assert_eq!(result.added, 2);
        assert!(!dst.path().join("CLAUDE.md").exists());
        let manifest = fs::read_to_string(dst.path().join(ASSET_MANIFEST)).unwrap();
        assert_eq!(manifest, ".ck.json\noutput-styles/plain.md\n");
        assert!(registry.get(".ck.json").is_some());
    }

    // ==========================================================================
    // Removal
    // ==========================================================================

    #[test]
    fn test_removed_source_file_is_deleted() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("rules/keep.md"), "keep");
        write(&src.path().join("rules/old/gone.md"), "gone");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        fs::remove_dir_all(src.path().join("rules/old")).unwrap();
        let result = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        assert_eq!(result.removed, 1);
        assert!(!dst.path().join("rules/old/gone.md").exists());
        assert!(!dst.path().join("rules/old").exists());
        assert!(dst.path().join("rules/keep.md").exists());
        assert!(registry.get("rules/old/gone.md").is_none());
    }

    #[test]
    fn test_unmanaged_destination_files_survive() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("rules/a.md"), "a");
        write(&dst.path().join("rules/mine.md"), "mine");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        assert!(dst.path().join("rules/mine.md").exists());
    }

    // ==========================================================================
    // Edit tracking
    // ==========================================================================

    #[test]
    fn test_user_edit_is_backed_up_and_kept() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("rules/team.md"), "v1");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        write(&dst.path().join("rules/team.md"), "my local tweak");
        write(&src.path().join("rules/team.md"), "v2");
        let result = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        assert_eq!(result.skipped, 1);
        assert_eq!(result.updated, 0);
        assert_eq!(
            fs::read_to_string(dst.path().join("rules/team.md")).unwrap(),
            "my local tweak"
        );
        let backups = backups_in(&dst.path().join("rules"));
        assert_eq!(backups.len(), 1);
        assert!(backups[0].starts_with("team.ck-backup-"));
        assert!(backups[0].ends_with(".md"));
    }

    #[test]
    fn test_force_overwrites_user_edit() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("rules/team.md"), "v1");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        write(&dst.path().join("rules/team.md"), "edited");

        let forced = SyncOptions {
            track_edits: false,
            ..live_options()
        };
        let result = sync_assets(&mut source, dst.path(), &mut registry, &forced).unwrap();
        assert_eq!(result.updated, 1);
        assert_eq!(
            fs::read_to_string(dst.path().join("rules/team.md")).unwrap(),
            "v1"
        );
        assert!(backups_in(&dst.path().join("rules")).is_empty());
    }

    #[test]
    fn test_untracked_drift_backed_up_then_overwritten() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("rules/a.md"), "source");
        write(&dst.path().join("rules/a.md"), "pre-existing");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        let result = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        assert_eq!(result.updated, 1);
        assert_eq!(
            fs::read_to_string(dst.path().join("rules/a.md")).unwrap(),
            "source"
        );
        assert_eq!(backups_in(&dst.path().join("rules")).len(), 1);
    }

    // ==========================================================================
    // Dry run
    // ==========================================================================

    #[test]
    fn test_dry_run_counts_without_touching_disk() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("rules/a.md"), "a");
        write(&src.path().join("scripts/b.sh"), "b");

        let options = SyncOptions {
            dry_run: true,
            ..live_options()
        };
        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        let result = sync_assets(&mut source, dst.path(), &mut registry, &options).unwrap();

        assert_eq!(result.added, 2);
        assert_eq!(fs::read_dir(dst.path()).unwrap().count(), 0);
        assert!(registry.entries.is_empty());
    }

    #[test]
    fn test_dry_run_reports_removal_but_keeps_file() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("rules/a.md"), "a");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        fs::remove_file(src.path().join("rules/a.md")).unwrap();

        let options = SyncOptions {
            dry_run: true,
            ..live_options()
        };
        let result = sync_assets(&mut source, dst.path(), &mut registry, &options).unwrap();
        assert_eq!(result.removed, 1);
        assert!(dst.path().join("rules/a.md").exists());
        assert_eq!(
            fs::read_to_string(dst.path().join(ASSET_MANIFEST)).unwrap(),
            "rules/a.md\n"
        );
    }

    // ==========================================================================
    // Selection
    // ==========================================================================

    #[test]
    fn test_hooks_only_when_included() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("hooks/pre.sh"), "#!/bin/sh\n");

        let options = SyncOptions {
            include_hooks: false,
            ..live_options()
        };
        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        let result = sync_assets(&mut source, dst.path(), &mut registry, &options).unwrap();
        assert_eq!(result.added, 0);

        let result = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        assert_eq!(result.added, 1);
        assert!(dst.path().join("hooks/pre.sh").exists());
    }

    #[test]
    fn test_rule_text_is_normalized_on_write() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(
            &src.path().join("rules/paths.md"),
            "See $HOME/.claude/skills/plan/SKILL.md\n",
        );

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        let written = fs::read_to_string(dst.path().join("rules/paths.md")).unwrap();
        assert_eq!(written, "See ${CODEX_HOME:-$HOME/.codex}/skills/plan/SKILL.md\n");

        // Normalized output is what the registry records, so it is not an edit.
        let result = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        assert_eq!(result.skipped, 0);
        assert_eq!(result.updated, 0);
    }

    // ==========================================================================
    // Converted agent documents
    // ==========================================================================

    #[test]
    fn test_converted_agent_not_relanded_while_source_unchanged() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("agents/planner.md"), "---\nmodel: opus\n---\nYou plan.\n");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        let first = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        assert_eq!(first.added, 1);
        let converted = convert_agents(dst.path(), &mut registry, &live_options()).unwrap();
        assert_eq!(converted.converted, 1);
        assert!(!dst.path().join("agents/planner.md").exists());

        let second = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        assert_eq!(second.added, 0);
        assert!(!dst.path().join("agents/planner.md").exists());

        write(&src.path().join("agents/planner.md"), "---\nmodel: haiku\n---\nYou plan.\n");
        let changed = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        assert_eq!(changed.added, 1);
        assert!(dst.path().join("agents/planner.md").exists());
    }

    #[test]
    fn test_dropped_agent_removes_converted_config() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("agents/code-reviewer.md"), "---\nmodel: sonnet\n---\nReview.\n");
        write(&src.path().join("rules/keep.md"), "keep");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        convert_agents(dst.path(), &mut registry, &live_options()).unwrap();
        assert!(dst.path().join("agents/code_reviewer.toml").exists());

        fs::remove_file(src.path().join("agents/code-reviewer.md")).unwrap();
        let result = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        assert_eq!(result.removed, 1);
        assert!(!dst.path().join("agents/code_reviewer.toml").exists());
        assert!(registry.get("agents/code_reviewer.toml").is_none());
        assert!(registry.get("agents/code-reviewer.md").is_none());
    }

    #[test]
    fn test_dropped_agent_with_edited_config_is_backed_up() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        write(&src.path().join("agents/planner.md"), "---\nmodel: opus\n---\nPlan.\n");

        let mut registry = Registry::default();
        let mut source = DirSource::new(src.path());
        sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();
        convert_agents(dst.path(), &mut registry, &live_options()).unwrap();
        fs::write(dst.path().join("agents/planner.toml"), "model = \"mine\"\n").unwrap();

        fs::remove_file(src.path().join("agents/planner.md")).unwrap();
        let result = sync_assets(&mut source, dst.path(), &mut registry, &live_options()).unwrap();

        assert_eq!(result.removed, 1);
        assert!(!dst.path().join("agents/planner.toml").exists());
        assert_eq!(backups_in(&dst.path().join("agents")).len(), 1);
    }

    #[test]
    fn test_backup_line_names_backup_in_dry_run_too() {
        let dst = TempDir::new().unwrap();
        let target = dst.path().join("rules/dev.md");
        write(&target, "mine");

        let pattern = regex::Regex::new(r"^rules/dev\.md -> dev\.ck-backup-\d{8}-\d{6}\.md$").unwrap();
        let planned = backup_before_change(&target, "rules/dev.md", true).unwrap();
        assert!(pattern.is_match(&planned), "{planned}");
        assert!(backups_in(&dst.path().join("rules")).is_empty());

        let taken = backup_before_change(&target, "rules/dev.md", false).unwrap();
        assert!(pattern.is_match(&taken), "{taken}");
        assert_eq!(backups_in(&dst.path().join("rules")).len(), 1);
    }
}
