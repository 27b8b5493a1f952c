//! Manifest store
//!
//! A manifest is the plain-text set of destination-relative paths a sync
//! category managed on its last run, one per line, sorted.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use crate::fs::write_text_if_changed;

/// Manifest of flat assets, at the destination root.
pub const ASSET_MANIFEST: &str = ".sync-manifest-assets.txt";

/// Manifest of generated prompts, inside the prompts directory.
pub const PROMPT_MANIFEST: &str = ".claudekit-generated-prompts.txt";

/// Load a manifest; a missing file is an empty set.
pub fn load_manifest(path: &Path) -> Result<BTreeSet<String>> {
    if !path.exists() {
        return Ok(BTreeSet::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

/// Serialize a manifest: sorted, deduplicated, trailing newline iff non-empty.
pub fn render_manifest<'a>(values: impl IntoIterator<Item = &'a String>) -> String {
    let set: BTreeSet<&String> = values.into_iter().collect();
    let mut out = String::new();
    for value in set {
        out.push_str(value);
        out.push('\n');
    }
    out
}

/// Save a manifest, leaving the file untouched when the content is unchanged.
/// Returns whether the file changed (or would, in dry-run).
pub fn save_manifest<'a>(
    path: &Path,
    values: impl IntoIterator<Item = &'a String>,
    dry_run: bool,
) -> Result<bool> {
    let data = render_manifest(values);
    write_text_if_changed(path, &data, false, dry_run)
        .with_context(|| format!("Failed to save manifest: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_manifest_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let set = load_manifest(&temp_dir.path().join(ASSET_MANIFEST)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn test_render_sorted_deduplicated() {
        let values = vec![
            "rules/b.md".to_string(),
            "agents/a.md".to_string(),
            "rules/b.md".to_string(),
        ];
        assert_eq!(render_manifest(&values), "agents/a.md\nrules/b.md\n");
        assert_eq!(render_manifest(&Vec::<String>::new()), "");
    }

    #[test]
    fn test_save_then_load_skips_blank_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(ASSET_MANIFEST);
        fs::write(&path, "rules/a.md\n\n  scripts/x.py  \n").unwrap();

        let set = load_manifest(&path).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains("scripts/x.py"));
    }

    #[test]
    fn test_save_is_noop_when_unchanged() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(ASSET_MANIFEST);
        let values = vec!["rules/a.md".to_string()];

        assert!(save_manifest(&path, &values, false).unwrap());
        assert!(!save_manifest(&path, &values, false).unwrap());
    }

    #[test]
    fn test_save_dry_run_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(ASSET_MANIFEST);
        let values = vec!["rules/a.md".to_string()];

        assert!(save_manifest(&path, &values, true).unwrap());
        assert!(!path.exists());
    }
}
