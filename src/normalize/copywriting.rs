//! Copywriting skill fixups
//!
//! The upstream `extract-writing-styles.py` resolves its project root and
//! sibling skills relative to a `.claude` tree. It is patched once to also
//! look under `CODEX_HOME`. The patch only applies to the exact upstream
//! shape it was written against.

use anyhow::{Context, Result};
use regex::{NoExpand, Regex};
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::SyncError;
use crate::fs::ensure_parent;

pub const COPYWRITING_SCRIPT: &str = "skills/copywriting/scripts/extract-writing-styles.py";
pub const DEFAULT_STYLE: &str = "skills/copywriting/assets/writing-styles/default.md";
pub const FALLBACK_STYLE: &str = "skills/copywriting/references/writing-styles.md";

/// Present once the script has been patched.
const PATCH_MARKER: &str = "CODEX_HOME = Path(os.environ.get('CODEX_HOME'";

const FIND_ROOT_PAYLOAD: &str = include_str!("../../templates/copywriting/find_project_root.py");
const PATHS_BLOCK_PAYLOAD: &str = include_str!("../../templates/copywriting/paths_block.py");

static FIND_ROOT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"def find_project_root\(start_dir: Path\) -> Path:\n(?:    .*\n)+?    return start_dir\n",
    )
    .unwrap()
});

static PATHS_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"PROJECT_ROOT = find_project_root\(Path\(__file__\)\.parent\)\n",
        r"STYLES_DIR = PROJECT_ROOT / 'assets' / 'writing-styles'\n",
        r"AI_MULTIMODAL_SCRIPTS = PROJECT_ROOT / '\.claude' / 'skills' / 'ai-multimodal' / 'scripts'\n",
    ))
    .unwrap()
});

/// Rewrite `text` for Codex, or `None` when it is already patched.
pub fn patch_source(text: &str) -> Result<Option<String>, SyncError> {
    if text.contains(PATCH_MARKER) {
        return Ok(None);
    }
    if !FIND_ROOT_RE.is_match(text) {
        return Err(SyncError::PatchTargetChanged {
            script: "copywriting".into(),
            pattern: "find_project_root",
        });
    }
    if !PATHS_BLOCK_RE.is_match(text) {
        return Err(SyncError::PatchTargetChanged {
            script: "copywriting".into(),
            pattern: "PROJECT_ROOT block",
        });
    }
    let patched = FIND_ROOT_RE.replacen(text, 1, NoExpand(FIND_ROOT_PAYLOAD));
    let patched = PATHS_BLOCK_RE.replacen(&patched, 1, NoExpand(PATHS_BLOCK_PAYLOAD));
    Ok(Some(patched.into_owned()))
}

/// Patch the script under `codex_home` if present. Returns whether it changed.
pub fn patch_copywriting_script(codex_home: &Path, dry_run: bool) -> Result<bool> {
    let path = codex_home.join(COPYWRITING_SCRIPT);
    if !path.is_file() {
        return Ok(false);
    }
    let text =
        fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let Some(patched) = patch_source(&text)? else {
        return Ok(false);
    };
    if patched == text {
        return Ok(false);
    }
    if !dry_run {
        fs::write(&path, patched).with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(true)
}

/// Seed the default writing style from the reference copy when missing.
pub fn ensure_default_style(codex_home: &Path, dry_run: bool) -> Result<bool> {
    let default_style = codex_home.join(DEFAULT_STYLE);
    let fallback = codex_home.join(FALLBACK_STYLE);
    if default_style.exists() || !fallback.is_file() {
        return Ok(false);
    }
    if !dry_run {
        ensure_parent(&default_style)?;
        fs::copy(&fallback, &default_style).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                fallback.display(),
                default_style.display()
            )
        })?;
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const UPSTREAM: &str = r#"import os
from pathlib import Path

def find_project_root(start_dir: Path) -> Path:
    for parent in [start_dir] + list(start_dir.parents):
        if (parent / '.claude').exists():
            return parent
    return start_dir

PROJECT_ROOT = find_project_root(Path(__file__).parent)
STYLES_DIR = PROJECT_ROOT / 'assets' / 'writing-styles'
AI_MULTIMODAL_SCRIPTS = PROJECT_ROOT / '.claude' / 'skills' / 'ai-multimodal' / 'scripts'

print(STYLES_DIR)
"#;

    #[test]
    fn test_patch_applies_both_payloads_once() {
        let patched = patch_source(UPSTREAM).unwrap().unwrap();
        assert!(patched.contains(PATCH_MARKER));
        assert!(patched.contains("'assets' / 'writing-styles').exists()"));
        assert!(patched.contains("_ai_multimodal_candidates"));
        assert!(patched.ends_with("print(STYLES_DIR)\n"));

        assert!(patch_source(&patched).unwrap().is_none());
    }

    #[test]
    fn test_changed_upstream_shape_is_fatal() {
        let drifted = UPSTREAM.replace("    return start_dir\n", "    return None\n");
        let err = patch_source(&drifted).unwrap_err();
        assert!(matches!(
            err,
            SyncError::PatchTargetChanged {
                pattern: "find_project_root",
                ..
            }
        ));

        let drifted = UPSTREAM.replace("STYLES_DIR = ", "STYLES = ");
        let err = patch_source(&drifted).unwrap_err();
        assert!(matches!(
            err,
            SyncError::PatchTargetChanged {
                pattern: "PROJECT_ROOT block",
                ..
            }
        ));
    }

    #[test]
    fn test_patch_script_on_disk_and_dry_run() {
        let home = TempDir::new().unwrap();
        let script = home.path().join(COPYWRITING_SCRIPT);
        fs::create_dir_all(script.parent().unwrap()).unwrap();
        fs::write(&script, UPSTREAM).unwrap();

        assert!(patch_copywriting_script(home.path(), true).unwrap());
        assert_eq!(fs::read_to_string(&script).unwrap(), UPSTREAM);

        assert!(patch_copywriting_script(home.path(), false).unwrap());
        assert!(!patch_copywriting_script(home.path(), false).unwrap());
    }

    #[test]
    fn test_missing_script_is_not_an_error() {
        let home = TempDir::new().unwrap();
        assert!(!patch_copywriting_script(home.path(), false).unwrap());
    }

    #[test]
    fn test_default_style_seeded_from_fallback() {
        let home = TempDir::new().unwrap();
        assert!(!ensure_default_style(home.path(), false).unwrap());

        let fallback = home.path().join(FALLBACK_STYLE);
        fs::create_dir_all(fallback.parent().unwrap()).unwrap();
        fs::write(&fallback, "# Styles").unwrap();

        assert!(ensure_default_style(home.path(), false).unwrap());
        assert_eq!(
            fs::read_to_string(home.path().join(DEFAULT_STYLE)).unwrap(),
            "# Styles"
        );
        assert!(!ensure_default_style(home.path(), false).unwrap());
    }
}
