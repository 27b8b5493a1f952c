//! Prompt export
//!
//! Every synced command document becomes a flat Codex prompt under
//! `prompts/`, named after its command path (`docs/init.md` becomes
//! `docs-init.md`). Generated prompts are tracked in their own manifest so
//! stale ones disappear and unrelated prompts are never overwritten.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

use super::{PromptExportResult, SyncOptions};
use crate::fs::{WriteOutcome, is_backup_file, safe_relative_path, write_bytes_if_changed};
use crate::manifest::{PROMPT_MANIFEST, load_manifest, save_manifest};
use crate::normalize::{COMMAND_MAP_FILE, PROMPT_REPLACER};
use crate::output::{self, Action};

pub const PROMPTS_DIR: &str = "prompts";
pub const COMMANDS_DIR: &str = "commands";

const MCP_PROMPT: &str = "use-mcp.md";
const PROMPT_MODE: u32 = 0o644;

/// Prefix a frontmatter block unless the document already has one.
pub fn ensure_frontmatter(content: &str, command_path: &str) -> String {
    if content.trim_start().starts_with("---") {
        return content.to_string();
    }
    format!(
        "---\ndescription: ClaudeKit compatibility prompt for /{command_path}\n---\n\n{content}"
    )
}

pub fn export_prompts(codex_home: &Path, options: &SyncOptions) -> Result<PromptExportResult> {
    let dry_run = options.dry_run;
    let commands_dir = codex_home.join(COMMANDS_DIR);
    let prompts_dir = codex_home.join(PROMPTS_DIR);
    let manifest_path = prompts_dir.join(PROMPT_MANIFEST);
    let mut result = PromptExportResult::default();

    if !commands_dir.is_dir() {
        output::skip("no-commands", commands_dir.display());
        return Ok(result);
    }

    let old_manifest = load_manifest(&manifest_path)?;
    let mut generated = BTreeSet::new();

    let mut sources: Vec<_> = WalkDir::new(&commands_dir)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "md") && !is_backup_file(p))
        .collect();
    sources.sort();

    for src in sources {
        let Ok(rel) = src.strip_prefix(&commands_dir) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        let base = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if base == COMMAND_MAP_FILE || (base == MCP_PROMPT && !options.include_mcp) {
            result.skipped += 1;
            output::skip("", &rel);
            continue;
        }

        let command_path = rel.trim_end_matches(".md");
        let prompt_name = format!("{}.md", command_path.replace('/', "-"));
        let target = prompts_dir.join(&prompt_name);

        if target.exists() && !old_manifest.contains(&prompt_name) {
            result.collisions += 1;
            output::skip("collision", &prompt_name);
            continue;
        }

        let raw = fs::read(&src).with_context(|| format!("Failed to read {}", src.display()))?;
        let text = String::from_utf8_lossy(&raw);
        let text = ensure_frontmatter(&PROMPT_REPLACER.apply(&text), command_path);

        generated.insert(prompt_name.clone());
        match write_bytes_if_changed(&target, text.as_bytes(), Some(PROMPT_MODE), dry_run)? {
            WriteOutcome::Added => {
                result.added += 1;
                output::action(Action::Add, format!("{prompt_name} <= {rel}"));
            }
            WriteOutcome::Updated => {
                result.updated += 1;
                output::action(Action::Update, format!("{prompt_name} <= {rel}"));
            }
            WriteOutcome::Unchanged => {}
        }
    }

    for name in old_manifest.difference(&generated) {
        let Some(name) = safe_relative_path(name) else {
            continue;
        };
        let target = prompts_dir.join(&name);
        if target.is_file() {
            result.removed += 1;
            output::action(Action::Remove, format!("{name} (stale)"));
            if !dry_run {
                fs::remove_file(&target)
                    .with_context(|| format!("Failed to remove {}", target.display()))?;
            }
        }
    }

    save_manifest(&manifest_path, &generated, dry_run)?;
    result.total_generated = generated.len();
    Ok(result)
}
