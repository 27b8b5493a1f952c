//! Codex `config.toml` merging
//!
//! The merge is line-based so user comments, ordering and formatting
//! survive. Only the keys, blocks and flags the sync owns are touched:
//!
//! - top-level `project_doc_max_bytes` and `project_doc_fallback_filenames`
//! - one `[[skills.config]]` block for each MCP skill path
//! - `multi_agent` and `child_agents_md` under `[features]`
//! - one `[agents.<slug>]` table per converted agent

use anyhow::{Context, Result};
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::warn;

use crate::agents::AGENTS_DIR;
use crate::fs::{atomic_write, is_backup_file};
use crate::sync::skills::SKILLS_DIR;

pub const CONFIG_FILE: &str = "config.toml";

const TOP_LEVEL_KEYS: &[(&str, &str)] = &[
    ("project_doc_max_bytes", "65536"),
    (
        "project_doc_fallback_filenames",
        r#"["AGENTS.md", "CLAUDE.md", "AGENTS.override.md"]"#,
    ),
];

const SKILL_CONFIG_HEADING: &str = "[[skills.config]]";
const MCP_SKILL_DIRS: &[&str] = &["mcp-management", "mcp-builder"];

const FEATURES_HEADING: &str = "[features]";
const FEATURE_FLAGS: &[&str] = &["multi_agent", "child_agents_md"];

const DESCRIPTION_MAX_CHARS: usize = 120;

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(?P<head>\[\[?\s*[A-Za-z0-9_\-."' ]+\s*\]\]?)\s*(?:#.*)?$"#).unwrap()
});

static INSTRUCTIONS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)developer_instructions\s*=\s*"""(.*?)""""#).unwrap());

static BOLD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\*\*([^*]+)\*\*").unwrap());

static BARE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

/// Merge `config.toml` under `codex_home`. Returns whether it changed.
pub fn enforce_config(codex_home: &Path, include_mcp: bool, dry_run: bool) -> Result<bool> {
    let path = codex_home.join(CONFIG_FILE);
    let original = read_config(&path)?;
    let merged = ensure_features(&merge_config(&original, codex_home, include_mcp));
    if merged == original {
        return Ok(false);
    }
    if let Err(e) = toml::from_str::<toml::Table>(&merged) {
        warn!(path = %path.display(), error = %e, "merged config does not parse as TOML");
    }
    if !dry_run {
        atomic_write(&path, merged.as_bytes())?;
    }
    Ok(true)
}

/// Apply the top-level keys and MCP skill blocks to `text`.
pub fn merge_config(text: &str, codex_home: &Path, include_mcp: bool) -> String {
    let mut lines = split_lines(text);
    for (key, value) in TOP_LEVEL_KEYS {
        set_top_level_key(&mut lines, key, value);
    }

    let skill_paths: Vec<String> = MCP_SKILL_DIRS
        .iter()
        .map(|dir| resolve_path(&codex_home.join(SKILLS_DIR).join(dir)))
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    replace_skill_blocks(&mut lines, &skill_paths, include_mcp);

    join_lines(&lines)
}

/// Ensure `[features]` exists and enables the agent flags.
pub fn ensure_features(text: &str) -> String {
    let mut lines = split_lines(text);

    let Some(heading) = lines
        .iter()
        .position(|l| heading_of(l).as_deref() == Some(FEATURES_HEADING))
    else {
        if lines.last().is_some_and(|l| !l.trim().is_empty()) {
            lines.push(String::new());
        }
        lines.push(FEATURES_HEADING.to_string());
        lines.extend(FEATURE_FLAGS.iter().map(|flag| format!("{flag} = true")));
        return join_lines(&lines);
    };

    let mut inserted = 0;
    for flag in FEATURE_FLAGS {
        let end = section_end(&lines, heading + 1);
        let existing = (heading + 1..end).find(|&i| key_of(&lines[i]) == Some(*flag));
        match existing {
            Some(i) => {
                if value_of(&lines[i]) != Some("true") {
                    lines[i] = format!("{flag} = true");
                }
            }
            None => {
                lines.insert(heading + 1 + inserted, format!("{flag} = true"));
                inserted += 1;
            }
        }
    }
    join_lines(&lines)
}

/// Append an `[agents.<slug>]` table for every converted agent config not
/// yet registered. Returns how many were added.
pub fn register_agents(codex_home: &Path, dry_run: bool) -> Result<usize> {
    let agents_dir = codex_home.join(AGENTS_DIR);
    if !agents_dir.is_dir() {
        return Ok(0);
    }
    let config_path = codex_home.join(CONFIG_FILE);
    let mut text = read_config(&config_path)?;
    let registered = registered_agents(&text);

    let mut agent_files: Vec<PathBuf> = fs::read_dir(&agents_dir)
        .with_context(|| format!("Failed to read {}", agents_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|e| e == "toml") && !is_backup_file(p))
        .collect();
    agent_files.sort();

    let mut added = 0;
    for path in agent_files {
        let Some(slug) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if registered.contains(&slug) {
            continue;
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let description = agent_description(&content).unwrap_or_else(|| fallback_description(&slug));
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&format!(
            "\n[agents.{}]\ndescription = {}\nconfig_file = {}\n",
            table_key(&slug),
            toml_string(&description),
            toml_string(&format!("{AGENTS_DIR}/{file_name}")),
        ));
        added += 1;
    }

    if added > 0 && !dry_run {
        atomic_write(&config_path, text.as_bytes())?;
    }
    Ok(added)
}

/// First sentence of an agent's `developer_instructions`, markdown bold
/// stripped. Heading and blank lines are ignored.
pub fn agent_description(toml_text: &str) -> Option<String> {
    let body = match toml::from_str::<toml::Table>(toml_text) {
        Ok(table) => table
            .get("developer_instructions")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        Err(_) => INSTRUCTIONS_RE
            .captures(toml_text)
            .map(|caps| caps[1].to_string()),
    }?;

    let line = body
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('#'))?;
    let line = BOLD_RE.replace_all(line, "$1");
    match line.find(". ") {
        Some(dot) if dot > 0 => Some(line[..=dot].to_string()),
        _ => Some(line.chars().take(DESCRIPTION_MAX_CHARS).collect()),
    }
}

/// `code_reviewer` -> `Code Reviewer agent`
fn fallback_description(slug: &str) -> String {
    let words: Vec<String> = slug
        .split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect();
    format!("{} agent", words.join(" "))
}

fn registered_agents(text: &str) -> BTreeSet<String> {
    text.lines().filter_map(agent_table).collect()
}

/// Slug of an `[agents.<slug>]` heading.
fn agent_table(line: &str) -> Option<String> {
    let heading = heading_of(line)?;
    let inner = heading.strip_prefix("[agents.")?.strip_suffix(']')?;
    Some(inner.trim_matches('"').to_string())
}

/// Remove `[agents.<slug>]` tables that point at `agents/<slug>.toml` when
/// that file no longer exists. Tables naming any other config file are
/// left alone. Returns how many were removed.
pub fn prune_agent_registrations(codex_home: &Path, dry_run: bool) -> Result<usize> {
    let config_path = codex_home.join(CONFIG_FILE);
    let text = read_config(&config_path)?;
    let (pruned, removed) = prune_stale_agents(&text, codex_home);
    if removed > 0 && !dry_run {
        atomic_write(&config_path, pruned.as_bytes())?;
    }
    Ok(removed)
}

fn prune_stale_agents(text: &str, codex_home: &Path) -> (String, usize) {
    let mut lines = split_lines(text);
    let mut removed = 0;
    let mut i = 0;
    while i < lines.len() {
        let Some(slug) = agent_table(&lines[i]) else {
            i += 1;
            continue;
        };
        let end = section_end(&lines, i + 1);
        let managed = format!("{AGENTS_DIR}/{slug}.toml");
        let expected = toml_string(&managed);
        let points_at_managed = lines[i + 1..end]
            .iter()
            .any(|l| key_of(l) == Some("config_file") && value_of(l) == Some(expected.as_str()));
        if points_at_managed && !codex_home.join(&managed).is_file() {
            lines.drain(i..end);
            removed += 1;
        } else {
            i = end;
        }
    }
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    (join_lines(&lines), removed)
}

fn read_config(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Ok(String::new());
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Canonical form of a path that may not exist yet.
fn resolve_path(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    if let (Some(parent), Some(name)) = (path.parent(), path.file_name())
        && let Ok(parent) = resolve_parent(parent)
    {
        return parent.join(name);
    }
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

fn resolve_parent(path: &Path) -> std::io::Result<PathBuf> {
    match path.canonicalize() {
        Ok(p) => Ok(p),
        Err(e) => match (path.parent(), path.file_name()) {
            (Some(parent), Some(name)) => Ok(resolve_parent(parent)?.join(name)),
            _ => Err(e),
        },
    }
}

// ============================================================================
// Line-level helpers
// ============================================================================

fn split_lines(text: &str) -> Vec<String> {
    text.lines().map(str::to_string).collect()
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn is_heading(line: &str) -> bool {
    HEADING_RE.is_match(line.trim())
}

/// Heading of a table line with any trailing comment and inner padding
/// removed: `[ features ] # x` -> `[features]`.
fn heading_of(line: &str) -> Option<String> {
    let caps = HEADING_RE.captures(line.trim())?;
    Some(caps["head"].split_whitespace().collect())
}

/// Index of the next heading at or after `from`, or the end.
fn section_end(lines: &[String], from: usize) -> usize {
    (from..lines.len())
        .find(|&i| is_heading(&lines[i]))
        .unwrap_or(lines.len())
}

/// Key of a `key = value` line.
fn key_of(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    let (key, _) = trimmed.split_once('=')?;
    Some(key.trim())
}

/// Value of a `key = value` line with any trailing comment removed.
fn value_of(line: &str) -> Option<&str> {
    let (_, value) = line.split_once('=')?;
    let value = match value.find('#') {
        Some(hash) if !value[..hash].contains('"') => &value[..hash],
        _ => value,
    };
    Some(value.trim())
}

/// Net `[`/`]` depth of a line, ignoring brackets inside strings.
fn bracket_depth(line: &str) -> i32 {
    let mut depth = 0;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in line.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' && q == '"' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => quote = Some(c),
                '[' => depth += 1,
                ']' => depth -= 1,
                '#' => break,
                _ => {}
            },
        }
    }
    depth
}

/// Set `key = value` in the root table, replacing the first assignment in
/// place (including a multi-line array value) or inserting it before the
/// first table heading.
fn set_top_level_key(lines: &mut Vec<String>, key: &str, value: &str) {
    let assignment = format!("{key} = {value}");
    let root_end = section_end(lines, 0);

    if let Some(start) = (0..root_end).find(|&i| key_of(&lines[i]) == Some(key)) {
        let mut end = start;
        let mut depth = lines[start]
            .split_once('=')
            .map_or(0, |(_, v)| bracket_depth(v));
        while depth > 0 && end + 1 < lines.len() {
            end += 1;
            depth += bracket_depth(&lines[end]);
        }
        lines.splice(start..=end, [assignment]);
        return;
    }

    let mut at = root_end;
    while at > 0 && lines[at - 1].trim().is_empty() {
        at -= 1;
    }
    lines.insert(at, assignment);
    if lines.get(at + 1).is_some_and(|next| is_heading(next)) {
        lines.insert(at + 1, String::new());
    }
}

/// Path value of a `[[skills.config]]` block, if any.
fn block_path(block: &[String]) -> Option<String> {
    block.iter().find_map(|line| {
        if key_of(line) != Some("path") {
            return None;
        }
        let value = line.split_once('=')?.1.trim();
        let doc: toml::Table = toml::from_str(&format!("v = {value}")).ok()?;
        doc.get("v")?.as_str().map(str::to_string)
    })
}

/// Drop every skill block naming one of `paths` and put back exactly one
/// fresh block per path, where the first dropped block was.
fn replace_skill_blocks(lines: &mut Vec<String>, paths: &[String], enabled: bool) {
    let mut insert_at = None;
    let mut i = 0;
    while i < lines.len() {
        if heading_of(&lines[i]).as_deref() != Some(SKILL_CONFIG_HEADING) {
            i += 1;
            continue;
        }
        let end = section_end(lines, i + 1);
        let owned = block_path(&lines[i + 1..end]).is_some_and(|p| paths.contains(&p));
        if owned {
            lines.drain(i..end);
            insert_at.get_or_insert(i);
        } else {
            i = end;
        }
    }

    let mut fresh = Vec::new();
    for (n, path) in paths.iter().enumerate() {
        if n > 0 {
            fresh.push(String::new());
        }
        fresh.push(SKILL_CONFIG_HEADING.to_string());
        fresh.push(format!("path = {}", toml_string(path)));
        fresh.push(format!("enabled = {enabled}"));
    }

    match insert_at {
        Some(at) => {
            if at < lines.len() {
                fresh.push(String::new());
            }
            lines.splice(at..at, fresh);
        }
        None => {
            if lines.last().is_some_and(|l| !l.trim().is_empty()) {
                lines.push(String::new());
            }
            lines.extend(fresh);
        }
    }
}

fn toml_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn table_key(slug: &str) -> String {
    if BARE_KEY_RE.is_match(slug) {
        slug.to_string()
    } else {
        toml_string(slug)
    }
}
