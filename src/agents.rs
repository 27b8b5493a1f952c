//! Agent descriptor conversion
//!
//! Claude agents are markdown documents with a YAML header. Codex expects a
//! TOML config per agent with the prompt under `developer_instructions`.
//! Conversion is one-way: the markdown is deleted once its TOML is safely
//! on disk.

use anyhow::{Context, Result};
use regex::{Captures, Regex};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

use crate::fs::{atomic_write, create_backup, is_backup_file};
use crate::hash::{hash_bytes, hash_file};
use crate::normalize::AGENT_REPLACER;
use crate::output::{self, Action};
use crate::registry::Registry;
use crate::sync::SyncOptions;

pub const AGENTS_DIR: &str = "agents";

/// Agents that only read and advise.
pub const READ_ONLY_AGENTS: &[&str] = &[
    "brainstormer",
    "code_reviewer",
    "researcher",
    "project_manager",
    "journal_writer",
];

/// Claude model tier -> (Codex model, reasoning effort). An empty model
/// means the agent inherits the caller's model.
const MODEL_TIERS: &[(&str, ModelTier)] = &[
    ("opus", ModelTier::new("gpt-5.3-codex", "xhigh")),
    ("sonnet", ModelTier::new("gpt-5.3-codex", "high")),
    ("haiku", ModelTier::new("gpt-5.3-codex-spark", "medium")),
    ("inherit", ModelTier::new("", "")),
];

const DEFAULT_TIER: ModelTier = ModelTier::new("gpt-5.3-codex", "high");

static FRONTMATTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)\A---[ \t]*\r?\n(?:(?P<header>.*?)\r?\n)?---[ \t]*(?:\r?\n|\z)(?P<body>.*)\z",
    )
    .unwrap()
});

static COMMENTED_MODEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^#[ \t]*model[ \t]*=[ \t]*"([A-Za-z]+)"[ \t]*$"#).unwrap());

static WRITABLE_SANDBOX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?m)^sandbox_mode[ \t]*=[ \t]*"workspace-write""#).unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelTier {
    pub model: &'static str,
    pub effort: &'static str,
}

impl ModelTier {
    const fn new(model: &'static str, effort: &'static str) -> Self {
        Self { model, effort }
    }

    /// Map a Claude `model:` value; unknown or absent tiers get the default.
    pub fn from_claude(name: Option<&str>) -> Self {
        let Some(name) = name else {
            return DEFAULT_TIER;
        };
        let name = name.trim().to_ascii_lowercase();
        MODEL_TIERS
            .iter()
            .find(|(claude, _)| *claude == name)
            .map(|(_, tier)| *tier)
            .unwrap_or(DEFAULT_TIER)
    }

    fn known(name: &str) -> Option<Self> {
        MODEL_TIERS
            .iter()
            .find(|(claude, _)| *claude == name)
            .map(|(_, tier)| *tier)
    }
}

/// A parsed agent document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentDocument {
    pub model: Option<String>,
    pub body: String,
}

/// Split a header+body document. `None` when there is no header block.
pub fn parse_agent_document(text: &str) -> Option<AgentDocument> {
    let caps = FRONTMATTER_RE.captures(text)?;
    let header = caps.name("header").map_or("", |m| m.as_str());
    let body = caps.name("body").map_or("", |m| m.as_str()).trim().to_string();
    Some(AgentDocument {
        model: header_value(header, "model"),
        body,
    })
}

/// Look up a scalar header field. Agent headers are not always valid YAML
/// (long descriptions with colons), so a line scan backs up the parser.
fn header_value(header: &str, key: &str) -> Option<String> {
    if let Ok(serde_yaml::Value::Mapping(map)) = serde_yaml::from_str::<serde_yaml::Value>(header)
    {
        return match map.get(key)? {
            serde_yaml::Value::String(s) => Some(s.trim().to_string()),
            serde_yaml::Value::Number(n) => Some(n.to_string()),
            serde_yaml::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
        .filter(|v| !v.is_empty());
    }

    header.lines().find_map(|line| {
        let value = line.strip_prefix(key)?.trim_start().strip_prefix(':')?;
        let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// `code-reviewer` -> `code_reviewer`
pub fn agent_slug(stem: &str) -> String {
    stem.replace('-', "_").to_lowercase()
}

/// `agents/code-reviewer.md` -> `agents/code_reviewer.toml`. `None` for
/// anything that is not a top-level agent document.
pub fn converted_config_path(rel: &str) -> Option<String> {
    let stem = rel
        .strip_prefix(AGENTS_DIR)?
        .strip_prefix('/')?
        .strip_suffix(".md")?;
    if stem.is_empty() || stem.contains('/') {
        return None;
    }
    Some(format!("{AGENTS_DIR}/{}.toml", agent_slug(stem)))
}

pub fn sandbox_mode(slug: &str) -> &'static str {
    if READ_ONLY_AGENTS.contains(&slug) {
        "read-only"
    } else {
        "workspace-write"
    }
}

/// Escape text for a TOML multi-line basic string.
fn escape_multiline(body: &str) -> String {
    body.replace('\\', "\\\\").replace("\"\"\"", "\"\"\\\"")
}

pub fn render_agent_toml(tier: ModelTier, sandbox: &str, body: &str) -> String {
    let mut out = String::new();
    if !tier.model.is_empty() {
        out.push_str(&format!("model = \"{}\"\n", tier.model));
        out.push_str(&format!("model_reasoning_effort = \"{}\"\n", tier.effort));
    }
    out.push_str(&format!("sandbox_mode = \"{sandbox}\"\n"));
    out.push('\n');
    out.push_str(&format!(
        "developer_instructions = \"\"\"\n{}\n\"\"\"\n",
        escape_multiline(body)
    ));
    out
}

/// Outcome of converting agent documents
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AgentConversion {
    pub converted: usize,
    pub skipped: usize,
}

/// Convert every `agents/*.md` with a header into `agents/<slug>.toml`.
pub fn convert_agents(
    codex_home: &Path,
    registry: &mut Registry,
    options: &SyncOptions,
) -> Result<AgentConversion> {
    let dry_run = options.dry_run;
    let agents_dir = codex_home.join(AGENTS_DIR);
    let mut result = AgentConversion::default();

    for md_path in agent_files(&agents_dir, "md")? {
        let text = fs::read_to_string(&md_path)
            .with_context(|| format!("Failed to read {}", md_path.display()))?;
        let Some(doc) = parse_agent_document(&text) else {
            debug!(path = %md_path.display(), "no header block, leaving unconverted");
            continue;
        };

        let file_name = file_name(&md_path);
        let stem = md_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let slug = agent_slug(&stem);
        let tier = ModelTier::from_claude(doc.model.as_deref());
        let sandbox = sandbox_mode(&slug);
        let rendered = render_agent_toml(tier, sandbox, &doc.body);
        let toml_text = AGENT_REPLACER.apply(&rendered);

        let rel = format!("{AGENTS_DIR}/{slug}.toml");
        let target = agents_dir.join(format!("{slug}.toml"));

        if options.track_edits && target.is_file() {
            if registry.get(&rel).is_some() {
                if registry.is_user_edited(&rel, &target)? {
                    if !dry_run {
                        create_backup(&target)?;
                        remove_file(&md_path)?;
                    }
                    result.skipped += 1;
                    output::skip("user-edit", &rel);
                    continue;
                }
            } else if hash_file(&target)? != hash_bytes(toml_text.as_bytes()) && !dry_run {
                let backup = create_backup(&target)?;
                debug!(path = %rel, backup = %backup.display(), "backed up untracked agent config");
            }
        }

        result.converted += 1;
        let model = if tier.model.is_empty() { "inherit" } else { tier.model };
        output::action(
            Action::Convert,
            format!("{AGENTS_DIR}/{file_name} -> {rel} ({model}, {sandbox})"),
        );
        if dry_run {
            continue;
        }

        let current = fs::read(&target).ok();
        if current.as_deref() != Some(toml_text.as_bytes()) {
            atomic_write(&target, toml_text.as_bytes())?;
        }
        registry.record(
            &rel,
            hash_bytes(text.as_bytes()),
            hash_bytes(toml_text.as_bytes()),
        );
        remove_file(&md_path)?;
    }

    Ok(result)
}

/// Second pass over `agents/*.toml`: path rules, commented Claude model
/// lines, and read-only sandboxing. Returns how many files changed.
pub fn normalize_agent_configs(
    codex_home: &Path,
    registry: &mut Registry,
    options: &SyncOptions,
) -> Result<usize> {
    let dry_run = options.dry_run;
    let agents_dir = codex_home.join(AGENTS_DIR);
    let mut changed = 0;

    for path in agent_files(&agents_dir, "toml")? {
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let out = normalize_agent_config(&stem, &text);
        if out == text {
            continue;
        }

        let rel = format!("{AGENTS_DIR}/{}", file_name(&path));
        if options.track_edits && registry.is_user_edited(&rel, &path)? {
            if !dry_run {
                create_backup(&path)?;
            }
            output::skip("user-edit", &rel);
            continue;
        }

        changed += 1;
        output::action(Action::Normalize, &rel);
        if !dry_run {
            atomic_write(&path, out.as_bytes())?;
            registry.refresh_destination(&rel, hash_bytes(out.as_bytes()));
        }
    }

    Ok(changed)
}

/// Pure rewrite applied by [`normalize_agent_configs`].
pub fn normalize_agent_config(stem: &str, text: &str) -> String {
    let out = AGENT_REPLACER.apply(text);
    let out = COMMENTED_MODEL_RE.replace_all(&out, |caps: &Captures| {
        match ModelTier::known(&caps[1].to_ascii_lowercase()) {
            Some(tier) if tier.model.is_empty() => String::new(),
            Some(tier) => format!(
                "model = \"{}\"\nmodel_reasoning_effort = \"{}\"",
                tier.model, tier.effort
            ),
            None => caps[0].to_string(),
        }
    });
    if READ_ONLY_AGENTS.contains(&stem) {
        WRITABLE_SANDBOX_RE
            .replace_all(&out, "sandbox_mode = \"read-only\"")
            .into_owned()
    } else {
        out.into_owned()
    }
}

fn agent_files(agents_dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !agents_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(agents_dir)
        .with_context(|| format!("Failed to read {}", agents_dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.is_file() && p.extension().is_some_and(|ext| ext == extension) && !is_backup_file(p)
        })
        .collect();
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn remove_file(path: &Path) -> Result<()> {
    fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))
}
