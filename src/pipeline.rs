//! One end-to-end sync run
//!
//! The order matters: the config is merged before agents are registered,
//! agent documents are converted before registration reads them, and
//! prompts are exported after commands are synced and normalized.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

use crate::agents::{AgentConversion, convert_agents, normalize_agent_configs};
use crate::bootstrap::{BootstrapStats, bootstrap_deps};
use crate::bridge::{ensure_bridge_skill, ensure_workspace_agents_md};
use crate::clean::clean_target;
use crate::codex_config::{
    CONFIG_FILE, enforce_config, prune_agent_registrations, register_agents,
};
use crate::config::{RunConfig, Scope, SourceSpec, source_venv};
use crate::error::SyncError;
use crate::normalize::normalize_files;
use crate::output::{self, Action};
use crate::registry::Registry;
use crate::source::{
    DirSource, SourceKind, SourceReader, ZipSource, detect_source, find_latest_zip, validate_source,
};
use crate::sync::{
    PromptExportResult, SkillSyncResult, SyncResult, export_prompts, sync_assets, sync_skills,
};
use crate::verify::{VerifyReport, verify_runtime};

/// Machine-readable summary of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub source: String,
    pub source_mode: SourceKind,
    pub codex_home: String,
    pub scope: Scope,
    pub fresh: bool,
    pub dry_run: bool,
    pub fresh_removed: usize,
    pub assets: SyncResult,
    pub skills: SkillSyncResult,
    pub normalize_changed: usize,
    pub baseline_changed: usize,
    pub agents: AgentConversion,
    pub agent_toml_changed: usize,
    pub agents_registered: usize,
    pub agents_unregistered: usize,
    pub prompts: PromptExportResult,
    pub bootstrap: Option<BootstrapStats>,
    pub verify: Option<VerifyReport>,
}

pub fn run(config: &RunConfig) -> Result<RunSummary> {
    let codex_home = config.codex_home.as_path();
    let dry_run = config.dry_run;

    if dry_run {
        output::dry_run_banner();
    }

    // Refusals come before anything touches the destination.
    if config.source.kind() == SourceKind::Zip && !config.force && !dry_run {
        return Err(SyncError::ArchiveWriteRequiresForce.into());
    }

    let (mut source, live_root): (Box<dyn SourceReader>, Option<PathBuf>) = match &config.source {
        SourceSpec::Live(explicit) => {
            let root = detect_source(explicit.as_deref())?;
            output::info("source", format!("{} (live)", root.display()));
            output::info("validation", serde_json::to_string(&validate_source(&root))?);
            (Box::new(DirSource::new(&root)), Some(root))
        }
        SourceSpec::Zip(explicit) => {
            let path = find_latest_zip(explicit.as_deref())?;
            output::info("zip", path.display());
            (Box::new(ZipSource::open(&path)?), None)
        }
    };

    if !dry_run {
        fs::create_dir_all(codex_home)
            .with_context(|| format!("Failed to create directory: {}", codex_home.display()))?;
    }

    let mut fresh_removed = 0;
    if config.fresh {
        fresh_removed = clean_target(codex_home, dry_run)?;
        output::info("fresh", format!("removed {fresh_removed} files"));
    }

    let mut registry = Registry::load(codex_home)?;
    registry.source_dir = live_root.as_ref().map(|root| root.display().to_string());

    output::info("codex_home", codex_home.display());
    output::info("scope", config.scope);
    output::info(
        "flags",
        format!(
            "fresh={} force={} mcp={} hooks={} dry_run={}",
            config.fresh, config.force, config.include_mcp, config.include_hooks, dry_run
        ),
    );

    let options = config.sync_options();

    output::section("Assets");
    let assets = sync_assets(source.as_mut(), codex_home, &mut registry, &options)?;
    output::counts(
        "assets",
        &[
            ("added", assets.added),
            ("updated", assets.updated),
            ("removed", assets.removed),
            ("skipped", assets.skipped),
        ],
    );

    output::section("Skills");
    let skills = sync_skills(source.as_mut(), codex_home, &options)?;
    output::counts(
        "skills",
        &[
            ("added", skills.added),
            ("updated", skills.updated),
            ("skipped", skills.skipped),
            ("total", skills.total_skills),
        ],
    );

    output::section("Normalize");
    let normalize_changed = normalize_files(codex_home, &options)?;
    output::counts("normalize", &[("changed", normalize_changed)]);

    output::section("Baseline");
    let mut baseline_changed = 0;
    if ensure_workspace_agents_md(&config.workspace, dry_run)? {
        baseline_changed += 1;
    }
    if enforce_config(codex_home, config.include_mcp, dry_run)? {
        baseline_changed += 1;
        output::action(Action::Upsert, codex_home.join(CONFIG_FILE).display());
    }
    if ensure_bridge_skill(codex_home, dry_run)? {
        baseline_changed += 1;
    }
    output::counts("baseline", &[("changed", baseline_changed)]);

    output::section("Agents");
    let agents = convert_agents(codex_home, &mut registry, &options)?;
    let agent_toml_changed = normalize_agent_configs(codex_home, &mut registry, &options)?;
    let agents_unregistered = prune_agent_registrations(codex_home, dry_run)?;
    if agents_unregistered > 0 {
        output::action(
            Action::Remove,
            format!("{agents_unregistered} stale agents in {CONFIG_FILE}"),
        );
    }
    let agents_registered = register_agents(codex_home, dry_run)?;
    if agents_registered > 0 {
        output::action(
            Action::Register,
            format!("{agents_registered} agents in {CONFIG_FILE}"),
        );
    }
    output::counts(
        "agents",
        &[
            ("converted", agents.converted),
            ("skipped", agents.skipped),
            ("normalized", agent_toml_changed),
            ("registered", agents_registered),
            ("unregistered", agents_unregistered),
        ],
    );

    output::section("Prompts");
    let prompts = export_prompts(codex_home, &options)?;
    output::counts(
        "prompts",
        &[
            ("added", prompts.added),
            ("updated", prompts.updated),
            ("removed", prompts.removed),
            ("collisions", prompts.collisions),
            ("total", prompts.total_generated),
        ],
    );

    let bootstrap = if config.bootstrap {
        output::section("Dependencies");
        let venv = source_venv(live_root.as_deref()).unwrap_or_default();
        let stats = bootstrap_deps(codex_home, &venv, config.include_mcp, dry_run)?;
        output::counts(
            "bootstrap",
            &[
                ("py_ok", stats.python_ok),
                ("py_fail", stats.python_fail),
                ("node_ok", stats.node_ok),
                ("node_fail", stats.node_fail),
            ],
        );
        if stats.failures() > 0 && !dry_run {
            return Err(SyncError::BootstrapFailed {
                python: stats.python_fail,
                node: stats.node_fail,
            }
            .into());
        }
        Some(stats)
    } else {
        None
    };

    let verify = if config.verify {
        output::section("Verify");
        let report = verify_runtime(codex_home, dry_run);
        output::info("verify", serde_json::to_string(&report)?);
        Some(report)
    } else {
        None
    };

    if !dry_run {
        registry.save(codex_home)?;
    }

    let source_location = source.location().display().to_string();
    Ok(RunSummary {
        source: source_location,
        source_mode: source.kind(),
        codex_home: codex_home.display().to_string(),
        scope: config.scope,
        fresh: config.fresh,
        dry_run,
        fresh_removed,
        assets,
        skills,
        normalize_changed,
        baseline_changed,
        agents,
        agent_toml_changed,
        agents_registered,
        agents_unregistered,
        prompts,
        bootstrap,
        verify,
    })
}
