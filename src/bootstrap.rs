//! Skill dependency bootstrap
//!
//! Skills ship Python and Node helpers. Python packages go into one shared
//! virtualenv at `skills/.venv`, preferably a symlink to the source's venv
//! so nothing has to be installed twice. Node packages are installed per
//! `package.json`.
//!
//! A failing install does not stop the others; failures are counted and
//! the caller decides whether they are fatal.

use anyhow::{Context, Result};
use serde::Serialize;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::SyncError;
use crate::fs::EXCLUDED_COMPONENTS;
use crate::output::{self, Action};
use crate::sync::skills::{MCP_SKILLS, SKILLS_DIR};

pub const VENV_DIR: &str = ".venv";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapStats {
    pub venv_reused: bool,
    pub python_ok: usize,
    pub python_fail: usize,
    pub node_ok: usize,
    pub node_fail: usize,
}

impl BootstrapStats {
    pub fn failures(&self) -> usize {
        self.python_fail + self.node_fail
    }
}

/// Interpreter inside the shared skills venv.
pub fn venv_python(codex_home: &Path) -> PathBuf {
    let venv = codex_home.join(SKILLS_DIR).join(VENV_DIR);
    if cfg!(windows) {
        venv.join("Scripts").join("python.exe")
    } else {
        venv.join("bin").join("python3")
    }
}

/// True when `program` resolves to a file on `PATH`.
pub fn command_exists(program: &str) -> bool {
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| {
        let candidate = dir.join(program);
        candidate.is_file() || (cfg!(windows) && candidate.with_extension("exe").is_file())
    })
}

/// Install skill dependencies under `codex_home`. `source_venv` is the venv
/// to share when one exists.
pub fn bootstrap_deps(
    codex_home: &Path,
    source_venv: &Path,
    include_mcp: bool,
    dry_run: bool,
) -> Result<BootstrapStats> {
    let skills_dir = codex_home.join(SKILLS_DIR);
    let venv_dir = skills_dir.join(VENV_DIR);
    let py_bin = venv_python(codex_home);
    let mut stats = BootstrapStats {
        venv_reused: link_source_venv(&venv_dir, source_venv, dry_run)?,
        ..Default::default()
    };

    if stats.venv_reused && !dry_run && !py_bin.exists() {
        output::warn("skills/.venv has no python3, recreating a local venv");
        if venv_dir.is_symlink() {
            remove_link(&venv_dir)?;
        }
        stats.venv_reused = false;
    }

    if stats.venv_reused {
        output::skip("", "deps install (venv symlinked, packages shared)");
        return Ok(stats);
    }

    if !command_exists("python3") {
        return Err(SyncError::MissingInterpreter("python3".into()).into());
    }
    run_required(
        "python3",
        [OsStr::new("-m"), OsStr::new("venv"), venv_dir.as_os_str()],
        dry_run,
    )?;
    run_required(
        py_bin.as_os_str(),
        ["-m", "pip", "install", "--upgrade", "pip"].map(OsStr::new),
        dry_run,
    )?;

    for req in dependency_files(&skills_dir, include_mcp, is_requirements_file) {
        let args = ["-m", "pip", "install", "-r"].map(OsStr::new);
        if run(py_bin.as_os_str(), args.into_iter().chain([req.as_os_str()]), dry_run) {
            stats.python_ok += 1;
        } else {
            stats.python_fail += 1;
            output::warn(format!("python deps failed: {}", req.display()));
        }
    }

    if !command_exists("npm") {
        output::warn("npm not found; skipping Node dependency bootstrap");
        return Ok(stats);
    }
    for pkg in dependency_files(&skills_dir, include_mcp, |name| name == "package.json") {
        let Some(dir) = pkg.parent() else {
            continue;
        };
        let args = [OsStr::new("install"), OsStr::new("--prefix"), dir.as_os_str()];
        if run(OsStr::new("npm"), args, dry_run) {
            stats.node_ok += 1;
        } else {
            stats.node_fail += 1;
            output::warn(format!("node deps failed: {}", dir.display()));
        }
    }

    Ok(stats)
}

/// Point `venv_dir` at `source_venv`. Returns whether a usable venv is in
/// place (linked now, linked before, or a local one).
fn link_source_venv(venv_dir: &Path, source_venv: &Path, dry_run: bool) -> Result<bool> {
    if venv_dir.is_symlink() && !venv_dir.exists() {
        debug!(path = %venv_dir.display(), "removing dangling venv symlink");
        if !dry_run {
            remove_link(venv_dir)?;
        }
    }

    if venv_dir.is_symlink() && venv_dir.exists() {
        output::skip("", "skills/.venv (symlink intact)");
        return Ok(true);
    }
    if venv_dir.exists() {
        output::skip("", "skills/.venv (exists)");
        return Ok(true);
    }
    if !source_venv.is_dir() {
        return Ok(false);
    }

    if !dry_run {
        if let Some(parent) = venv_dir.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        if venv_dir.is_symlink() {
            remove_link(venv_dir)?;
        }
        if !symlink_dir(source_venv, venv_dir)? {
            return Ok(false);
        }
    }
    output::action(
        Action::Add,
        format!("skills/.venv -> {}", source_venv.display()),
    );
    Ok(true)
}

#[cfg(unix)]
fn symlink_dir(original: &Path, link: &Path) -> Result<bool> {
    std::os::unix::fs::symlink(original, link).with_context(|| {
        format!(
            "Failed to symlink {} -> {}",
            link.display(),
            original.display()
        )
    })?;
    Ok(true)
}

#[cfg(windows)]
fn symlink_dir(original: &Path, link: &Path) -> Result<bool> {
    // Directory symlinks need elevated rights on Windows; fall back to a local venv.
    Ok(std::os::windows::fs::symlink_dir(original, link).is_ok())
}

fn remove_link(path: &Path) -> Result<()> {
    fs::remove_file(path)
        .or_else(|_| fs::remove_dir(path))
        .with_context(|| format!("Failed to remove {}", path.display()))
}

fn is_requirements_file(name: &str) -> bool {
    name.starts_with("requirements") && name.ends_with(".txt")
}

/// Dependency manifests under `skills_dir`, skipping excluded trees and MCP
/// skills unless included.
fn dependency_files(
    skills_dir: &Path,
    include_mcp: bool,
    matches: impl Fn(&str) -> bool,
) -> Vec<PathBuf> {
    if !skills_dir.is_dir() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = WalkDir::new(skills_dir)
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            let name: &str = &name;
            let mcp = e.depth() == 1 && !include_mcp && MCP_SKILLS.contains(&name);
            !mcp && !EXCLUDED_COMPONENTS.contains(&name)
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && matches(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

/// Run a command; `false` on spawn failure or non-zero exit.
fn run<'a>(
    program: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = &'a OsStr>,
    dry_run: bool,
) -> bool {
    let program = program.as_ref();
    let args: Vec<&OsStr> = args.into_iter().collect();
    debug!(program = ?program, args = ?args, dry_run, "run");
    if dry_run {
        return true;
    }
    match Command::new(program).args(&args).status() {
        Ok(status) => status.success(),
        Err(e) => {
            debug!(program = ?program, error = %e, "failed to spawn");
            false
        }
    }
}

fn run_required<'a>(
    program: impl AsRef<OsStr>,
    args: impl IntoIterator<Item = &'a OsStr>,
    dry_run: bool,
) -> Result<()> {
    let program = program.as_ref();
    let args: Vec<&OsStr> = args.into_iter().collect();
    if run(program, args.iter().copied(), dry_run) {
        return Ok(());
    }
    anyhow::bail!(
        "Command failed: {} {}",
        program.to_string_lossy(),
        args.iter()
            .map(|a| a.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ")
    )
}
