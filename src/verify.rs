//! Post-sync runtime checks
//!
//! Runs `codex --help` and the copywriting style lister with short
//! timeouts. Results are reported, never fatal.

use serde::Serialize;
use std::ffi::OsStr;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::runtime::{Builder, Runtime};
use tracing::warn;
use walkdir::WalkDir;

use crate::bootstrap::venv_python;
use crate::normalize::COPYWRITING_SCRIPT;
use crate::sync::prompts::PROMPTS_DIR;
use crate::sync::skills::SKILLS_DIR;

const CODEX_TIMEOUT: Duration = Duration::from_secs(10);
const COPYWRITING_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckStatus {
    Ok,
    Failed,
    Timeout,
    /// The program is not installed.
    Missing,
    /// The script to run is not synced.
    NotFound,
    NoVenv,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub skipped: bool,
    pub codex_help: CheckStatus,
    pub copywriting: CheckStatus,
    pub prompts: usize,
    pub skills: usize,
}

impl VerifyReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            codex_help: CheckStatus::Skipped,
            copywriting: CheckStatus::Skipped,
            prompts: 0,
            skills: 0,
        }
    }
}

pub fn verify_runtime(codex_home: &Path, dry_run: bool) -> VerifyReport {
    if dry_run {
        return VerifyReport::skipped();
    }

    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(rt) => Some(rt),
        Err(e) => {
            warn!(error = %e, "failed to start runtime for verification");
            None
        }
    };
    let check = |program: &OsStr, args: &[&OsStr], limit: Duration| match &runtime {
        Some(rt) => run_check(rt, program, args, limit),
        None => CheckStatus::Failed,
    };

    let codex_help = check(OsStr::new("codex"), &[OsStr::new("--help")], CODEX_TIMEOUT);

    let script = codex_home.join(COPYWRITING_SCRIPT);
    let python = venv_python(codex_home);
    let copywriting = if !script.is_file() {
        CheckStatus::NotFound
    } else if !python.exists() {
        CheckStatus::NoVenv
    } else {
        check(
            python.as_os_str(),
            &[script.as_os_str(), OsStr::new("--list")],
            COPYWRITING_TIMEOUT,
        )
    };

    VerifyReport {
        skipped: false,
        codex_help,
        copywriting,
        prompts: count_prompts(codex_home),
        skills: count_skills(codex_home),
    }
}

/// Run `program` to completion within `limit`, output discarded.
pub fn run_check(runtime: &Runtime, program: &OsStr, args: &[&OsStr], limit: Duration) -> CheckStatus {
    runtime.block_on(async {
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();
        match tokio::time::timeout(limit, status).await {
            Err(_) => CheckStatus::Timeout,
            Ok(Err(e)) if e.kind() == ErrorKind::NotFound => CheckStatus::Missing,
            Ok(Err(_)) => CheckStatus::Failed,
            Ok(Ok(status)) if status.success() => CheckStatus::Ok,
            Ok(Ok(_)) => CheckStatus::Failed,
        }
    })
}

fn count_prompts(codex_home: &Path) -> usize {
    let Ok(entries) = fs::read_dir(codex_home.join(PROMPTS_DIR)) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
        .count()
}

fn count_skills(codex_home: &Path) -> usize {
    WalkDir::new(codex_home.join(SKILLS_DIR))
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == "SKILL.md")
        .count()
}
