//! Generated compatibility files: the command bridge skill and the
//! workspace `AGENTS.md`.

use anyhow::Result;
use std::path::Path;

use crate::fs::write_text_if_changed;
use crate::output::{self, Action};
use crate::sync::skills::SKILLS_DIR;

pub const BRIDGE_SKILL: &str = "claudekit-command-bridge";
pub const WORKSPACE_AGENTS_FILE: &str = "AGENTS.md";

const AGENTS_MD: &str = include_str!("../templates/agents-md.md");

/// (path inside the bridge skill, content, executable)
const BRIDGE_FILES: &[(&str, &str, bool)] = &[
    ("SKILL.md", include_str!("../templates/bridge-skill.md"), false),
    (
        "scripts/resolve-command.py",
        include_str!("../templates/bridge-resolve-command.py"),
        true,
    ),
    (
        "scripts/docs-init.sh",
        include_str!("../templates/bridge-docs-init.sh"),
        true,
    ),
    (
        "scripts/project-status.sh",
        include_str!("../templates/bridge-project-status.sh"),
        true,
    ),
];

/// Upsert the bridge skill. Returns whether any file changed.
pub fn ensure_bridge_skill(codex_home: &Path, dry_run: bool) -> Result<bool> {
    let bridge_dir = codex_home.join(SKILLS_DIR).join(BRIDGE_SKILL);
    let mut changed = false;
    for (rel, content, executable) in BRIDGE_FILES {
        if write_text_if_changed(&bridge_dir.join(rel), content, *executable, dry_run)? {
            changed = true;
            output::action(Action::Upsert, format!("{SKILLS_DIR}/{BRIDGE_SKILL}/{rel}"));
        }
    }
    Ok(changed)
}

/// Upsert `AGENTS.md` at the workspace root.
pub fn ensure_workspace_agents_md(workspace: &Path, dry_run: bool) -> Result<bool> {
    let target = workspace.join(WORKSPACE_AGENTS_FILE);
    let changed = write_text_if_changed(&target, AGENTS_MD, false, dry_run)?;
    if changed {
        output::action(Action::Upsert, target.display());
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_bridge_skill_written_once() {
        let home = TempDir::new().unwrap();
        assert!(ensure_bridge_skill(home.path(), false).unwrap());
        assert!(!ensure_bridge_skill(home.path(), false).unwrap());

        let skill = home.path().join("skills/claudekit-command-bridge/SKILL.md");
        assert!(fs::read_to_string(skill).unwrap().contains("name: claudekit-command-bridge"));
    }

    #[cfg(unix)]
    #[test]
    fn test_bridge_scripts_are_executable() {
        use std::os::unix::fs::PermissionsExt;

        let home = TempDir::new().unwrap();
        ensure_bridge_skill(home.path(), false).unwrap();
        let script = home
            .path()
            .join("skills/claudekit-command-bridge/scripts/resolve-command.py");
        let mode = fs::metadata(script).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_bridge_restored_after_edit() {
        let home = TempDir::new().unwrap();
        ensure_bridge_skill(home.path(), false).unwrap();
        let script = home
            .path()
            .join("skills/claudekit-command-bridge/scripts/docs-init.sh");
        fs::write(&script, "echo changed").unwrap();

        assert!(ensure_bridge_skill(home.path(), false).unwrap());
        assert_ne!(fs::read_to_string(script).unwrap(), "echo changed");
    }

    #[test]
    fn test_agents_md_dry_run() {
        let workspace = TempDir::new().unwrap();
        assert!(ensure_workspace_agents_md(workspace.path(), true).unwrap());
        assert!(!workspace.path().join(WORKSPACE_AGENTS_FILE).exists());

        assert!(ensure_workspace_agents_md(workspace.path(), false).unwrap());
        assert!(!ensure_workspace_agents_md(workspace.path(), false).unwrap());
    }
}
