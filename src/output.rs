//! User-facing progress lines
//!
//! Everything a run reports on stdout goes through here so that the
//! symbols, labels and colors stay consistent between real and dry runs.

use colored::{ColoredString, Colorize};
use is_terminal::IsTerminal;
use std::fmt::Display;

/// Disable color when stdout is not a terminal or `NO_COLOR` is set.
pub fn init_color() {
    let no_color = std::env::var_os("NO_COLOR").is_some_and(|v| !v.is_empty());
    if no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Add,
    Update,
    Remove,
    Backup,
    Convert,
    Normalize,
    Upsert,
    Register,
}

impl Action {
    fn label(self) -> &'static str {
        match self {
            Action::Add => "add",
            Action::Update => "update",
            Action::Remove => "remove",
            Action::Backup => "backup",
            Action::Convert => "convert",
            Action::Normalize => "normalize",
            Action::Upsert => "upsert",
            Action::Register => "register",
        }
    }

    fn symbol(self) -> ColoredString {
        match self {
            Action::Add | Action::Register => "✔".green(),
            Action::Update | Action::Convert | Action::Normalize | Action::Upsert => {
                "✔".cyan()
            }
            Action::Remove => "✗".red(),
            Action::Backup => "!".yellow(),
        }
    }
}

pub fn section(title: &str) {
    println!("\n{}", title.bold().cyan());
}

pub fn dry_run_banner() {
    println!("{}", "Running in dry-run mode (no files will be changed)".cyan());
}

/// `  ✔ add: rules/a.md`
pub fn action(action: Action, detail: impl Display) {
    println!("  {} {}: {}", action.symbol(), action.label(), detail);
}

/// `  ○ skip(user-edit): rules/a.md`; an empty reason prints plain `skip:`.
pub fn skip(reason: &str, detail: impl Display) {
    let label = if reason.is_empty() {
        "skip".to_string()
    } else {
        format!("skip({reason})")
    };
    println!("  {} {}: {}", "○".yellow(), label, detail);
}

/// `key: value` detail line.
pub fn info(key: &str, value: impl Display) {
    println!("  {} {}", format!("{key}:").bold(), value.to_string().dimmed());
}

pub fn warn(message: impl Display) {
    println!("  {} {}", "!".yellow(), message);
}

/// `assets: added=1 updated=0 removed=2`
pub fn counts(label: &str, pairs: &[(&str, usize)]) {
    let rendered: Vec<String> = pairs
        .iter()
        .map(|(name, value)| {
            let value = if *value > 0 {
                value.to_string().green().to_string()
            } else {
                value.to_string()
            };
            format!("{name}={value}")
        })
        .collect();
    println!("{} {}", format!("{label}:").bold(), rendered.join(" "));
}
