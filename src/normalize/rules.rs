//! Path rewrite rules
//!
//! Each table maps a Claude-layout reference to its Codex equivalent. The
//! tables are compiled into one Aho-Corasick automaton with leftmost-longest
//! semantics: at every position the longest matching pattern wins and
//! replaced output is never scanned again, so table order does not matter.

use aho_corasick::{AhoCorasick, MatchKind};
use std::borrow::Cow;
use std::sync::LazyLock;

/// Rules for skill descriptors, rules and output styles.
pub const SKILL_MD_RULES: &[(&str, &str)] = &[
    ("$HOME/.claude/", "${CODEX_HOME:-$HOME/.codex}/"),
    ("./.claude/skills/", "${CODEX_HOME:-$HOME/.codex}/skills/"),
    (".claude/skills/", "${CODEX_HOME:-$HOME/.codex}/skills/"),
    ("./.claude/scripts/", "${CODEX_HOME:-$HOME/.codex}/scripts/"),
    (".claude/scripts/", "${CODEX_HOME:-$HOME/.codex}/scripts/"),
    ("./.claude/rules/", "${CODEX_HOME:-$HOME/.codex}/rules/"),
    (".claude/rules/", "${CODEX_HOME:-$HOME/.codex}/rules/"),
    ("~/.claude/.ck.json", "~/.codex/.ck.json"),
    ("./.claude/.ck.json", "~/.codex/.ck.json"),
    (".claude/.ck.json", "~/.codex/.ck.json"),
    ("~/.claude/", "~/.codex/"),
    ("./.claude/", "./.codex/"),
    ("<project>/.claude/", "<project>/.codex/"),
    (".claude/", ".codex/"),
    ("`.claude`", "`.codex`"),
    ("$HOME/${CODEX_HOME:-$HOME/.codex}/", "${CODEX_HOME:-$HOME/.codex}/"),
];

/// Rules for exported prompts. Relative references resolve to the user
/// home because prompts are global.
pub const PROMPT_RULES: &[(&str, &str)] = &[
    ("$HOME/.claude/", "${CODEX_HOME:-$HOME/.codex}/"),
    ("./.claude/skills/", "~/.codex/skills/"),
    (".claude/skills/", "~/.codex/skills/"),
    ("./.claude/scripts/", "~/.codex/scripts/"),
    (".claude/scripts/", "~/.codex/scripts/"),
    ("./.claude/rules/", "~/.codex/rules/"),
    (".claude/rules/", "~/.codex/rules/"),
    ("~/.claude/.ck.json", "~/.codex/.ck.json"),
    ("./.claude/.ck.json", "~/.codex/.ck.json"),
    (".claude/.ck.json", "~/.codex/.ck.json"),
    ("$HOME/${CODEX_HOME:-$HOME/.codex}/", "${CODEX_HOME:-$HOME/.codex}/"),
];

/// Rules for converted agent configs.
pub const AGENT_TOML_RULES: &[(&str, &str)] = &[
    ("$HOME/.claude/", "${CODEX_HOME:-$HOME/.codex}/"),
    ("~/.claude/", "~/.codex/"),
];

/// Claude tool syntax that reads oddly once agents run under Codex.
pub const CLAUDE_SYNTAX_RULES: &[(&str, &str)] = &[
    ("Task(Explore)", "the explore agent"),
    ("Task(researcher)", "the researcher agent"),
    ("Task(", "delegate to "),
];

pub static SKILL_REPLACER: LazyLock<Replacer> =
    LazyLock::new(|| Replacer::new(&[SKILL_MD_RULES]).unwrap());

pub static PROMPT_REPLACER: LazyLock<Replacer> =
    LazyLock::new(|| Replacer::new(&[PROMPT_RULES]).unwrap());

pub static AGENT_REPLACER: LazyLock<Replacer> =
    LazyLock::new(|| Replacer::new(&[AGENT_TOML_RULES, CLAUDE_SYNTAX_RULES]).unwrap());

/// Single-pass multi-pattern replacer.
pub struct Replacer {
    automaton: AhoCorasick,
    replacements: Vec<&'static str>,
}

impl Replacer {
    pub fn new(tables: &[&[(&'static str, &'static str)]]) -> Result<Self, aho_corasick::BuildError> {
        let (patterns, replacements): (Vec<&str>, Vec<&str>) =
            tables.iter().flat_map(|table| table.iter().copied()).unzip();
        let automaton = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(&patterns)?;
        Ok(Self {
            automaton,
            replacements,
        })
    }

    /// Rewrite `text`, borrowing it untouched when nothing matches.
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !self.automaton.is_match(text) {
            return Cow::Borrowed(text);
        }
        let out = self.automaton.replace_all(text, &self.replacements);
        if out == text {
            Cow::Borrowed(text)
        } else {
            Cow::Owned(out)
        }
    }
}
