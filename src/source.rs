//! Source readers
//!
//! A source is either a live Claude configuration directory or a ClaudeKit
//! zip archive. Both are read through [`SourceReader`] so the reconcilers
//! see the same listing of `(relative path, bytes, permission bits)`
//! whichever way the files arrive.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::error::SyncError;
use crate::fs::{executable_mode, is_excluded_path, safe_relative_path};

/// Top-level directory inside a ClaudeKit archive.
pub const SOURCE_NAMESPACE: &str = ".claude";

/// Default live source directory name under the home directory.
pub const DEFAULT_SOURCE_DIR: &str = ".claude";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Live,
    Zip,
}

/// One file yielded by a source.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    /// Path relative to the source root, `/`-separated.
    pub path: String,
    pub data: Vec<u8>,
    pub mode: Option<u32>,
}

/// Uniform access to a source tree.
pub trait SourceReader {
    fn kind(&self) -> SourceKind;

    fn location(&self) -> &Path;

    /// Every non-excluded file below `subtree`, sorted by path. A missing
    /// subtree yields no entries.
    fn read_subtree(&mut self, subtree: &str) -> Result<Vec<SourceEntry>>;

    /// A single file at `rel`, if present.
    fn read_file(&mut self, rel: &str) -> Result<Option<SourceEntry>>;
}

// =============================================================================
// Live directory
// =============================================================================

pub struct DirSource {
    root: PathBuf,
}

impl DirSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_for(&self, path: &Path) -> Result<Option<SourceEntry>> {
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return Ok(None);
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if is_excluded_path(&rel) {
            return Ok(None);
        }
        let metadata =
            fs::metadata(path).with_context(|| format!("Failed to stat {}", path.display()))?;
        let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Some(SourceEntry {
            path: rel,
            data,
            mode: executable_mode(&metadata),
        }))
    }
}

impl SourceReader for DirSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Live
    }

    fn location(&self) -> &Path {
        &self.root
    }

    fn read_subtree(&mut self, subtree: &str) -> Result<Vec<SourceEntry>> {
        let dir = self.root.join(subtree);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(&dir)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0
                    || !e
                        .file_name()
                        .to_str()
                        .is_some_and(|name| crate::fs::EXCLUDED_COMPONENTS.contains(&name))
            });
        for entry in walker {
            let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(source_entry) = self.entry_for(entry.path())? {
                entries.push(source_entry);
            }
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    fn read_file(&mut self, rel: &str) -> Result<Option<SourceEntry>> {
        let path = self.root.join(rel);
        if !path.is_file() {
            return Ok(None);
        }
        self.entry_for(&path)
    }
}

// =============================================================================
// Zip archive
// =============================================================================

pub struct ZipSource {
    path: PathBuf,
    archive: ZipArchive<File>,
}

impl ZipSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open zip: {}", path.display()))?;
        let archive = ZipArchive::new(file)
            .with_context(|| format!("Failed to read zip archive: {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            archive,
        })
    }

    /// Names of file entries inside the namespace, validated and mapped to
    /// their relative path. Any unsafe entry aborts the read.
    fn namespaced_files(&self) -> Result<Vec<(String, String)>> {
        let prefix = format!("{SOURCE_NAMESPACE}/");
        let mut files = Vec::new();
        for name in self.archive.file_names() {
            if name.ends_with('/') {
                continue;
            }
            let Some(rest) = name.strip_prefix(&prefix) else {
                continue;
            };
            let rel = safe_relative_path(rest)
                .ok_or_else(|| SyncError::UnsafeArchivePath(name.to_string()))?;
            files.push((name.to_string(), rel));
        }
        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }

    fn read_entry(&mut self, name: &str, rel: String) -> Result<SourceEntry> {
        let mut file = self
            .archive
            .by_name(name)
            .with_context(|| format!("Failed to open zip entry: {name}"))?;
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)
            .with_context(|| format!("Failed to read zip entry: {name}"))?;
        let mode = file.unix_mode().map(|m| m & 0o777).filter(|m| *m != 0);
        Ok(SourceEntry {
            path: rel,
            data,
            mode,
        })
    }
}

impl SourceReader for ZipSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Zip
    }

    fn location(&self) -> &Path {
        &self.path
    }

    fn read_subtree(&mut self, subtree: &str) -> Result<Vec<SourceEntry>> {
        let prefix = format!("{}/", subtree.trim_end_matches('/'));
        let mut entries = Vec::new();
        for (name, rel) in self.namespaced_files()? {
            if !rel.starts_with(&prefix) || is_excluded_path(&rel) {
                continue;
            }
            entries.push(self.read_entry(&name, rel)?);
        }
        Ok(entries)
    }

    fn read_file(&mut self, rel: &str) -> Result<Option<SourceEntry>> {
        let name = format!("{SOURCE_NAMESPACE}/{rel}");
        match self.archive.by_name(&name) {
            Ok(_) => {}
            Err(ZipError::FileNotFound) => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open zip entry: {name}"));
            }
        }
        let rel = safe_relative_path(rel).ok_or_else(|| SyncError::UnsafeArchivePath(name.clone()))?;
        self.read_entry(&name, rel).map(Some)
    }
}

// =============================================================================
// Discovery
// =============================================================================

/// Which well-known parts a live source contains.
#[derive(Debug, Clone, Serialize)]
pub struct SourceValidation {
    pub skills: bool,
    pub agents: bool,
    pub commands: bool,
    pub rules: bool,
    pub claude_md: bool,
}

pub fn validate_source(source: &Path) -> SourceValidation {
    SourceValidation {
        skills: source.join("skills").is_dir(),
        agents: source.join("agents").is_dir(),
        commands: source.join("commands").is_dir(),
        rules: source.join("rules").is_dir(),
        claude_md: source.join("CLAUDE.md").is_file(),
    }
}

/// Resolve the live source root: an explicit directory, or `~/.claude`
/// when it looks like a real Claude installation (has `skills/`).
pub fn detect_source(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if path.is_dir() {
            return Ok(path.to_path_buf());
        }
        return Err(SyncError::SourceNotFound(path.to_path_buf()).into());
    }

    let mut candidates = Vec::new();
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(DEFAULT_SOURCE_DIR));
    }
    if let Some(profile) = std::env::var_os("USERPROFILE") {
        candidates.push(PathBuf::from(profile).join(DEFAULT_SOURCE_DIR));
    }

    candidates
        .iter()
        .find(|p| p.join("skills").is_dir())
        .cloned()
        .ok_or_else(|| {
            let shown = candidates
                .first()
                .cloned()
                .unwrap_or_else(|| PathBuf::from("~").join(DEFAULT_SOURCE_DIR));
            SyncError::SourceNotFound(shown).into()
        })
}

/// Resolve the archive to sync from: an explicit path, or the newest
/// `claudekit-*/*.zip` under the temp directories.
pub fn find_latest_zip(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(SyncError::ArchiveNotFound(path.to_path_buf()).into());
        }
        return Ok(fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()));
    }

    let mut roots = vec![PathBuf::from("/tmp"), std::env::temp_dir()];
    roots.dedup();

    let mut latest: Option<(SystemTime, PathBuf)> = None;
    for root in roots.iter().filter(|r| r.is_dir()) {
        for dir in fs::read_dir(root)?.filter_map(|e| e.ok()) {
            let dir_path = dir.path();
            let is_candidate_dir = dir.file_name().to_string_lossy().starts_with("claudekit-")
                && dir_path.is_dir();
            if !is_candidate_dir {
                continue;
            }
            let Ok(files) = fs::read_dir(&dir_path) else {
                continue;
            };
            for file in files.filter_map(|e| e.ok()) {
                let path = file.path();
                if path.extension().is_none_or(|ext| ext != "zip") {
                    continue;
                }
                let modified = file
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                if latest.as_ref().is_none_or(|(t, _)| modified > *t) {
                    latest = Some((modified, path));
                }
            }
        }
    }

    latest
        .map(|(_, path)| fs::canonicalize(&path).unwrap_or(path))
        .ok_or_else(|| SyncError::NoArchiveFound.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, files: &[(&str, &str, u32)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, body, mode) in files {
            let options = SimpleFileOptions::default().unix_permissions(*mode);
            zip.start_file(*name, options).unwrap();
            zip.write_all(body.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_dir_source_lists_subtree_sorted() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("rules/nested")).unwrap();
        fs::write(root.join("rules/b.md"), "b").unwrap();
        fs::write(root.join("rules/nested/a.md"), "a").unwrap();
        fs::create_dir_all(root.join("rules/node_modules")).unwrap();
        fs::write(root.join("rules/node_modules/x.js"), "x").unwrap();

        let mut source = DirSource::new(root);
        let entries = source.read_subtree("rules").unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["rules/b.md", "rules/nested/a.md"]);
        assert_eq!(entries[0].data, b"b");
    }

    #[test]
    fn test_dir_source_missing_subtree_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let mut source = DirSource::new(temp_dir.path());
        assert!(source.read_subtree("scripts").unwrap().is_empty());
        assert!(source.read_file(".ck.json").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_dir_source_keeps_executable_bits() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let script = temp_dir.path().join("scripts/run.sh");
        fs::create_dir_all(script.parent().unwrap()).unwrap();
        fs::write(&script, "#!/bin/sh").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(temp_dir.path().join("scripts/plain.txt"), "x").unwrap();

        let mut source = DirSource::new(temp_dir.path());
        let entries = source.read_subtree("scripts").unwrap();
        let plain = entries.iter().find(|e| e.path == "scripts/plain.txt").unwrap();
        let run = entries.iter().find(|e| e.path == "scripts/run.sh").unwrap();
        assert_eq!(plain.mode, None);
        assert_eq!(run.mode, Some(0o755));
    }

    #[test]
    fn test_zip_source_reads_namespace() {
        let temp_dir = TempDir::new().unwrap();
        let zip_path = temp_dir.path().join("kit.zip");
        write_zip(
            &zip_path,
            &[
                (".claude/rules/a.md", "# a", 0o644),
                (".claude/scripts/run.sh", "#!/bin/sh", 0o755),
                (".claude/.ck.json", "{}", 0o644),
                ("README.md", "outside", 0o644),
            ],
        );

        let mut source = ZipSource::open(&zip_path).unwrap();
        assert_eq!(source.kind(), SourceKind::Zip);

        let rules = source.read_subtree("rules").unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].path, "rules/a.md");

        let scripts = source.read_subtree("scripts").unwrap();
        assert_eq!(scripts[0].mode, Some(0o755));

        let ck = source.read_file(".ck.json").unwrap().unwrap();
        assert_eq!(ck.data, b"{}");
        assert!(source.read_file(".env.example").unwrap().is_none());
    }

    #[test]
    fn test_zip_source_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let zip_path = temp_dir.path().join("evil.zip");
        write_zip(&zip_path, &[(".claude/rules/../../escape.md", "x", 0o644)]);

        let mut source = ZipSource::open(&zip_path).unwrap();
        let err = source.read_subtree("rules").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::UnsafeArchivePath(_))
        ));
    }

    #[test]
    fn test_validate_source_reports_parts() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("skills")).unwrap();
        fs::write(temp_dir.path().join("CLAUDE.md"), "# hi").unwrap();

        let report = validate_source(temp_dir.path());
        assert!(report.skills);
        assert!(report.claude_md);
        assert!(!report.agents);
    }

    #[test]
    fn test_detect_source_explicit_missing_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = detect_source(Some(&temp_dir.path().join("nope"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::SourceNotFound(_))
        ));
    }

    #[test]
    fn test_find_latest_zip_explicit_missing() {
        let temp_dir = TempDir::new().unwrap();
        let err = find_latest_zip(Some(&temp_dir.path().join("none.zip"))).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SyncError>(),
            Some(SyncError::ArchiveNotFound(_))
        ));
    }
}
