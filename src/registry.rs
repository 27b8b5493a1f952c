//! Sync registry
//!
//! Per-file provenance for a destination root: the hash of the source and
//! of the written destination at the last managed write. A destination
//! whose on-disk hash no longer matches was edited by the user.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::hash::hash_file;

pub const REGISTRY_FILE: &str = ".claudekit-sync-registry.json";

const REGISTRY_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registry {
    pub version: u32,
    pub last_sync: Option<String>,
    pub source_dir: Option<String>,
    #[serde(default)]
    pub entries: BTreeMap<String, RegistryEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    #[serde(rename = "sourceHash", default)]
    pub source_hash: String,
    #[serde(rename = "targetHash", alias = "destinationHash", default)]
    pub destination_hash: String,
    #[serde(rename = "syncedAt")]
    pub synced_at: String,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION,
            last_sync: None,
            source_dir: None,
            entries: BTreeMap::new(),
        }
    }
}

impl Registry {
    /// Load the registry of a destination root, empty when absent.
    pub fn load(codex_home: &Path) -> Result<Self> {
        let path = codex_home.join(REGISTRY_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read registry: {}", path.display()))?;
        let reg: Registry = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse registry JSON: {}", path.display()))?;
        Ok(reg)
    }

    /// Rewrite the registry file wholesale, stamping `lastSync`.
    pub fn save(&mut self, codex_home: &Path) -> Result<()> {
        let path = codex_home.join(REGISTRY_FILE);
        self.last_sync = Some(Utc::now().to_rfc3339());
        let body = serde_json::to_string_pretty(self)?;
        fs::create_dir_all(codex_home).with_context(|| {
            format!("failed to create registry dir: {}", codex_home.display())
        })?;
        fs::write(&path, body)
            .with_context(|| format!("failed to write registry: {}", path.display()))?;
        Ok(())
    }

    pub fn get(&self, rel_path: &str) -> Option<&RegistryEntry> {
        self.entries.get(rel_path)
    }

    /// Record a managed write of `rel_path`.
    pub fn record(&mut self, rel_path: &str, source_hash: String, destination_hash: String) {
        self.entries.insert(
            rel_path.to_string(),
            RegistryEntry {
                source_hash,
                destination_hash,
                synced_at: Utc::now().to_rfc3339(),
            },
        );
    }

    /// Re-stamp the destination hash of an existing entry after the tool
    /// itself rewrote the file. Unknown paths are left untracked.
    pub fn refresh_destination(&mut self, rel_path: &str, destination_hash: String) {
        if let Some(entry) = self.entries.get_mut(rel_path) {
            entry.destination_hash = destination_hash;
            entry.synced_at = Utc::now().to_rfc3339();
        }
    }

    pub fn remove(&mut self, rel_path: &str) -> Option<RegistryEntry> {
        self.entries.remove(rel_path)
    }

    /// True when `target` exists, has a registry entry, and its content no
    /// longer matches the hash recorded at the last managed write.
    pub fn is_user_edited(&self, rel_path: &str, target: &Path) -> Result<bool> {
        let Some(entry) = self.entries.get(rel_path) else {
            return Ok(false);
        };
        if !target.is_file() {
            return Ok(false);
        }
        Ok(hash_file(target)? != entry.destination_hash)
    }
}
