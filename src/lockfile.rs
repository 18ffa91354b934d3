//! The lock file: a cross-install record of resolved versions.
//!
//! `skills-lock.json` maps skill name to the resolved version, content
//! address, and dependency names. Installs read-modify-write it so
//! unrelated entries survive; a malformed file is treated as empty with a
//! warning. Writes are best-effort and must never abort an install.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::process::SkillVersion;

/// One locked skill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockEntry {
    pub version: String,
    pub arweave_tx_id: String,
    /// ISO-8601 time the version was resolved.
    pub resolved_at: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
}

/// The lock file: skill name -> locked entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LockFile {
    #[serde(flatten)]
    pub skills: BTreeMap<String, LockEntry>,
}

impl LockFile {
    /// Load from `path`. Absent means empty; malformed means empty with a
    /// warning.
    pub fn load(path: &Path) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&raw) {
            Ok(lock) => lock,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "lock file is malformed, treating as empty"
                );
                Self::default()
            }
        }
    }

    /// Record the installed skills, replacing their entries and keeping
    /// everything else.
    pub fn record(&mut self, installed: &[SkillVersion]) {
        let now = Utc::now().to_rfc3339();
        for skill in installed {
            self.skills.insert(
                skill.name.clone(),
                LockEntry {
                    version: skill.version.clone(),
                    arweave_tx_id: skill.arweave_tx_id.clone(),
                    resolved_at: now.clone(),
                    dependencies: skill.dependencies.clone(),
                },
            );
        }
    }

    /// Write to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::filesystem(format!("failed to create {}", parent.display())).with_cause(e)
            })?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::filesystem("failed to serialize the lock file").with_cause(e))?;
        std::fs::write(path, content).map_err(|e| {
            Error::filesystem(format!("failed to write {}", path.display())).with_cause(e)
        })
    }
}

/// Read-modify-write `path` with the installed set. Returns the merged
/// lock file; callers downgrade failures to warnings.
pub fn update(path: &Path, installed: &[SkillVersion]) -> Result<LockFile> {
    let mut lock = LockFile::load(path);
    lock.record(installed);
    lock.save(path)?;
    Ok(lock)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skill(name: &str, skill_version: &str, deps: &[&str]) -> SkillVersion {
        SkillVersion {
            name: name.to_string(),
            version: skill_version.to_string(),
            description: "test".to_string(),
            author: "tester".to_string(),
            tags: Vec::new(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            mcp_servers: Vec::new(),
            changelog: None,
            owner: "O".repeat(43),
            arweave_tx_id: "T".repeat(43),
            published_at: 0,
            updated_at: 0,
            download_count: 0,
            download_timestamps: Vec::new(),
        }
    }

    #[test]
    fn test_load_absent_is_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = LockFile::load(&tmp.path().join("skills-lock.json"));
        assert!(lock.skills.is_empty());
    }

    #[test]
    fn test_malformed_treated_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skills-lock.json");
        std::fs::write(&path, "{ not json").unwrap();
        let lock = LockFile::load(&path);
        assert!(lock.skills.is_empty());
    }

    #[test]
    fn test_update_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skills-lock.json");

        update(&path, &[skill("ao-basics", "1.0.0", &["dep-a"])]).unwrap();

        let lock = LockFile::load(&path);
        let entry = &lock.skills["ao-basics"];
        assert_eq!(entry.version, "1.0.0");
        assert_eq!(entry.arweave_tx_id, "T".repeat(43));
        assert_eq!(entry.dependencies, vec!["dep-a"]);
        assert!(!entry.resolved_at.is_empty());
    }

    #[test]
    fn test_update_preserves_unrelated_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skills-lock.json");

        update(&path, &[skill("keep-me", "1.0.0", &[])]).unwrap();
        update(&path, &[skill("new-one", "2.0.0", &[])]).unwrap();

        let lock = LockFile::load(&path);
        assert_eq!(lock.skills.len(), 2);
        assert!(lock.skills.contains_key("keep-me"));
        assert!(lock.skills.contains_key("new-one"));
    }

    #[test]
    fn test_update_replaces_same_name() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skills-lock.json");

        update(&path, &[skill("ao-basics", "1.0.0", &[])]).unwrap();
        update(&path, &[skill("ao-basics", "2.0.0", &[])]).unwrap();

        let lock = LockFile::load(&path);
        assert_eq!(lock.skills.len(), 1);
        assert_eq!(lock.skills["ao-basics"].version, "2.0.0");
    }

    #[test]
    fn test_flat_json_shape() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skills-lock.json");
        update(&path, &[skill("ao-basics", "1.0.0", &[])]).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        // Keyed directly by skill name, camelCase fields.
        assert_eq!(raw["ao-basics"]["version"], "1.0.0");
        assert!(raw["ao-basics"]["arweaveTxId"].is_string());
        assert!(raw["ao-basics"]["resolvedAt"].is_string());
    }

    #[test]
    fn test_malformed_then_write_recovers() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("skills-lock.json");
        std::fs::write(&path, "garbage").unwrap();

        update(&path, &[skill("ao-basics", "1.0.0", &[])]).unwrap();
        let lock = LockFile::load(&path);
        assert_eq!(lock.skills.len(), 1);
    }
}
