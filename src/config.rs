//! Backup configuration file loading.
//!
//! Mirrors the original archiver's config: a flat JSON object whose
//! path-valued fields are expanded for `${VAR}` references and a leading
//! `~` before use.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    table_dir: String,
    file_dir: String,
    key_path: String,
    restore_dir: String,
    backup_roots: Vec<String>,
    #[serde(default)]
    hard_remove: bool,
}

/// Fully expanded, ready-to-use backup configuration.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub table_dir: PathBuf,
    pub file_dir: PathBuf,
    pub key_path: PathBuf,
    pub restore_dir: PathBuf,
    pub backup_roots: Vec<PathBuf>,
    pub hard_remove: bool,
}

fn expand(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::full(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.to_string()))
}

impl BackupConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let contents = fs::read_to_string(path)?;
        let raw: RawConfig = serde_json::from_str(&contents)?;
        Ok(Self {
            table_dir: expand(&raw.table_dir),
            file_dir: expand(&raw.file_dir),
            key_path: expand(&raw.key_path),
            restore_dir: expand(&raw.restore_dir),
            backup_roots: raw.backup_roots.iter().map(|r| expand(r)).collect(),
            hard_remove: raw.hard_remove,
        })
    }

    /// Read the Fernet key stored at `key_path` as a urlsafe-base64 string.
    pub fn load_key(&self) -> Result<String, ConfigError> {
        Ok(fs::read_to_string(&self.key_path)?.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = BackupConfig::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn expands_tilde_and_env_vars() {
        std::env::set_var("COLDVAULT_TEST_DIR", "/tmp/coldvault-test");
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        fs::write(
            &config_path,
            r#"{
                "table_dir": "${COLDVAULT_TEST_DIR}/table",
                "file_dir": "${COLDVAULT_TEST_DIR}/blobs",
                "key_path": "${COLDVAULT_TEST_DIR}/key",
                "restore_dir": "${COLDVAULT_TEST_DIR}/restore",
                "backup_roots": ["${COLDVAULT_TEST_DIR}/src"],
                "hard_remove": true
            }"#,
        )
        .unwrap();

        let cfg = BackupConfig::load(&config_path).unwrap();
        assert_eq!(cfg.table_dir, PathBuf::from("/tmp/coldvault-test/table"));
        assert!(cfg.hard_remove);
    }
}
