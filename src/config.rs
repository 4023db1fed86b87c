//! Configuration management for SentinelFS

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default copy chunk size: 2 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 21;

/// Default shadow file suffix
pub const DEFAULT_SHADOW_SUFFIX: &str = ".bak";

/// Default maximum path length accepted by the classifier
pub const DEFAULT_MAX_PATH_LEN: usize = 1024;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Protected-directory classification
    pub protect: ProtectConfig,

    /// Backup engine configuration
    pub backup: BackupConfig,

    /// Mount configuration
    pub mount: MountConfig,
}

/// Protected-directory classification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtectConfig {
    /// Directory-name markers; a file is protected when any marker appears
    /// as a component of its parent directory (case-insensitive)
    pub markers: Vec<String>,

    /// Paths longer than this are rejected as unprotected
    pub max_path_len: usize,
}

/// Backup engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Suffix appended to the original path to form the shadow path
    pub suffix: String,

    /// Copy buffer size in bytes
    pub chunk_size: usize,
}

/// Mount configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    /// Directory exposed through the mount (the volume being filtered)
    pub lower_dir: PathBuf,

    /// Mount point path
    pub mount_point: PathBuf,

    /// Allow other users to access the mount
    pub allow_other: bool,

    /// Allow root to access the mount
    pub allow_root: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            protect: ProtectConfig::default(),
            backup: BackupConfig::default(),
            mount: MountConfig::default(),
        }
    }
}

impl Default for ProtectConfig {
    fn default() -> Self {
        ProtectConfig {
            markers: vec!["secret".to_string(), "private".to_string()],
            max_path_len: DEFAULT_MAX_PATH_LEN,
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        BackupConfig {
            suffix: DEFAULT_SHADOW_SUFFIX.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Default for MountConfig {
    fn default() -> Self {
        MountConfig {
            lower_dir: PathBuf::from("/srv/data"),
            mount_point: PathBuf::from("/mnt/sentinelfs"),
            allow_other: false,
            allow_root: false,
        }
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let mut config: Config = serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

        config.apply_env_overrides();

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(markers) = std::env::var("SENTINELFS_MARKERS") {
            let markers: Vec<String> = markers
                .split(',')
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty())
                .collect();
            if !markers.is_empty() {
                self.protect.markers = markers;
            }
        }

        if let Ok(suffix) = std::env::var("SENTINELFS_SHADOW_SUFFIX") {
            let suffix = suffix.trim().to_string();
            if !suffix.is_empty() {
                self.backup.suffix = suffix;
            }
        }

        if let Ok(chunk_size) = std::env::var("SENTINELFS_CHUNK_SIZE") {
            if let Ok(size) = chunk_size.trim().parse::<usize>() {
                self.backup.chunk_size = size;
            }
        }
    }

    /// Save configuration to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path.as_ref(), content)
            .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.protect.markers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one protected-directory marker is required".to_string(),
            ));
        }

        if self.protect.max_path_len == 0 {
            return Err(Error::InvalidConfig(
                "Maximum path length must be greater than 0".to_string(),
            ));
        }

        if self.backup.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "Chunk size must be greater than 0".to_string(),
            ));
        }

        if self.backup.suffix.is_empty() {
            return Err(Error::InvalidConfig(
                "Shadow suffix must not be empty".to_string(),
            ));
        }

        if self.backup.suffix.contains('/') {
            return Err(Error::InvalidConfig(
                "Shadow suffix must not contain path separators".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backup.chunk_size, DEFAULT_CHUNK_SIZE);
        assert_eq!(config.backup.suffix, ".bak");
        assert_eq!(config.protect.markers, vec!["secret", "private"]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.backup.chunk_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.backup.suffix = "a/b".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.protect.markers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = Config::default();
        config.backup.suffix = ".orig".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.backup.suffix, ".orig");
        assert_eq!(loaded.protect.markers, config.protect.markers);
    }
}
