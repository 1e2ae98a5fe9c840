//! Configuration management for docker-backup.
//!
//! Loads configuration from an optional TOML file, then applies the
//! `DOCKER_BACKUP_DIR` environment override.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::utils::errors::{BackupError, Result};

/// Environment variable overriding [`BackupConfig::dir`].
pub const BACKUP_DIR_ENV: &str = "DOCKER_BACKUP_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Root directory of the backup set
    #[serde(default = "default_backup_dir")]
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerConfig {
    /// Docker socket path (platform default when unset)
    #[serde(default)]
    pub socket: Option<String>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Image used for disposable volume helper containers
    #[serde(default = "default_helper_image")]
    pub helper_image: String,

    /// Grace period before a stopped container is killed
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_backup_dir() -> PathBuf {
    PathBuf::from("backups")
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_helper_image() -> String {
    "alpine:latest".to_string()
}

fn default_stop_timeout_secs() -> i64 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            dir: default_backup_dir(),
        }
    }
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: None,
            timeout_secs: default_timeout_secs(),
            helper_image: default_helper_image(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backup: BackupConfig::default(),
            docker: DockerConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| BackupError::Config(e.to_string()))
    }

    /// Load from `path` when given, otherwise start from defaults, then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        if let Ok(dir) = std::env::var(BACKUP_DIR_ENV) {
            if !dir.is_empty() {
                config.backup.dir = PathBuf::from(dir);
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.backup.dir, PathBuf::from("backups"));
        assert_eq!(config.docker.helper_image, "alpine:latest");
        assert_eq!(config.docker.timeout_secs, 120);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config = Config::from_toml(
            r#"
            [backup]
            dir = "/srv/docker-backups"

            [docker]
            helper_image = "busybox:1.36"
            "#,
        )
        .unwrap();

        assert_eq!(config.backup.dir, PathBuf::from("/srv/docker-backups"));
        assert_eq!(config.docker.helper_image, "busybox:1.36");
        assert_eq!(config.docker.stop_timeout_secs, 10);
        assert!(config.docker.socket.is_none());
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Config::from_toml("[backup\ndir = 1").unwrap_err();
        assert!(matches!(err, BackupError::Config(_)));
    }
}
