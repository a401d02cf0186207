//! Typed configuration for the manager.
//!
//! Every field is explicit; there is no dynamic property-path access. A
//! missing or mistyped key fails at load time, not when a method happens to
//! read it.

use crate::types::BackupPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    pub server: ServerOptions,
    #[serde(default)]
    pub backups: BackupOptions,
    #[serde(default)]
    pub logging: LoggingOptions,
}

/// Options describing the dedicated server to supervise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerOptions {
    /// Display name advertised by the server.
    pub name: String,
    /// UDP port the server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// World name; also names the save file pair and the backup directory.
    pub world: String,
    /// Access password. Empty is allowed but the server may refuse to start.
    #[serde(default)]
    pub password: String,
    /// Directory holding the server installation and the launch artifact.
    pub server_location: PathBuf,
}

/// Backup scheduling and retention options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupOptions {
    #[serde(default = "default_frequency_minutes")]
    pub frequency_minutes: u64,
    #[serde(default = "default_retention_count")]
    pub retention_count: usize,
    /// Directory holding the world save files. Defaults to the platform
    /// location used by the game when not set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worlds_directory: Option<PathBuf>,
}

/// Manager logging options. The server's own output goes to a fixed file
/// (`ServerLog.txt`) next to the manager log; rotation is an external
/// concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingOptions {
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_port() -> u16 {
    2456
}

fn default_frequency_minutes() -> u64 {
    120
}

fn default_retention_count() -> usize {
    6
}

fn default_log_directory() -> PathBuf {
    PathBuf::from("./logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            frequency_minutes: default_frequency_minutes(),
            retention_count: default_retention_count(),
            worlds_directory: None,
        }
    }
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            level: default_log_level(),
        }
    }
}

impl ManagerConfig {
    /// Load configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: ManagerConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, collecting every problem before failing.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.server.world.trim().is_empty() {
            problems.push("server.world must not be empty".to_string());
        }
        if self.server.name.trim().is_empty() {
            problems.push("server.name must not be empty".to_string());
        }
        if self.server.port == 0 {
            problems.push("server.port must not be 0".to_string());
        }
        if self.backups.retention_count == 0 {
            problems.push("backups.retention_count must be at least 1".to_string());
        }
        if self.backups.frequency_minutes == 0 {
            problems.push("backups.frequency_minutes must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("invalid configuration:\n  - {}", problems.join("\n  - "))
        }
    }

    /// The backup policy derived from this configuration.
    pub fn backup_policy(&self) -> BackupPolicy {
        BackupPolicy {
            frequency_minutes: self.backups.frequency_minutes,
            retention_count: self.backups.retention_count,
        }
    }

    /// The directory holding the world save file pair.
    pub fn worlds_directory(&self) -> PathBuf {
        if let Some(ref dir) = self.backups.worlds_directory {
            return dir.clone();
        }
        default_worlds_directory()
    }
}

/// Platform default for the game's world save directory.
pub fn default_worlds_directory() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));

    #[cfg(windows)]
    {
        home.join("AppData/LocalLow/IronGate/Valheim/worlds")
    }

    #[cfg(not(windows))]
    {
        home.join(".config/unity3d/IronGate/Valheim/worlds")
    }
}
