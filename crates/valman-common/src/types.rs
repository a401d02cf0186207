//! Core domain types shared across the valman crates.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Lifecycle status of the managed server process.
///
/// Transitions follow `Stopped -> Starting -> Running -> Stopping -> Stopped`.
/// A crash is discovered only when the process table is sampled, at which
/// point the tracked process is reset to `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ProcessStatus {
    /// Check if the process is doing anything (running or transitioning).
    pub fn is_active(&self) -> bool {
        !matches!(self, ProcessStatus::Stopped)
    }

    /// Check if the process is between stable states.
    pub fn is_transitional(&self) -> bool {
        matches!(self, ProcessStatus::Starting | ProcessStatus::Stopping)
    }
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Stopping => write!(f, "stopping"),
        }
    }
}

/// The single server process under supervision.
///
/// Exactly one instance is tracked at a time: created when a start succeeds,
/// dropped when a stop succeeds or a crash is detected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedProcess {
    pub pid: u32,
    pub display_name: String,
    pub status: ProcessStatus,
}

/// A point-in-time match from the OS process table.
///
/// This is a sample, not a subscription; the process may be gone by the time
/// the caller acts on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemProcess {
    pub pid: u32,
    pub name: String,
}

/// One backup unit on disk.
///
/// Identity is the file name, which encodes the minute-granularity creation
/// timestamp. `age` is signed and relative to the moment of listing: more
/// negative means older.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupEntry {
    pub file_name: String,
    pub world_name: String,
    pub full_path: PathBuf,
    pub created_at: DateTime<Utc>,
    #[serde(with = "duration_seconds")]
    pub age: Duration,
    pub size_bytes: u64,
}

/// Backup scheduling policy, immutable for the life of a manager instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupPolicy {
    pub frequency_minutes: u64,
    pub retention_count: usize,
}

/// Serialize `chrono::Duration` as whole seconds (signed).
mod duration_seconds {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.num_seconds().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Ok(Duration::seconds(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ProcessStatus::Stopped.to_string(), "stopped");
        assert_eq!(ProcessStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_status_predicates() {
        assert!(!ProcessStatus::Stopped.is_active());
        assert!(ProcessStatus::Running.is_active());
        assert!(ProcessStatus::Starting.is_transitional());
        assert!(ProcessStatus::Stopping.is_transitional());
        assert!(!ProcessStatus::Running.is_transitional());
    }

    #[test]
    fn test_backup_entry_age_roundtrip() {
        let entry = BackupEntry {
            file_name: "2024-01-01 00-00.zip".to_string(),
            world_name: "Test".to_string(),
            full_path: PathBuf::from("/backups/Test/2024-01-01 00-00.zip"),
            created_at: Utc::now(),
            age: Duration::seconds(-86400),
            size_bytes: 1024,
        };
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: BackupEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.age, Duration::seconds(-86400));
    }
}
