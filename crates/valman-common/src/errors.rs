//! Error types shared across the valman crates.
//!
//! Each subsystem gets its own error enum so that crate dependencies stay
//! one-directional: the process primitives know nothing about backups, and
//! the backup manager never needs to name a supervisor failure.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from the OS process primitives (lookup, signalling) and the log
/// collector's file I/O.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process table could not be scanned.
    #[error("process lookup failed: {reason}")]
    Lookup { reason: String },

    /// A signal could not be delivered to a live process.
    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },

    /// Server log capture failed.
    #[error("log collection error: {reason}")]
    Logging { reason: String },

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProcessError {
    pub fn lookup(reason: impl Into<String>) -> Self {
        Self::Lookup {
            reason: reason.into(),
        }
    }

    pub fn signal(pid: u32, reason: impl Into<String>) -> Self {
        Self::Signal {
            pid,
            reason: reason.into(),
        }
    }

    pub fn logging(reason: impl Into<String>) -> Self {
        Self::Logging {
            reason: reason.into(),
        }
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

/// Errors from the server lifecycle state machine.
///
/// These are always returned to the caller, never swallowed; the caller
/// decides whether to retry, alert, or escalate.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// A matching server process was found before spawning a new one.
    #[error("a dedicated server is already running with pid {pid}")]
    AlreadyRunning { pid: u32 },

    /// The spawned server never showed up in the process table.
    #[error(
        "the server failed to start within {checks} liveness checks; review the server log for details"
    )]
    StartTimeout { checks: u32 },

    /// The server was still running after every interrupt attempt.
    #[error("the server failed to stop after {attempts} interrupt attempts")]
    StopTimeout { attempts: u32 },

    /// The launch artifact could not be executed.
    #[error("failed to spawn the server process: {reason}")]
    Spawn { reason: String },

    /// The launch artifact could not be generated or verified.
    #[error("launch artifact error: {reason}")]
    LaunchArtifact { reason: String },

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SupervisorError {
    pub fn spawn(reason: impl Into<String>) -> Self {
        Self::Spawn {
            reason: reason.into(),
        }
    }

    pub fn launch_artifact(reason: impl Into<String>) -> Self {
        Self::LaunchArtifact {
            reason: reason.into(),
        }
    }
}

/// Result type for supervisor operations.
pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;

/// Errors from backup creation, rotation, and restoration.
#[derive(Debug, Error)]
pub enum BackupError {
    /// A world file exists but holds no data.
    #[error("world file has no data: {path}")]
    EmptySource { path: PathBuf },

    /// An archive exists but holds no data.
    #[error("archive has no data: {path}")]
    EmptyArchive { path: PathBuf },

    /// A file in the backup directory does not follow the timestamp naming.
    #[error("invalid backup file name: {name}")]
    InvalidName { name: String },

    /// The archive codec failed.
    #[error("archive error: {reason}")]
    Archive { reason: String },

    /// A backup attempt failed; wraps the underlying cause. No partial
    /// backup is registered as valid when this is returned.
    #[error("backup failed: {source}")]
    BackupFailed {
        #[source]
        source: Box<BackupError>,
    },

    /// A restore attempt failed; wraps the underlying cause. The original
    /// world files have been put back before this is returned.
    #[error("failed to restore the world from {backup}: {source}")]
    RestoreFailed {
        backup: PathBuf,
        #[source]
        source: Box<BackupError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    pub fn archive(reason: impl Into<String>) -> Self {
        Self::Archive {
            reason: reason.into(),
        }
    }

    pub fn backup_failed(source: BackupError) -> Self {
        Self::BackupFailed {
            source: Box::new(source),
        }
    }

    pub fn restore_failed(backup: impl Into<PathBuf>, source: BackupError) -> Self {
        Self::RestoreFailed {
            backup: backup.into(),
            source: Box::new(source),
        }
    }
}

/// Result type for backup operations.
pub type BackupResult<T> = std::result::Result<T, BackupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_error_construction() {
        let err = ProcessError::lookup("ps failed");
        assert!(matches!(err, ProcessError::Lookup { .. }));
        assert_eq!(err.to_string(), "process lookup failed: ps failed");

        let err = ProcessError::signal(42, "no permission");
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_supervisor_error_messages() {
        let err = SupervisorError::AlreadyRunning { pid: 1234 };
        assert!(err.to_string().contains("1234"));

        let err = SupervisorError::StartTimeout { checks: 3 };
        assert!(err.to_string().contains("3 liveness checks"));

        let err = SupervisorError::StopTimeout { attempts: 3 };
        assert!(err.to_string().contains("3 interrupt attempts"));
    }

    #[test]
    fn test_backup_error_wraps_cause() {
        let cause = BackupError::EmptySource {
            path: PathBuf::from("/worlds/Test.db"),
        };
        let err = BackupError::backup_failed(cause);
        assert!(err.to_string().starts_with("backup failed:"));
        assert!(err.to_string().contains("Test.db"));

        let cause = BackupError::EmptyArchive {
            path: PathBuf::from("/backups/x.zip"),
        };
        let err = BackupError::restore_failed("/backups/x.zip", cause);
        match err {
            BackupError::RestoreFailed { ref backup, .. } => {
                assert_eq!(backup, &PathBuf::from("/backups/x.zip"));
            }
            ref e => panic!("expected RestoreFailed, got: {:?}", e),
        }
    }
}
