//! # valman-common
//!
//! Shared foundations for the valman workspace: the error taxonomy, the
//! domain types, and the typed manager configuration.

pub mod config;
pub mod errors;
pub mod types;

pub use config::{
    default_worlds_directory, BackupOptions, LoggingOptions, ManagerConfig, ServerOptions,
};
pub use errors::{
    BackupError, BackupResult, ProcessError, ProcessResult, SupervisorError, SupervisorResult,
};
pub use types::{BackupEntry, BackupPolicy, ManagedProcess, ProcessStatus, SystemProcess};
