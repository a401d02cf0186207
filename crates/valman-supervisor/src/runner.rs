//! The OS collaborator behind the supervisor.
//!
//! [`ProcessRunner`] is the seam between the supervisor's state machine and
//! the operating system: spawning the launch artifact, sampling the process
//! table, and delivering interrupts. Tests substitute a fake; production
//! uses [`NativeRunner`].

use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncRead;
use tracing::debug;
use valman_common::{ProcessResult, SupervisorError, SupervisorResult, SystemProcess};

/// A freshly spawned server process.
///
/// The output streams are surrendered to the caller; the child itself is
/// reaped in the background so a crashed server never lingers as a zombie
/// in the process table (which would fool the name-based liveness check).
pub struct ServerHandle {
    pub pid: Option<u32>,
    pub stdout: Option<Box<dyn AsyncRead + Send + Unpin>>,
    pub stderr: Option<Box<dyn AsyncRead + Send + Unpin>>,
}

/// Operating-system surface needed to supervise the server.
pub trait ProcessRunner: Send + Sync {
    /// Execute the launch artifact with `cwd` as working directory.
    fn spawn_server(&self, launch_file: &Path, cwd: &Path) -> SupervisorResult<ServerHandle>;

    /// Sample the process table for a name match.
    fn find_by_name(&self, pattern: &str) -> ProcessResult<Option<SystemProcess>>;

    /// Deliver one interrupt signal.
    fn interrupt(&self, pid: u32) -> ProcessResult<()>;
}

/// Production [`ProcessRunner`] backed by `tokio::process` and the OS
/// process primitives.
pub struct NativeRunner;

impl ProcessRunner for NativeRunner {
    fn spawn_server(&self, launch_file: &Path, cwd: &Path) -> SupervisorResult<ServerHandle> {
        let mut command = build_command(launch_file);
        command
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| SupervisorError::spawn(format!("{}: {}", launch_file.display(), e)))?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>);
        let stderr = child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Send + Unpin>);

        // Reap the child on exit. Liveness is tracked through the process
        // table, not through this handle.
        tokio::spawn(async move {
            let status = child.wait().await;
            debug!(?status, "launch process exited");
        });

        Ok(ServerHandle {
            pid,
            stdout,
            stderr,
        })
    }

    fn find_by_name(&self, pattern: &str) -> ProcessResult<Option<SystemProcess>> {
        valman_process::find_process(pattern)
    }

    fn interrupt(&self, pid: u32) -> ProcessResult<()> {
        valman_process::interrupt(pid)
    }
}

#[cfg(windows)]
fn build_command(launch_file: &Path) -> tokio::process::Command {
    // Batch files need the shell.
    let mut command = tokio::process::Command::new("cmd");
    command.arg("/C").arg(launch_file);
    command
}

#[cfg(not(windows))]
fn build_command(launch_file: &Path) -> tokio::process::Command {
    tokio::process::Command::new(launch_file)
}
