//! Process discovery by name match.
//!
//! Provides a point-in-time scan of the OS process table. There is no
//! subscription to process death; liveness is always sampled.

use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System};
use valman_common::{ProcessResult, SystemProcess};

/// Find the first process whose name or command line contains `pattern`.
///
/// Returns `Ok(None)` when no process matches. The result is a sample of the
/// process table at the moment of the call; the process may exit (or appear)
/// immediately afterwards.
///
/// The command line is consulted as well as the short process name because
/// some platforms truncate the name reported by the kernel.
pub fn find_process(pattern: &str) -> ProcessResult<Option<SystemProcess>> {
    let mut sys = System::new();
    sys.refresh_processes_specifics(
        ProcessesToUpdate::All,
        true,
        ProcessRefreshKind::nothing().with_cmd(sysinfo::UpdateKind::Always),
    );

    for (pid, process) in sys.processes() {
        let name = process.name().to_string_lossy();
        if name.contains(pattern) {
            return Ok(Some(SystemProcess {
                pid: pid.as_u32(),
                name: name.into_owned(),
            }));
        }

        let matches_cmd = process
            .cmd()
            .iter()
            .any(|arg| arg.to_string_lossy().contains(pattern));
        if matches_cmd {
            return Ok(Some(SystemProcess {
                pid: pid.as_u32(),
                name: name.into_owned(),
            }));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_match_for_unlikely_name() {
        let result = find_process("definitely-not-a-real-process-name-xyz").unwrap();
        assert!(result.is_none());
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_finds_init_process() {
        // PID 1 always exists on Linux; its name varies (init/systemd) so
        // search for something from our own command line instead.
        let own = std::env::args().next().unwrap();
        let needle = std::path::Path::new(&own)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let result = find_process(&needle).unwrap();
        assert!(result.is_some(), "expected to find own process {}", needle);
    }
}
