//! Interrupt delivery.
//!
//! Exactly one interrupt is sent per call; there is no escalation to a hard
//! kill anywhere in this crate. A process that ignores the interrupt is the
//! caller's problem to report.

use valman_common::{ProcessError, ProcessResult};

/// Send an interrupt signal to a process (SIGINT on unix, a console
/// Ctrl+Break event on windows).
///
/// A process that no longer exists counts as success: the goal of an
/// interrupt is a stopped process, and it already is one.
pub fn interrupt(pid: u32) -> ProcessResult<()> {
    #[cfg(unix)]
    {
        interrupt_unix(pid)
    }

    #[cfg(windows)]
    {
        interrupt_windows(pid)
    }
}

#[cfg(unix)]
fn interrupt_unix(pid: u32) -> ProcessResult<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        Ok(()) => Ok(()),
        // Already gone
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(e) => Err(ProcessError::signal(pid, e.to_string())),
    }
}

#[cfg(windows)]
fn interrupt_windows(pid: u32) -> ProcessResult<()> {
    use std::sync::Mutex;
    use windows::Win32::System::Console::{
        AttachConsole, FreeConsole, GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT,
    };

    // Console attach/detach is process-global state; serialize it.
    static CONSOLE_LOCK: Mutex<()> = Mutex::new(());
    let _guard = CONSOLE_LOCK.lock().unwrap();

    unsafe {
        if AttachConsole(pid).is_err() {
            // The target has no console or is already gone; either way no
            // interrupt can or needs to be delivered.
            return Ok(());
        }

        let result = GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid);
        let _ = FreeConsole();

        result.map_err(|e| ProcessError::signal(pid, e.to_string()))
    }
}
