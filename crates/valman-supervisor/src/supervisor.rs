//! The server lifecycle state machine.
//!
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`, with crashes
//! discovered only when the process table is sampled. There is no push
//! notification of process death anywhere in this module.

use crate::launcher::{native_plan, LaunchPlan};
use crate::runner::{NativeRunner, ProcessRunner};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use valman_common::{
    ManagedProcess, ProcessResult, ProcessStatus, ServerOptions, SupervisorError,
    SupervisorResult, SystemProcess,
};
use valman_log_collection::ServerLogCollector;

/// Timing knobs for the start/stop/auto-restart loops.
///
/// The defaults are the production values; tests shrink the intervals.
#[derive(Debug, Clone, Copy)]
pub struct SupervisorOptions {
    /// Liveness checks performed after a spawn before declaring success.
    pub liveness_checks: u32,
    /// Pause between liveness checks and between stop attempts.
    pub poll_interval: Duration,
    /// Interrupt-and-wait rounds before giving up on a stop.
    pub stop_attempts: u32,
    /// Cadence of the auto-restart check.
    pub auto_restart_interval: Duration,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            liveness_checks: 3,
            poll_interval: Duration::from_secs(10),
            stop_attempts: 3,
            auto_restart_interval: Duration::from_secs(30),
        }
    }
}

/// Supervises exactly one dedicated server process.
pub struct ProcessSupervisor {
    server: ServerOptions,
    plan: LaunchPlan,
    runner: Arc<dyn ProcessRunner>,
    logs: Arc<ServerLogCollector>,
    opts: SupervisorOptions,
    /// While set, the auto-restart tick is allowed to act. Cleared as the
    /// first step of every explicit stop.
    auto_start: AtomicBool,
    /// Serializes start against stop. A stop must not interleave with a
    /// start's verification window.
    op_lock: tokio::sync::Mutex<()>,
    /// The single tracked process instance, if any.
    current: Mutex<Option<ManagedProcess>>,
    auto_task: Mutex<Option<JoinHandle<()>>>,
    auto_cancel: Mutex<CancellationToken>,
}

impl ProcessSupervisor {
    /// Create a supervisor backed by the real operating system.
    pub fn new(server: ServerOptions, logs: Arc<ServerLogCollector>) -> Self {
        Self::with_runner(
            server,
            logs,
            Arc::new(NativeRunner),
            native_plan(),
            SupervisorOptions::default(),
        )
    }

    /// Create a supervisor with an injected OS collaborator and timing.
    pub fn with_runner(
        server: ServerOptions,
        logs: Arc<ServerLogCollector>,
        runner: Arc<dyn ProcessRunner>,
        plan: LaunchPlan,
        opts: SupervisorOptions,
    ) -> Self {
        Self {
            server,
            plan,
            runner,
            logs,
            opts,
            auto_start: AtomicBool::new(false),
            op_lock: tokio::sync::Mutex::new(()),
            current: Mutex::new(None),
            auto_task: Mutex::new(None),
            auto_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Name the supervised process shows up as in the process table.
    pub fn process_name(&self) -> &str {
        self.plan.process_name
    }

    /// Generate the platform launch script.
    ///
    /// Returns whether the expected executable permissions were verified;
    /// `start()` should not be attempted when this is `false`.
    pub fn generate_launch_artifact(&self) -> SupervisorResult<bool> {
        self.plan.generate(&self.server)
    }

    /// Sample the process table for the supervised server.
    ///
    /// A tracked process that is no longer found is a detected crash: the
    /// tracked instance is reset and a warning logged.
    pub fn is_running(&self) -> ProcessResult<Option<SystemProcess>> {
        let found = self.runner.find_by_name(self.plan.process_name)?;
        if found.is_none() {
            let mut current = self.current.lock();
            if current.take().is_some() {
                warn!("the server process is no longer running; marking it stopped");
            }
        }
        Ok(found)
    }

    /// The currently tracked process instance, if any.
    pub fn managed(&self) -> Option<ManagedProcess> {
        self.current.lock().clone()
    }

    /// Whether the auto-restart flag is set.
    pub fn auto_start_enabled(&self) -> bool {
        self.auto_start.load(Ordering::SeqCst)
    }

    /// Register a callback for batched server output.
    pub fn subscribe_to_output(&self, callback: impl Fn(&str) + Send + Sync + 'static) {
        self.logs.subscribe(callback);
    }

    /// Attempt to start the dedicated server.
    ///
    /// Fails with [`SupervisorError::AlreadyRunning`] when a matching
    /// process is already found (nothing is spawned in that case). After
    /// the spawn, liveness is verified with `liveness_checks` samples
    /// spaced `poll_interval` apart; any miss fails with
    /// [`SupervisorError::StartTimeout`].
    pub async fn start(&self) -> SupervisorResult<ManagedProcess> {
        let _guard = self.op_lock.lock().await;
        self.start_locked().await
    }

    async fn start_locked(&self) -> SupervisorResult<ManagedProcess> {
        info!("starting the dedicated server");

        if let Some(found) = self.runner.find_by_name(self.plan.process_name)? {
            return Err(SupervisorError::AlreadyRunning { pid: found.pid });
        }

        if self.server.password.is_empty() {
            warn!("no server password is configured; the server may refuse to start");
        }

        let launch_file = self.plan.launch_file(&self.server.server_location);
        let handle = self
            .runner
            .spawn_server(&launch_file, &self.server.server_location)?;

        if let Some(pid) = handle.pid {
            *self.current.lock() = Some(ManagedProcess {
                pid,
                display_name: self.plan.process_name.to_string(),
                status: ProcessStatus::Starting,
            });
        }

        if let Some(stdout) = handle.stdout {
            spawn_output_reader(Arc::clone(&self.logs), stdout, "stdout");
        }
        if let Some(stderr) = handle.stderr {
            spawn_output_reader(Arc::clone(&self.logs), stderr, "stderr");
        }

        // Verify the launch by sampling the process table; a single miss is
        // a failed start.
        let checks = self.opts.liveness_checks.max(1);
        let mut last = None;
        for check in 1..=checks {
            tokio::time::sleep(self.opts.poll_interval).await;
            last = self.runner.find_by_name(self.plan.process_name)?;
            if last.is_none() {
                *self.current.lock() = None;
                return Err(SupervisorError::StartTimeout { checks });
            }
            debug!(check, checks, "liveness check passed");
        }

        let found = last.expect("liveness loop always runs at least once");
        let managed = ManagedProcess {
            pid: found.pid,
            display_name: found.name,
            status: ProcessStatus::Running,
        };
        *self.current.lock() = Some(managed.clone());

        info!(
            pid = managed.pid,
            log_file = %self.logs.log_path().display(),
            "successfully started the dedicated server"
        );
        Ok(managed)
    }

    /// Attempt to stop the dedicated server.
    ///
    /// Clears the auto-restart flag before anything else, so a crash during
    /// shutdown is not "healed" by the restart tick. Then up to
    /// `stop_attempts` rounds: a liveness miss is success; a hit gets one
    /// interrupt signal and a `poll_interval` wait. Exhausting the rounds
    /// fails with [`SupervisorError::StopTimeout`].
    ///
    /// Idempotent: stopping an already stopped server succeeds without
    /// sending any signal.
    pub async fn stop(&self) -> SupervisorResult<()> {
        self.auto_start.store(false, Ordering::SeqCst);

        let _guard = self.op_lock.lock().await;
        info!("stopping the dedicated server");

        for _ in 0..self.opts.stop_attempts {
            match self.runner.find_by_name(self.plan.process_name)? {
                None => {
                    *self.current.lock() = None;
                    info!("successfully stopped the dedicated server");
                    return Ok(());
                }
                Some(found) => {
                    if let Some(current) = self.current.lock().as_mut() {
                        current.status = ProcessStatus::Stopping;
                    }
                    self.runner.interrupt(found.pid)?;
                    tokio::time::sleep(self.opts.poll_interval).await;
                }
            }
        }

        Err(SupervisorError::StopTimeout {
            attempts: self.opts.stop_attempts,
        })
    }

    /// Enable automatic restarts.
    ///
    /// Arms a periodic check: while the flag is still set, a liveness miss
    /// triggers a `start()`. Failures inside the tick are logged and the
    /// timer survives; the task only exits when the flag is cleared.
    pub fn enable_auto_start(self: Arc<Self>) {
        info!("enabling automatic restarts of the server");
        self.auto_start.store(true, Ordering::SeqCst);

        let mut task = self.auto_task.lock();
        if let Some(existing) = task.as_ref() {
            if !existing.is_finished() {
                return;
            }
        }

        let token = CancellationToken::new();
        *self.auto_cancel.lock() = token.clone();

        let supervisor = Arc::clone(&self);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(supervisor.opts.auto_restart_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // Re-check the flag immediately before acting: an
                        // explicit stop clears it first and must win.
                        if !supervisor.auto_start.load(Ordering::SeqCst) {
                            break;
                        }
                        match supervisor.is_running() {
                            Ok(Some(_)) => {}
                            Ok(None) => {
                                if !supervisor.auto_start.load(Ordering::SeqCst) {
                                    break;
                                }
                                info!("auto start: the server is not running, restarting it");
                                if let Err(e) = supervisor.start().await {
                                    warn!(error = %e, "auto start: failed to restart the server");
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "auto start: liveness check failed");
                            }
                        }
                    }
                }
            }
            debug!("auto start task exited");
        }));
    }

    /// Disable automatic restarts and disarm the periodic check.
    pub fn disable_auto_start(&self) {
        info!("disabling automatic restarts of the server");
        self.auto_start.store(false, Ordering::SeqCst);
        self.auto_cancel.lock().cancel();
        if let Some(task) = self.auto_task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.auto_cancel.lock().cancel();
        if let Some(task) = self.auto_task.lock().take() {
            task.abort();
        }
    }
}

/// Forward every line of a server output stream to the log collector.
fn spawn_output_reader(
    logs: Arc<ServerLogCollector>,
    stream: Box<dyn AsyncRead + Send + Unpin>,
    stream_name: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let mut chunk = line;
                    chunk.push('\n');
                    if let Err(e) = logs.append(&chunk) {
                        warn!(stream = stream_name, error = %e, "failed to capture server output");
                    }
                }
                Ok(None) => {
                    debug!(stream = stream_name, "server output stream ended");
                    break;
                }
                Err(e) => {
                    warn!(stream = stream_name, error = %e, "error reading server output");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ServerHandle;
    use std::path::Path;
    use std::sync::atomic::AtomicU32;

    const FAKE_PID: u32 = 4321;

    /// Scripted OS collaborator. `alive` is what the process table reports;
    /// `kill_after` counts how many interrupts the fake process survives.
    struct FakeRunner {
        alive: AtomicBool,
        spawn_makes_alive: bool,
        kill_after: AtomicU32,
        spawn_count: AtomicU32,
        interrupt_count: AtomicU32,
    }

    impl FakeRunner {
        fn new(alive: bool, spawn_makes_alive: bool, kill_after: u32) -> Arc<Self> {
            Arc::new(Self {
                alive: AtomicBool::new(alive),
                spawn_makes_alive,
                kill_after: AtomicU32::new(kill_after),
                spawn_count: AtomicU32::new(0),
                interrupt_count: AtomicU32::new(0),
            })
        }

        fn spawns(&self) -> u32 {
            self.spawn_count.load(Ordering::SeqCst)
        }

        fn interrupts(&self) -> u32 {
            self.interrupt_count.load(Ordering::SeqCst)
        }
    }

    impl ProcessRunner for FakeRunner {
        fn spawn_server(&self, _launch_file: &Path, _cwd: &Path) -> SupervisorResult<ServerHandle> {
            self.spawn_count.fetch_add(1, Ordering::SeqCst);
            if self.spawn_makes_alive {
                self.alive.store(true, Ordering::SeqCst);
            }
            Ok(ServerHandle {
                pid: Some(FAKE_PID),
                stdout: None,
                stderr: None,
            })
        }

        fn find_by_name(&self, pattern: &str) -> ProcessResult<Option<SystemProcess>> {
            Ok(self.alive.load(Ordering::SeqCst).then(|| SystemProcess {
                pid: FAKE_PID,
                name: pattern.to_string(),
            }))
        }

        fn interrupt(&self, _pid: u32) -> ProcessResult<()> {
            self.interrupt_count.fetch_add(1, Ordering::SeqCst);
            let remaining = self.kill_after.load(Ordering::SeqCst);
            if remaining <= 1 {
                self.alive.store(false, Ordering::SeqCst);
            } else {
                self.kill_after.store(remaining - 1, Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn test_supervisor(
        runner: Arc<FakeRunner>,
    ) -> (Arc<ProcessSupervisor>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let logs = Arc::new(ServerLogCollector::new(dir.path().join("ServerLog.txt")).unwrap());
        let server = ServerOptions {
            name: "Test Server".to_string(),
            port: 2456,
            world: "Test".to_string(),
            password: "secret".to_string(),
            server_location: dir.path().to_path_buf(),
        };
        let opts = SupervisorOptions {
            liveness_checks: 3,
            poll_interval: Duration::from_millis(5),
            stop_attempts: 3,
            auto_restart_interval: Duration::from_millis(20),
        };
        let supervisor = Arc::new(ProcessSupervisor::with_runner(
            server,
            logs,
            runner,
            native_plan(),
            opts,
        ));
        (supervisor, dir)
    }

    #[tokio::test]
    async fn test_start_fails_when_already_running_without_spawning() {
        let runner = FakeRunner::new(true, false, u32::MAX);
        let (supervisor, _dir) = test_supervisor(Arc::clone(&runner));

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::AlreadyRunning { pid: FAKE_PID }
        ));
        assert_eq!(runner.spawns(), 0, "no second process may be spawned");
    }

    #[tokio::test]
    async fn test_start_returns_managed_process_on_success() {
        let runner = FakeRunner::new(false, true, u32::MAX);
        let (supervisor, _dir) = test_supervisor(Arc::clone(&runner));

        let managed = supervisor.start().await.unwrap();
        assert_eq!(managed.pid, FAKE_PID);
        assert_eq!(managed.status, ProcessStatus::Running);
        assert_eq!(runner.spawns(), 1);
        assert_eq!(supervisor.managed().unwrap().status, ProcessStatus::Running);
    }

    #[tokio::test]
    async fn test_start_times_out_when_process_never_appears() {
        let runner = FakeRunner::new(false, false, u32::MAX);
        let (supervisor, _dir) = test_supervisor(Arc::clone(&runner));

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, SupervisorError::StartTimeout { checks: 3 }));
        assert_eq!(runner.spawns(), 1);
        assert!(supervisor.managed().is_none());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_sends_no_signal() {
        let runner = FakeRunner::new(false, false, u32::MAX);
        let (supervisor, _dir) = test_supervisor(Arc::clone(&runner));

        supervisor.stop().await.unwrap();
        assert_eq!(runner.interrupts(), 0);
    }

    #[tokio::test]
    async fn test_stop_succeeds_after_one_interrupt() {
        let runner = FakeRunner::new(true, false, 1);
        let (supervisor, _dir) = test_supervisor(Arc::clone(&runner));

        supervisor.stop().await.unwrap();
        assert_eq!(runner.interrupts(), 1);
        assert!(supervisor.managed().is_none());
    }

    #[tokio::test]
    async fn test_stop_times_out_after_three_interrupts() {
        let runner = FakeRunner::new(true, false, u32::MAX);
        let (supervisor, _dir) = test_supervisor(Arc::clone(&runner));

        let err = supervisor.stop().await.unwrap_err();
        assert!(matches!(err, SupervisorError::StopTimeout { attempts: 3 }));
        assert_eq!(runner.interrupts(), 3);
    }

    #[tokio::test]
    async fn test_stop_clears_auto_start_flag_first() {
        let runner = FakeRunner::new(false, false, u32::MAX);
        let (supervisor, _dir) = test_supervisor(runner);

        supervisor.clone().enable_auto_start();
        assert!(supervisor.auto_start_enabled());

        supervisor.stop().await.unwrap();
        assert!(!supervisor.auto_start_enabled());
    }

    #[tokio::test]
    async fn test_crash_detected_on_sample_resets_tracked_process() {
        let runner = FakeRunner::new(false, true, u32::MAX);
        let (supervisor, _dir) = test_supervisor(Arc::clone(&runner));

        supervisor.start().await.unwrap();
        assert!(supervisor.managed().is_some());

        // Simulate the process dying behind our back.
        runner.alive.store(false, Ordering::SeqCst);

        assert!(supervisor.is_running().unwrap().is_none());
        assert!(supervisor.managed().is_none());
    }

    #[tokio::test]
    async fn test_auto_start_restarts_a_missing_server() {
        let runner = FakeRunner::new(false, true, u32::MAX);
        let (supervisor, _dir) = test_supervisor(Arc::clone(&runner));

        supervisor.clone().enable_auto_start();
        tokio::time::sleep(Duration::from_millis(300)).await;
        supervisor.disable_auto_start();

        assert!(runner.spawns() >= 1, "auto start should have spawned the server");
        assert!(supervisor.is_running().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_auto_start_tick_does_nothing_while_running() {
        let runner = FakeRunner::new(true, false, u32::MAX);
        let (supervisor, _dir) = test_supervisor(Arc::clone(&runner));

        supervisor.clone().enable_auto_start();
        tokio::time::sleep(Duration::from_millis(150)).await;
        supervisor.disable_auto_start();

        assert_eq!(runner.spawns(), 0);
    }
}
