//! Command implementations.
//!
//! Typed failures from the core crates are translated here into short
//! actionable messages; raw error chains only go to the log.

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{error, info};
use valman_backup::BackupManager;
use valman_common::{ManagerConfig, SupervisorError};
use valman_log_collection::ServerLogCollector;
use valman_supervisor::ProcessSupervisor;

/// Delay before the emergency stop after a failed restore flow.
const EMERGENCY_STOP_DELAY: Duration = Duration::from_secs(5);

/// The wired-up subsystems behind every command.
pub struct Manager {
    pub config: ManagerConfig,
    pub logs: Arc<ServerLogCollector>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub backups: Arc<BackupManager>,
}

impl Manager {
    pub fn build(config: ManagerConfig) -> Result<Self> {
        let logs = Arc::new(
            ServerLogCollector::new(config.logging.directory.join("ServerLog.txt"))
                .context("failed to set up server log capture")?,
        );

        let supervisor = Arc::new(ProcessSupervisor::new(
            config.server.clone(),
            Arc::clone(&logs),
        ));

        let backups = Arc::new(
            BackupManager::new(
                &config.server.server_location,
                config.worlds_directory(),
                config.server.world.clone(),
                config.backup_policy(),
            )
            .context("failed to set up the backup manager")?,
        );

        Ok(Self {
            config,
            logs,
            supervisor,
            backups,
        })
    }
}

/// Run the manager until an interrupt or terminate signal arrives, then
/// stop the server in an orderly fashion before exiting.
pub async fn run(manager: &Manager, auto_restart: bool) -> Result<()> {
    match manager.supervisor.generate_launch_artifact() {
        Ok(true) => {}
        Ok(false) => bail!(
            "the launch file permissions could not be verified; fix the server directory and try again"
        ),
        Err(e) => return Err(e).context("failed to generate the launch file"),
    }

    manager.logs.arm();

    match manager.supervisor.start().await {
        Ok(managed) => info!(pid = managed.pid, "server is up"),
        Err(SupervisorError::AlreadyRunning { pid }) => {
            info!(pid, "server is already running; taking over supervision")
        }
        Err(e) => return Err(e).context("failed to start the server"),
    }

    if auto_restart {
        Arc::clone(&manager.supervisor).enable_auto_start();
    }
    Arc::clone(&manager.backups).resume_backups();

    wait_for_shutdown_signal().await;

    info!("shutting down");
    manager.backups.pause_backups();
    manager.supervisor.disable_auto_start();
    if let Err(e) = manager.supervisor.stop().await {
        error!(error = %e, "failed to stop the server during shutdown");
    }
    manager.logs.disarm();

    Ok(())
}

pub fn status(manager: &Manager) -> Result<()> {
    match manager.supervisor.is_running()? {
        Some(process) => println!(
            "The server is running: pid {}, process {}.",
            process.pid, process.name
        ),
        None => println!("The server is not running."),
    }
    Ok(())
}

pub async fn start(manager: &Manager) -> Result<()> {
    match manager.supervisor.generate_launch_artifact() {
        Ok(true) => {}
        Ok(false) => bail!("the launch file permissions could not be verified"),
        Err(e) => return Err(e).context("failed to generate the launch file"),
    }

    match manager.supervisor.start().await {
        Ok(managed) => {
            println!("Successfully started the server (pid {}).", managed.pid);
            Ok(())
        }
        Err(SupervisorError::AlreadyRunning { pid }) => {
            println!("The server is already running (pid {}).", pid);
            Ok(())
        }
        Err(e @ SupervisorError::StartTimeout { .. }) => {
            bail!("{} - check {}", e, manager.logs.log_path().display())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn stop(manager: &Manager) -> Result<()> {
    match manager.supervisor.stop().await {
        Ok(()) => {
            println!("The server is stopped.");
            Ok(())
        }
        Err(e @ SupervisorError::StopTimeout { .. }) => {
            bail!("{} - check {}", e, manager.logs.log_path().display())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn backup_create(manager: &Manager) -> Result<()> {
    let entry = manager.backups.create_backup().await?;
    manager.backups.clean_backups().await?;
    println!(
        "Created backup {} ({} bytes).",
        entry.file_name, entry.size_bytes
    );
    Ok(())
}

pub fn backup_list(manager: &Manager) -> Result<()> {
    let mut backups = manager.backups.list_backups()?;
    if backups.is_empty() {
        println!(
            "No backups found for world {}.",
            manager.config.server.world
        );
        return Ok(());
    }

    // Newest first.
    backups.sort_by_key(|b| std::cmp::Reverse(b.age));
    for backup in backups {
        let hours_old = -backup.age.num_hours();
        println!(
            "{}  {:>10} bytes  {}h old",
            backup.file_name, backup.size_bytes, hours_old
        );
    }
    Ok(())
}

/// The composite restore flow: stop the server, restore the world, start
/// the server again.
///
/// On any unexpected failure, the safe choice is a stopped server rather
/// than a possibly corrupt running one: an emergency stop is issued after a
/// short delay and the user is told to investigate.
pub async fn backup_restore(manager: &Manager, file_name: &str) -> Result<()> {
    let backups = manager.backups.list_backups()?;
    let target = backups
        .iter()
        .find(|b| b.file_name.eq_ignore_ascii_case(file_name));

    let Some(target) = target else {
        println!(
            "The backup {} does not exist. Use one of the names below.",
            file_name
        );
        println!("==BACKUP NAMES==");
        for backup in &backups {
            println!("  {}", backup.file_name);
        }
        return Ok(());
    };

    println!(
        "Restoring {} from {}...",
        manager.config.server.world, target.file_name
    );

    let flow = async {
        manager.supervisor.stop().await?;
        manager.backups.restore(&target.full_path).await?;
        manager.supervisor.start().await?;
        anyhow::Ok(())
    };

    match flow.await {
        Ok(()) => {
            println!("Successfully restored and started the server.");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "the restore flow failed");
            eprintln!(
                "There was an unexpected error processing the restore. An emergency shutdown \
                 of the server will be initiated. Investigate the error, restore the world \
                 manually if needed, and report the issue."
            );
            tokio::time::sleep(EMERGENCY_STOP_DELAY).await;
            if let Err(stop_err) = manager.supervisor.stop().await {
                error!(error = %stop_err, "emergency stop failed");
            }
            Err(e)
        }
    }
}

async fn wait_for_shutdown_signal() {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to create SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("failed to create SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => info!("received SIGTERM"),
            _ = sigint.recv() => info!("received SIGINT"),
        }
    }

    #[cfg(windows)]
    {
        let _ = signal::ctrl_c().await;
        info!("received Ctrl+C");
    }
}
