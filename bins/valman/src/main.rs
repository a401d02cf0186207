use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

mod commands;

/// valman - dedicated game-server manager
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path (YAML)
    #[arg(short, long, value_name = "FILE", default_value = "valman.yaml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the manager: server, log capture, and scheduled backups
    Run {
        /// Restart the server automatically if it is found not running
        #[arg(long, default_value_t = true)]
        auto_restart: bool,
    },
    /// Show whether the server is running
    Status,
    /// Start the server
    Start,
    /// Stop the server
    Stop,
    /// Create a backup of the configured world now
    BackupCreate,
    /// List the backups of the configured world
    BackupList,
    /// Stop the server, restore the named backup, and start the server
    BackupRestore {
        /// Backup file name as shown by backup-list
        file_name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = valman_common::ManagerConfig::load_from_file(&args.config)?;
    initialize_logging(args.debug, &config.logging.level)?;

    info!(config = %args.config, "loaded configuration");

    let manager = commands::Manager::build(config)?;

    match args.command {
        Command::Run { auto_restart } => commands::run(&manager, auto_restart).await,
        Command::Status => commands::status(&manager),
        Command::Start => commands::start(&manager).await,
        Command::Stop => commands::stop(&manager).await,
        Command::BackupCreate => commands::backup_create(&manager).await,
        Command::BackupList => commands::backup_list(&manager),
        Command::BackupRestore { file_name } => {
            commands::backup_restore(&manager, &file_name).await
        }
    }
}

fn initialize_logging(debug: bool, configured_level: &str) -> Result<()> {
    let level = if debug { "debug" } else { configured_level };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_target(false)
        .init();

    Ok(())
}
