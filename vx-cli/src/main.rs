//! Vector push CLI - inspect and drive push registration from the terminal.
//!
//! Useful for headless operation, scripting and debugging pusher problems
//! without the full client.

mod commands;

use clap::{Parser, Subcommand};
use tracing::info;

use vx_core::config::{AppConfig, ConfigHandle};
use vx_core::error::VxResult;
use vx_core::logging;
use vx_core::platform::Platform;

/// Vector push - registration, event stream and notification tooling.
#[derive(Parser)]
#[command(
    name = "vectorctl",
    version,
    about = "Vector push notification CLI",
    long_about = "A command-line interface for the Vector push subsystem.\n\
                   Register pushers, inspect sessions and pending notifications, and\n\
                   change the push preferences of this device."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show registration, session and preference status.
    Status,
    /// Register, unregister or reset this device's pushers.
    Push {
        #[command(subcommand)]
        action: commands::push::PushAction,
    },
    /// Manage the sessions this device is logged into.
    Sessions {
        #[command(subcommand)]
        action: commands::sessions::SessionsAction,
    },
    /// Inspect pushers on the home servers.
    Pushers {
        #[command(subcommand)]
        action: commands::pushers::PushersAction,
    },
    /// View and change push preferences.
    Settings {
        #[command(subcommand)]
        action: commands::settings::SettingsAction,
    },
    /// Inspect or dismiss pending notifications.
    Notifications {
        #[command(subcommand)]
        action: commands::notifications::NotificationsAction,
    },
    /// Inspect the persisted event stream state.
    Stream {
        #[command(subcommand)]
        action: commands::stream::StreamAction,
    },
    /// View application logs.
    Logs {
        /// Number of log lines to show.
        #[arg(short = 'n', long, default_value = "50")]
        count: u32,
        /// Follow log output in real-time (tail -f style).
        #[arg(short = 'F', long)]
        follow: bool,
        /// Filter log level (trace, debug, info, warn, error).
        #[arg(short, long)]
        level: Option<String>,
    },
    /// Database management commands.
    Db {
        #[command(subcommand)]
        action: commands::db::DbAction,
    },
}

#[tokio::main]
async fn main() -> VxResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match cli.config.as_deref() {
        Some(path) => AppConfig::load_from_file(std::path::Path::new(path))?,
        None => AppConfig::load_default()?,
    };

    // Initialize logging
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| std::path::PathBuf::from("logs"));
    let _guard = logging::init_logging(&log_level, &log_dir, config.logging.json_output)?;

    let config_handle = ConfigHandle::new(config);

    info!(
        "{} push CLI v{} on {:?}",
        vx_core::constants::APP_NAME,
        vx_core::constants::APP_VERSION,
        Platform::current()
    );

    // Dispatch to command handlers
    match cli.command {
        Commands::Status => commands::status::run(config_handle, cli.format).await,
        Commands::Push { action } => commands::push::run(config_handle, action, cli.format).await,
        Commands::Sessions { action } => {
            commands::sessions::run(config_handle, action, cli.format).await
        }
        Commands::Pushers { action } => {
            commands::pushers::run(config_handle, action, cli.format).await
        }
        Commands::Settings { action } => {
            commands::settings::run(config_handle, action, cli.format).await
        }
        Commands::Notifications { action } => {
            commands::notifications::run(config_handle, action, cli.format).await
        }
        Commands::Stream { action } => {
            commands::stream::run(config_handle, action, cli.format).await
        }
        Commands::Logs {
            count,
            follow,
            level,
        } => commands::logs::run(config_handle, count, follow, level, cli.format).await,
        Commands::Db { action } => commands::db::run(config_handle, action, cli.format).await,
    }
}
