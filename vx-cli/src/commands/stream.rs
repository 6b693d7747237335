//! Event stream state commands.
//!
//! The stream itself runs inside the client; these commands read and reset
//! what it persisted for restarts.

use clap::Subcommand;
use console::style;

use vx_core::config::ConfigHandle;
use vx_core::error::VxResult;
use vx_models::models::settings::keys;
use vx_models::{PushPreferences, Settings};
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum StreamAction {
    /// Show the persisted stream state and whether it would auto-restart.
    Status,
    /// Clear the crash marker so the stream may auto-restart again.
    ClearCrash,
    /// Forget the monitored sessions; auto-restart stays off until the next start.
    Forget,
}

pub async fn run(config: ConfigHandle, action: StreamAction, format: OutputFormat) -> VxResult<()> {
    let db = super::init_database(&config).await?;
    let conn = db.conn()?;

    match action {
        StreamAction::Status => {
            let user_ids: Vec<String> =
                Settings::get_json(&conn, keys::STREAM_USER_IDS)?.unwrap_or_default();
            let crashed = Settings::get_bool_or(&conn, keys::LAST_RUN_CRASHED, false)?;
            let prefs = PushPreferences::load(&conn)?;
            let blocker = restart_blocker(&user_ids, crashed, prefs.allow_background_sync);

            match format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::json!({
                            "user_ids": user_ids,
                            "last_run_crashed": crashed,
                            "background_sync": prefs.allow_background_sync,
                            "auto_restart": blocker.is_none(),
                            "blocked_by": blocker,
                        })
                    );
                }
                OutputFormat::Text => {
                    println!("{}", style("Event Stream").bold().underlined());
                    for user_id in &user_ids {
                        println!("  monitors   {user_id}");
                    }
                    println!("  crashed    {crashed}");
                    match blocker {
                        None => println!("  {} would auto-restart", style("OK").green().bold()),
                        Some(reason) => {
                            println!("  {} no auto-restart: {reason}", style("OFF").yellow().bold())
                        }
                    }
                }
            }
        }
        StreamAction::ClearCrash => {
            Settings::set_bool(&conn, keys::LAST_RUN_CRASHED, false)?;
            println!("  {} Crash marker cleared.", style("OK").green().bold());
        }
        StreamAction::Forget => {
            Settings::delete(&conn, keys::STREAM_USER_IDS)?;
            println!("  {} Monitored sessions forgotten.", style("OK").green().bold());
        }
    }

    Ok(())
}

/// Why a restart of the stream would be refused, if it would be.
fn restart_blocker(user_ids: &[String], crashed: bool, background_sync: bool) -> Option<&'static str> {
    if crashed {
        Some("the last run crashed")
    } else if !background_sync {
        Some("background sync is disabled")
    } else if user_ids.is_empty() {
        Some("no sessions were being monitored")
    } else {
        None
    }
}
