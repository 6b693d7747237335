//! Session management commands.

use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;

use vx_core::config::ConfigHandle;
use vx_core::error::{VxError, VxResult};
use vx_models::StoredSession;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum SessionsAction {
    /// List stored sessions.
    List,
    /// Store a session this device is logged into.
    Add {
        /// Matrix user id, e.g. @alice:example.org.
        user_id: String,
        /// Home server base URL.
        homeserver: String,
        /// Access token of the session.
        access_token: String,
        /// Device id of the session.
        #[arg(long)]
        device_id: Option<String>,
    },
    /// Remove a session, deleting its pusher first when registered.
    Remove {
        /// Matrix user id.
        user_id: String,
    },
}

pub async fn run(config: ConfigHandle, action: SessionsAction, format: OutputFormat) -> VxResult<()> {
    match action {
        SessionsAction::List => {
            let db = super::init_database(&config).await?;
            let sessions = StoredSession::load_all(&*db.conn()?)?;
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&sessions).unwrap_or_default());
                }
                OutputFormat::Text => {
                    if sessions.is_empty() {
                        println!("  No sessions stored.");
                        return Ok(());
                    }
                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL)
                        .apply_modifier(UTF8_ROUND_CORNERS)
                        .set_content_arrangement(ContentArrangement::Dynamic);
                    table.set_header(vec!["User", "Home server", "Device", "Added"]);
                    for session in &sessions {
                        table.add_row(vec![
                            session.user_id.clone(),
                            session.base_url().to_string(),
                            session.device_id.clone().unwrap_or_default(),
                            session.created_at.clone(),
                        ]);
                    }
                    println!("{table}");
                }
            }
        }
        SessionsAction::Add {
            user_id,
            homeserver,
            access_token,
            device_id,
        } => {
            if !user_id.starts_with('@') || !user_id.contains(':') {
                return Err(VxError::Config(format!("not a Matrix user id: {user_id}")));
            }
            let db = super::init_database(&config).await?;
            let mut session = StoredSession::new(&user_id, homeserver, access_token);
            session.device_id = device_id;
            session.save(&*db.conn()?)?;
            println!("  {} Session {user_id} stored.", style("OK").green().bold());
        }
        SessionsAction::Remove { user_id } => {
            let registry = super::build_registry(&config, None).await?;
            let removed_pusher = registry.coordinator().remove_session(&user_id).await?;
            let deleted = StoredSession::delete(&*registry.database.conn()?, &user_id)?;
            registry.shutdown_all().await?;

            if !deleted {
                return Err(VxError::NotFound(format!("session {user_id}")));
            }
            println!(
                "  {} Session {user_id} removed{}.",
                style("OK").green().bold(),
                if removed_pusher { "" } else { " (it had no pusher)" }
            );
        }
    }

    Ok(())
}
