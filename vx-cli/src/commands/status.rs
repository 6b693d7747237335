//! Status command - show registration, session and notification status.

use console::style;
use vx_core::config::ConfigHandle;
use vx_core::error::VxResult;
use vx_models::models::settings::keys;
use vx_models::{NotificationSnapshot, PersistedRegistration, PushPreferences, Settings, StoredSession};
use crate::OutputFormat;

/// Run the status command.
pub async fn run(config: ConfigHandle, format: OutputFormat) -> VxResult<()> {
    let push = config.push().await;
    let db_path = config.read().await.effective_db_path()?;
    let db = super::init_database(&config).await?;
    let conn = db.conn()?;

    let registration = PersistedRegistration::load(&conn);
    let prefs = PushPreferences::load(&conn)?;
    let sessions = StoredSession::load_all(&conn)?;
    let stream_ids: Vec<String> =
        Settings::get_json(&conn, keys::STREAM_USER_IDS)?.unwrap_or_default();
    let crashed = Settings::get_bool_or(&conn, keys::LAST_RUN_CRASHED, false)?;
    let snapshot = NotificationSnapshot::load(&conn)?.unwrap_or_default();
    drop(conn);
    let stats = db.stats()?;
    let file_size = std::fs::metadata(&db_path).ok().map(|m| m.len());

    match format {
        OutputFormat::Json => {
            let (state, token) = match &registration {
                Ok(record) => (
                    serde_json::json!(record.state.tag()),
                    serde_json::json!(record.token.as_deref().map(super::mask)),
                ),
                Err(e) => (serde_json::json!(format!("corrupt: {e}")), serde_json::Value::Null),
            };
            let json = serde_json::json!({
                "push_enabled": push.enabled,
                "registration_state": state,
                "token": token,
                "pusher_url": push.pusher_url,
                "device_display_name": push.effective_device_name(),
                "sessions": sessions.iter().map(|s| &s.user_id).collect::<Vec<_>>(),
                "preferences": prefs,
                "stream": {
                    "user_ids": stream_ids,
                    "last_run_crashed": crashed,
                },
                "notifications": {
                    "rooms": snapshot.rooms.room_count(),
                    "events": snapshot.rooms.event_count(),
                    "dismissed_before": snapshot.dismissed_before,
                },
                "database": {
                    "path": db_path.display().to_string(),
                    "file_size_bytes": file_size,
                    "settings": stats.settings,
                    "sessions": stats.sessions,
                },
            });
            println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
        }
        OutputFormat::Text => {
            println!("{}", style("Push Registration").bold().underlined());
            println!(
                "  Provider:  {}",
                if push.enabled {
                    style("available").green().to_string()
                } else {
                    style("disabled (background sync only)").yellow().to_string()
                }
            );
            match &registration {
                Ok(record) => {
                    let state = match record.state.tag() {
                        tag if record.state.is_transient() => style(tag).yellow(),
                        tag => style(tag).cyan(),
                    };
                    println!("  State:     {state}");
                    println!(
                        "  Token:     {}",
                        record
                            .token
                            .as_deref()
                            .map(super::mask)
                            .unwrap_or_else(|| "none".into())
                    );
                }
                Err(e) => println!("  State:     {} ({e})", style("corrupt").red()),
            }
            println!("  Gateway:   {}", push.pusher_url);
            println!("  Device:    {}", push.effective_device_name());

            println!();
            println!("{}", style("Sessions").bold().underlined());
            if sessions.is_empty() {
                println!("  No sessions stored.");
            }
            for session in &sessions {
                println!("  {}  {}", session.user_id, style(session.base_url()).dim());
            }

            println!();
            println!("{}", style("Preferences").bold().underlined());
            println!("  Notifications:       {}", on_off(prefs.allow_notifications));
            println!("  Content to push:     {}", on_off(prefs.allow_content_sending_to_push));
            println!("  Background sync:     {}", on_off(prefs.allow_background_sync));
            println!("  Turn screen on:      {}", on_off(prefs.turn_screen_on));
            println!("  Start on boot:       {}", on_off(prefs.auto_start_on_boot));
            println!("  Sync timeout/delay:  {}ms / {}ms", prefs.sync_timeout_ms, prefs.sync_delay_ms);

            println!();
            println!("{}", style("Event Stream").bold().underlined());
            println!(
                "  Monitored:  {}",
                if stream_ids.is_empty() {
                    "none".to_string()
                } else {
                    stream_ids.join(", ")
                }
            );
            if crashed {
                println!("  Last run:   {}", style("crashed, no auto-restart").red());
            }

            println!();
            println!("{}", style("Notifications").bold().underlined());
            println!(
                "  Pending:    {} event(s) in {} room(s)",
                snapshot.rooms.event_count(),
                snapshot.rooms.room_count()
            );

            println!();
            println!("{}", style("Local Database").bold().underlined());
            println!("  Path:       {}", db_path.display());
            if let Some(size) = file_size {
                println!("  Disk usage: {}", super::format_bytes(size));
            }
        }
    }

    Ok(())
}

fn on_off(value: bool) -> String {
    if value {
        style("on").green().to_string()
    } else {
        style("off").dim().to_string()
    }
}
