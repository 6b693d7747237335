//! Pending notification commands.

use chrono::{TimeZone, Utc};
use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;

use vx_core::config::ConfigHandle;
use vx_core::error::VxResult;
use vx_models::NotificationSnapshot;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum NotificationsAction {
    /// Show the pending notifications per room.
    Show,
    /// Dismiss pending notifications.
    Dismiss {
        /// Only dismiss events at or before this timestamp (ms since epoch).
        #[arg(long)]
        before: Option<u64>,
    },
}

pub async fn run(
    config: ConfigHandle,
    action: NotificationsAction,
    format: OutputFormat,
) -> VxResult<()> {
    match action {
        NotificationsAction::Show => {
            let db = super::init_database(&config).await?;
            let snapshot = NotificationSnapshot::load(&*db.conn()?)?.unwrap_or_default();
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&snapshot).unwrap_or_default());
                }
                OutputFormat::Text => print_snapshot(&snapshot),
            }
        }
        NotificationsAction::Dismiss { before } => {
            let registry = super::build_registry(&config, None).await?;
            let notifications = registry.notifications();
            match before {
                Some(ts) => notifications.dismiss_before(ts)?,
                None => notifications.dismiss_all()?,
            }
            let snapshot = notifications.snapshot().await;
            registry.shutdown_all().await?;
            let snapshot = snapshot?;
            println!(
                "  {} Dismissed; {} event(s) still pending.",
                style("OK").green().bold(),
                snapshot.rooms.event_count()
            );
        }
    }

    Ok(())
}

fn print_snapshot(snapshot: &NotificationSnapshot) {
    if snapshot.rooms.is_empty() {
        println!("  No pending notifications.");
    } else {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Room", "Events", "Latest", "From", "Rule"]);
        for (room_id, events) in snapshot.rooms.rooms() {
            let Some(latest) = events.last() else { continue };
            table.add_row(vec![
                room_id.to_string(),
                events.len().to_string(),
                format_ts(latest.origin_server_ts),
                latest.sender.clone(),
                latest.rule.rule_id.clone(),
            ]);
        }
        println!("{table}");
    }
    if snapshot.dismissed_before > 0 {
        println!("  Dismissed up to {}", format_ts(snapshot.dismissed_before));
    }
}

fn format_ts(ms: u64) -> String {
    match Utc.timestamp_millis_opt(ms as i64).single() {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ms.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_ts() {
        assert_eq!(format_ts(0), "1970-01-01 00:00:00");
        assert_eq!(format_ts(1_700_000_000_000), "2023-11-14 22:13:20");
    }
}
