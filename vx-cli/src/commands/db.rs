//! Database management commands.

use clap::Subcommand;
use comfy_table::{Table, presets::UTF8_FULL, modifiers::UTF8_ROUND_CORNERS, ContentArrangement};
use console::style;
use dialoguer::Confirm;

use vx_core::config::ConfigHandle;
use vx_core::error::VxResult;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum DbAction {
    /// Show database statistics.
    Stats,
    /// Run an integrity check.
    Check,
    /// Reset the database (WARNING: forgets sessions, registration and preferences).
    Reset {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the database file path.
    Path,
}

pub async fn run(config: ConfigHandle, action: DbAction, format: OutputFormat) -> VxResult<()> {
    let db_path = config.read().await.effective_db_path()?;

    match action {
        DbAction::Stats => {
            let db = super::init_database(&config).await?;
            let stats = db.stats()?;

            let file_size = std::fs::metadata(&db_path).ok().map(|m| m.len());
            let wal_size = std::fs::metadata(db_path.with_extension("db-wal")).ok().map(|m| m.len());

            let conn = db.conn()?;
            let pragma = |name: &str| -> i64 {
                conn.query_row(&format!("PRAGMA {name}"), [], |row| row.get(0))
                    .unwrap_or(0)
            };
            let page_size = pragma("page_size");
            let page_count = pragma("page_count");
            let freelist_count = pragma("freelist_count");
            let journal_mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .unwrap_or_else(|_| "unknown".to_string());

            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({
                        "path": db_path.display().to_string(),
                        "tables": {
                            "settings": stats.settings,
                            "sessions": stats.sessions,
                            "notification_snapshot": stats.snapshots,
                        },
                        "file_size_bytes": file_size,
                        "wal_size_bytes": wal_size,
                        "journal_mode": journal_mode,
                        "page_size": page_size,
                        "page_count": page_count,
                        "freelist_count": freelist_count,
                    }));
                }
                OutputFormat::Text => {
                    println!("{}", style("Database Statistics").bold().underlined());
                    println!("  Path:          {}", db_path.display());
                    println!("  Journal mode:  {}", journal_mode);
                    println!();

                    let mut table = Table::new();
                    table
                        .load_preset(UTF8_FULL)
                        .apply_modifier(UTF8_ROUND_CORNERS)
                        .set_content_arrangement(ContentArrangement::Dynamic);
                    table.set_header(vec!["Table", "Row Count"]);
                    table.add_row(vec!["settings".to_string(), stats.settings.to_string()]);
                    table.add_row(vec!["sessions".to_string(), stats.sessions.to_string()]);
                    table.add_row(vec!["notification_snapshot".to_string(), stats.snapshots.to_string()]);
                    println!("{table}");

                    println!();
                    println!("{}", style("Storage").bold().underlined());
                    if let Some(size) = file_size {
                        println!("  Database:      {}", super::format_bytes(size));
                    }
                    if let Some(size) = wal_size {
                        println!("  WAL file:      {}", super::format_bytes(size));
                    }
                    println!("  Pages:         {page_count} x {page_size} bytes, {freelist_count} free");
                }
            }
        }
        DbAction::Check => {
            println!("  {} Running integrity check...", style("...").dim());
            let db = super::init_database(&config).await?;
            match db.run_integrity_check() {
                Ok(()) => println!("  {} Integrity check passed.", style("OK").green().bold()),
                Err(e) => println!("  {} Integrity check failed: {}", style("FAIL").red().bold(), e),
            }
        }
        DbAction::Reset { yes } => {
            println!(
                "  {} This forgets every session, the push registration and all preferences.",
                style("WARNING").red().bold()
            );
            println!("  Pushers already on home servers are NOT removed; run `push unregister` first.");
            println!("  Database: {}", db_path.display());

            let confirmed = yes
                || Confirm::new()
                    .with_prompt("  Are you sure you want to reset the database?")
                    .default(false)
                    .interact()
                    .unwrap_or(false);
            if !confirmed {
                println!("  Reset cancelled.");
                return Ok(());
            }

            let db = super::init_database(&config).await?;
            db.reset()?;
            println!("  {} Database reset complete.", style("OK").green().bold());
        }
        DbAction::Path => match format {
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"path": db_path.display().to_string()}));
            }
            OutputFormat::Text => println!("{}", db_path.display()),
        },
    }

    Ok(())
}
