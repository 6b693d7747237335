//! Pusher inspection commands.

use std::collections::HashMap;

use clap::Subcommand;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use console::style;

use vx_api::{push_tag, Pusher};
use vx_core::config::ConfigHandle;
use vx_core::error::VxResult;
use crate::OutputFormat;

#[derive(Subcommand)]
pub enum PushersAction {
    /// List this app's pushers on every session's home server.
    List,
    /// Check each session for a pusher matching this device.
    Diagnose,
}

/// What a session's pusher listing says about this device.
#[derive(Debug, PartialEq, Eq)]
enum Finding {
    Ok,
    Missing,
    StaleToken,
    WrongTag,
}

impl Finding {
    fn describe(&self) -> &'static str {
        match self {
            Self::Ok => "pusher registered",
            Self::Missing => "no pusher for this app",
            Self::StaleToken => "pusher uses another token; run `push force`",
            Self::WrongTag => "pusher has an unexpected profile tag",
        }
    }
}

fn diagnose(user_id: &str, token: Option<&str>, pushers: &[Pusher]) -> Finding {
    let tag = push_tag(user_id);
    let Some(token) = token else {
        return if pushers.is_empty() { Finding::Missing } else { Finding::StaleToken };
    };
    match pushers.iter().find(|p| p.pushkey == token) {
        Some(p) if p.profile_tag.as_deref() == Some(tag.as_str()) => Finding::Ok,
        Some(_) => Finding::WrongTag,
        None if pushers.is_empty() => Finding::Missing,
        None => Finding::StaleToken,
    }
}

pub async fn run(config: ConfigHandle, action: PushersAction, format: OutputFormat) -> VxResult<()> {
    let registry = super::build_registry(&config, None).await?;
    let coordinator = registry.coordinator();
    let listing = coordinator.refresh_pushers_list().await;
    let token = coordinator.token().await;
    registry.shutdown_all().await?;
    let listing: HashMap<String, Vec<Pusher>> = listing?;

    let mut user_ids: Vec<&String> = listing.keys().collect();
    user_ids.sort();

    match action {
        PushersAction::List => match format {
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&listing).unwrap_or_default());
            }
            OutputFormat::Text => {
                if user_ids.is_empty() {
                    println!("  No sessions stored.");
                    return Ok(());
                }
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .apply_modifier(UTF8_ROUND_CORNERS)
                    .set_content_arrangement(ContentArrangement::Dynamic);
                table.set_header(vec!["User", "Push key", "Device", "Profile tag", "Format"]);
                for user_id in &user_ids {
                    for pusher in &listing[*user_id] {
                        table.add_row(vec![
                            user_id.to_string(),
                            super::mask(&pusher.pushkey),
                            pusher.device_display_name.clone(),
                            pusher.profile_tag.clone().unwrap_or_default(),
                            pusher.data.format.clone().unwrap_or_else(|| "full".into()),
                        ]);
                    }
                }
                println!("{table}");
            }
        },
        PushersAction::Diagnose => {
            let findings: Vec<(&String, Finding)> = user_ids
                .iter()
                .map(|u| (*u, diagnose(u, token.as_deref(), &listing[*u])))
                .collect();
            match format {
                OutputFormat::Json => {
                    let json: Vec<_> = findings
                        .iter()
                        .map(|(u, f)| {
                            serde_json::json!({
                                "user_id": u,
                                "ok": *f == Finding::Ok,
                                "finding": f.describe(),
                            })
                        })
                        .collect();
                    println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
                }
                OutputFormat::Text => {
                    if token.is_none() {
                        println!("  {} No provider token stored.", style("WARN").yellow().bold());
                    }
                    for (user_id, finding) in &findings {
                        let mark = if *finding == Finding::Ok {
                            style("OK").green().bold()
                        } else {
                            style("FAIL").red().bold()
                        };
                        println!("  {mark} {user_id}: {}", finding.describe());
                    }
                }
            }
        }
    }

    Ok(())
}
