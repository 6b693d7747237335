//! Log viewing commands.

use std::path::{Path, PathBuf};

use console::style;

use vx_core::config::ConfigHandle;
use vx_core::error::VxResult;
use crate::OutputFormat;

/// Severity order used by the level filter, most severe first.
const LEVELS: [&str; 5] = ["ERROR", "WARN", "INFO", "DEBUG", "TRACE"];

/// Run the logs command.
pub async fn run(
    config: ConfigHandle,
    count: u32,
    follow: bool,
    level_filter: Option<String>,
    format: OutputFormat,
) -> VxResult<()> {
    let log_dir = config.read().await.effective_log_dir()?;
    if !log_dir.exists() {
        println!("No log directory found at: {}", log_dir.display());
        return Ok(());
    }

    let Some(log_path) = latest_log_file(&log_dir)? else {
        println!("No log files found in {}", log_dir.display());
        return Ok(());
    };

    let content = std::fs::read_to_string(&log_path)?;
    let lines: Vec<&str> = content.lines().collect();
    let tail = &lines[lines.len().saturating_sub(count as usize)..];

    if follow {
        println!(
            "  {} Following {} (Ctrl+C to stop)\n",
            style("TAIL").cyan().bold(),
            log_path.display()
        );
        for line in tail.iter().filter(|l| should_show_line(l, level_filter.as_deref())) {
            println!("{}", colorize_log_line(line));
        }
        return follow_file(&log_path, content.len(), level_filter.as_deref()).await;
    }

    let mut shown = 0;
    for line in tail.iter().filter(|l| should_show_line(l, level_filter.as_deref())) {
        match format {
            OutputFormat::Text => println!("{}", colorize_log_line(line)),
            OutputFormat::Json => println!("{line}"),
        }
        shown += 1;
    }
    if let OutputFormat::Text = format {
        println!(
            "\n  --- {} ({} shown / {} total lines) ---",
            log_path.display(),
            shown,
            lines.len()
        );
    }

    Ok(())
}

/// The most recently modified log file in `dir`.
fn latest_log_file(dir: &Path) -> VxResult<Option<PathBuf>> {
    let mut files: Vec<_> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.contains(".log") || name.ends_with(".json")
        })
        .collect();
    files.sort_by_key(|e| std::cmp::Reverse(e.metadata().ok().and_then(|m| m.modified().ok())));
    Ok(files.first().map(|e| e.path()))
}

/// Poll the file for appended lines until interrupted.
async fn follow_file(path: &Path, mut offset: usize, level_filter: Option<&str>) -> VxResult<()> {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(std::time::Duration::from_millis(500)) => {
                let Ok(content) = std::fs::read_to_string(path) else { continue };
                if content.len() < offset {
                    // Rotated or truncated.
                    offset = 0;
                }
                for line in content[offset..].lines() {
                    if !line.is_empty() && should_show_line(line, level_filter) {
                        println!("{}", colorize_log_line(line));
                    }
                }
                offset = content.len();
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Stopped tailing.");
                return Ok(());
            }
        }
    }
}

/// Show lines at the filter's level or more severe. Unknown filters match
/// as plain substrings.
fn should_show_line(line: &str, level_filter: Option<&str>) -> bool {
    let Some(filter) = level_filter else {
        return true;
    };
    let filter = filter.to_uppercase();
    let line = line.to_uppercase();
    match LEVELS.iter().position(|l| *l == filter) {
        Some(idx) => LEVELS[..=idx].iter().any(|level| line.contains(level)),
        None => line.contains(&filter),
    }
}

fn colorize_log_line(line: &str) -> String {
    let upper = line.to_uppercase();
    if upper.contains("ERROR") {
        style(line).red().to_string()
    } else if upper.contains("WARN") {
        style(line).yellow().to_string()
    } else if upper.contains("DEBUG") || upper.contains("TRACE") {
        style(line).dim().to_string()
    } else {
        line.to_string()
    }
}
