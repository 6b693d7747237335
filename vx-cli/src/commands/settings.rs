//! Settings commands.
//!
//! Push preferences live in the database and go through the settings
//! service, so changing one re-registers pushers when needed. Everything
//! else is the configuration file.

use clap::Subcommand;
use console::style;

use vx_core::config::{AppConfig, ConfigHandle};
use vx_core::error::{VxError, VxResult};
use vx_models::models::settings::keys;
use vx_models::PushPreferences;
use crate::OutputFormat;

/// Preference keys accepted by `settings set`.
const PREFERENCE_KEYS: [&str; 7] = [
    keys::ALLOW_NOTIFICATIONS,
    keys::CONTENT_SENDING_TO_PUSH,
    keys::ALLOW_BACKGROUND_SYNC,
    keys::TURN_SCREEN_ON,
    keys::AUTO_START_ON_BOOT,
    keys::SYNC_TIMEOUT_MS,
    keys::SYNC_DELAY_MS,
];

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Show push preferences and configuration.
    Show,
    /// Get a value by key (e.g. "pref.allow_notifications", "push.lang").
    Get {
        key: String,
    },
    /// Set a value by key.
    Set {
        key: String,
        value: String,
    },
    /// Export the configuration to a file.
    Export {
        path: String,
    },
    /// Import the configuration from a file.
    Import {
        path: String,
    },
}

pub async fn run(config: ConfigHandle, action: SettingsAction, format: OutputFormat) -> VxResult<()> {
    match action {
        SettingsAction::Show => {
            let prefs = load_preferences(&config).await?;
            let cfg = config.read().await;
            match format {
                OutputFormat::Json => {
                    let json = serde_json::json!({
                        "preferences": prefs,
                        "config": &*cfg,
                    });
                    println!("{}", serde_json::to_string_pretty(&json).unwrap_or_default());
                }
                OutputFormat::Text => print_settings_text(&prefs, &cfg),
            }
        }
        SettingsAction::Get { key } => {
            let value = if is_preference(&key) {
                let prefs = load_preferences(&config).await?;
                preference_value(&prefs, &key)
            } else {
                config_value(&*config.read().await, &key)
            };
            let Some(value) = value else {
                return Err(VxError::NotFound(format!("setting {key}")));
            };
            match format {
                OutputFormat::Json => println!("{}", serde_json::json!({ "key": key, "value": value })),
                OutputFormat::Text => println!("{key} = {value}"),
            }
        }
        SettingsAction::Set { key, value } => {
            if is_preference(&key) {
                let registry = super::build_registry(&config, None).await?;
                let result = registry.settings().set_by_key(&key, &value).await;
                registry.shutdown_all().await?;
                result?;
            } else {
                {
                    let mut cfg = config.write().await;
                    set_config_value(&mut cfg, &key, &value)?;
                    cfg.validate()?;
                }
                config.read().await.save_default()?;
            }
            match format {
                OutputFormat::Json => {
                    println!("{}", serde_json::json!({ "key": key, "value": value, "saved": true }));
                }
                OutputFormat::Text => println!("{} {key} = {value}", style("SET").green().bold()),
            }
        }
        SettingsAction::Export { path } => {
            config.read().await.save_to_file(std::path::Path::new(&path))?;
            println!("{} Configuration exported to {path}", style("OK").green().bold());
        }
        SettingsAction::Import { path } => {
            let imported = AppConfig::load_from_file(std::path::Path::new(&path))?;
            imported.save_default()?;
            *config.write().await = imported;
            println!("{} Configuration imported from {path} and saved.", style("OK").green().bold());
        }
    }

    Ok(())
}

async fn load_preferences(config: &ConfigHandle) -> VxResult<PushPreferences> {
    let db = super::init_database(config).await?;
    let conn = db.conn()?;
    PushPreferences::load(&conn)
}

fn is_preference(key: &str) -> bool {
    PREFERENCE_KEYS.contains(&key)
}

fn preference_value(prefs: &PushPreferences, key: &str) -> Option<String> {
    let value = match key {
        keys::ALLOW_NOTIFICATIONS => prefs.allow_notifications.to_string(),
        keys::CONTENT_SENDING_TO_PUSH => prefs.allow_content_sending_to_push.to_string(),
        keys::ALLOW_BACKGROUND_SYNC => prefs.allow_background_sync.to_string(),
        keys::TURN_SCREEN_ON => prefs.turn_screen_on.to_string(),
        keys::AUTO_START_ON_BOOT => prefs.auto_start_on_boot.to_string(),
        keys::SYNC_TIMEOUT_MS => prefs.sync_timeout_ms.to_string(),
        keys::SYNC_DELAY_MS => prefs.sync_delay_ms.to_string(),
        _ => return None,
    };
    Some(value)
}

/// Resolve a dot-separated key path to a value from the config.
fn config_value(cfg: &AppConfig, key: &str) -> Option<String> {
    let value = match key {
        "push.enabled" => cfg.push.enabled.to_string(),
        "push.app_id" => cfg.push.app_id.clone(),
        "push.app_display_name" => cfg.push.app_display_name.clone(),
        "push.device_display_name" => cfg.push.effective_device_name(),
        "push.lang" => cfg.push.lang.clone(),
        "push.pusher_url" => cfg.push.pusher_url.clone(),
        "push.retry_delay_ms" => cfg.push.retry_delay_ms.to_string(),
        "push.request_timeout_ms" => cfg.push.request_timeout_ms.to_string(),
        "service.restart_min_delay_ms" => cfg.service.restart_min_delay_ms.to_string(),
        "service.restart_max_delay_ms" => cfg.service.restart_max_delay_ms.to_string(),
        "service.event_bus_capacity" => cfg.service.event_bus_capacity.to_string(),
        "database.wal_mode" => cfg.database.wal_mode.to_string(),
        "database.pool_size" => cfg.database.pool_size.to_string(),
        "logging.level" => cfg.logging.level.clone(),
        "logging.json_output" => cfg.logging.json_output.to_string(),
        _ => return None,
    };
    Some(value)
}

fn set_config_value(cfg: &mut AppConfig, key: &str, value: &str) -> VxResult<()> {
    fn parse<T: std::str::FromStr>(key: &str, value: &str) -> VxResult<T> {
        value
            .parse()
            .map_err(|_| VxError::Config(format!("invalid value for {key}: {value}")))
    }

    match key {
        "push.enabled" => cfg.push.enabled = parse(key, value)?,
        "push.app_id" => cfg.push.app_id = value.to_string(),
        "push.app_display_name" => cfg.push.app_display_name = value.to_string(),
        "push.device_display_name" => cfg.push.device_display_name = value.to_string(),
        "push.lang" => cfg.push.lang = value.to_string(),
        "push.pusher_url" => cfg.push.pusher_url = value.to_string(),
        "push.retry_delay_ms" => cfg.push.retry_delay_ms = parse(key, value)?,
        "push.request_timeout_ms" => cfg.push.request_timeout_ms = parse(key, value)?,
        "service.restart_min_delay_ms" => cfg.service.restart_min_delay_ms = parse(key, value)?,
        "service.restart_max_delay_ms" => cfg.service.restart_max_delay_ms = parse(key, value)?,
        "service.event_bus_capacity" => cfg.service.event_bus_capacity = parse(key, value)?,
        "database.wal_mode" => cfg.database.wal_mode = parse(key, value)?,
        "database.pool_size" => cfg.database.pool_size = parse(key, value)?,
        "logging.level" => {
            let level = value.to_lowercase();
            if !["trace", "debug", "info", "warn", "error"].contains(&level.as_str()) {
                return Err(VxError::Config(
                    "expected one of: trace, debug, info, warn, error".into(),
                ));
            }
            cfg.logging.level = level;
        }
        "logging.json_output" => cfg.logging.json_output = parse(key, value)?,
        _ => return Err(VxError::NotFound(format!("setting {key}"))),
    }
    Ok(())
}

fn print_settings_text(prefs: &PushPreferences, cfg: &AppConfig) {
    println!("{}", style("Push Preferences").bold().underlined());
    for key in PREFERENCE_KEYS {
        println!("  {key:<36} {}", preference_value(prefs, key).unwrap_or_default());
    }

    println!();
    println!("{}", style("Configuration").bold().underlined());
    for key in [
        "push.enabled",
        "push.app_id",
        "push.device_display_name",
        "push.lang",
        "push.pusher_url",
        "push.retry_delay_ms",
        "service.restart_min_delay_ms",
        "service.restart_max_delay_ms",
        "database.wal_mode",
        "logging.level",
        "logging.json_output",
    ] {
        println!("  {key:<36} {}", config_value(cfg, key).unwrap_or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preference_keys_are_recognized() {
        assert!(is_preference(keys::ALLOW_NOTIFICATIONS));
        assert!(!is_preference("push.lang"));
        let prefs = PushPreferences::default();
        assert_eq!(preference_value(&prefs, keys::ALLOW_NOTIFICATIONS).as_deref(), Some("true"));
    }

    #[test]
    fn test_set_config_value() {
        let mut cfg = AppConfig::default();
        set_config_value(&mut cfg, "push.lang", "fr").unwrap();
        set_config_value(&mut cfg, "service.restart_min_delay_ms", "1000").unwrap();
        assert_eq!(config_value(&cfg, "push.lang").as_deref(), Some("fr"));
        assert_eq!(cfg.service.restart_min_delay_ms, 1000);

        assert!(set_config_value(&mut cfg, "push.enabled", "maybe").is_err());
        assert!(set_config_value(&mut cfg, "logging.level", "loud").is_err());
        assert!(matches!(
            set_config_value(&mut cfg, "server.address", "x"),
            Err(VxError::NotFound(_))
        ));
    }
}
