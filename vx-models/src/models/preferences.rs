//! User toggles that drive push registration and the event stream.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use vx_core::constants::{DEFAULT_SYNC_DELAY_MS, DEFAULT_SYNC_TIMEOUT_MS};
use vx_core::error::VxResult;

use super::settings::{keys, Settings};

/// Snapshot of the persisted push preferences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPreferences {
    pub allow_notifications: bool,
    pub turn_screen_on: bool,
    pub allow_background_sync: bool,
    pub allow_content_sending_to_push: bool,
    pub sync_timeout_ms: i64,
    pub sync_delay_ms: i64,
    pub auto_start_on_boot: bool,
}

impl Default for PushPreferences {
    fn default() -> Self {
        Self {
            allow_notifications: true,
            turn_screen_on: false,
            allow_background_sync: true,
            allow_content_sending_to_push: true,
            sync_timeout_ms: DEFAULT_SYNC_TIMEOUT_MS,
            sync_delay_ms: DEFAULT_SYNC_DELAY_MS,
            auto_start_on_boot: true,
        }
    }
}

impl PushPreferences {
    /// Load preferences, using defaults for anything unset.
    pub fn load(conn: &Connection) -> VxResult<Self> {
        let d = Self::default();
        Ok(Self {
            allow_notifications: Settings::get_bool_or(
                conn,
                keys::ALLOW_NOTIFICATIONS,
                d.allow_notifications,
            )?,
            turn_screen_on: Settings::get_bool_or(conn, keys::TURN_SCREEN_ON, d.turn_screen_on)?,
            allow_background_sync: Settings::get_bool_or(
                conn,
                keys::ALLOW_BACKGROUND_SYNC,
                d.allow_background_sync,
            )?,
            allow_content_sending_to_push: Settings::get_bool_or(
                conn,
                keys::CONTENT_SENDING_TO_PUSH,
                d.allow_content_sending_to_push,
            )?,
            sync_timeout_ms: Settings::get_i64(conn, keys::SYNC_TIMEOUT_MS)?
                .unwrap_or(d.sync_timeout_ms),
            sync_delay_ms: Settings::get_i64(conn, keys::SYNC_DELAY_MS)?
                .unwrap_or(d.sync_delay_ms),
            auto_start_on_boot: Settings::get_bool_or(
                conn,
                keys::AUTO_START_ON_BOOT,
                d.auto_start_on_boot,
            )?,
        })
    }

    /// Write every field.
    pub fn save(&self, conn: &Connection) -> VxResult<()> {
        Settings::set_bool(conn, keys::ALLOW_NOTIFICATIONS, self.allow_notifications)?;
        Settings::set_bool(conn, keys::TURN_SCREEN_ON, self.turn_screen_on)?;
        Settings::set_bool(conn, keys::ALLOW_BACKGROUND_SYNC, self.allow_background_sync)?;
        Settings::set_bool(
            conn,
            keys::CONTENT_SENDING_TO_PUSH,
            self.allow_content_sending_to_push,
        )?;
        Settings::set_i64(conn, keys::SYNC_TIMEOUT_MS, self.sync_timeout_ms)?;
        Settings::set_i64(conn, keys::SYNC_DELAY_MS, self.sync_delay_ms)?;
        Settings::set_bool(conn, keys::AUTO_START_ON_BOOT, self.auto_start_on_boot)?;
        Ok(())
    }

    /// The flag stored under `key`, if `key` names one.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match key {
            keys::ALLOW_NOTIFICATIONS => Some(self.allow_notifications),
            keys::TURN_SCREEN_ON => Some(self.turn_screen_on),
            keys::ALLOW_BACKGROUND_SYNC => Some(self.allow_background_sync),
            keys::CONTENT_SENDING_TO_PUSH => Some(self.allow_content_sending_to_push),
            keys::AUTO_START_ON_BOOT => Some(self.auto_start_on_boot),
            _ => None,
        }
    }

    /// Pushers are registered with `format: event_id_only` when content may
    /// not be sent through the push gateway.
    pub fn event_id_only(&self) -> bool {
        !self.allow_content_sending_to_push
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::create_tables(&conn).unwrap();
        conn
    }

    #[test]
    fn test_defaults_when_empty() {
        let conn = setup();
        let prefs = PushPreferences::load(&conn).unwrap();
        assert_eq!(prefs, PushPreferences::default());
        assert!(prefs.allow_notifications);
        assert!(!prefs.event_id_only());
    }

    #[test]
    fn test_save_and_reload() {
        let conn = setup();
        let prefs = PushPreferences {
            allow_notifications: false,
            allow_content_sending_to_push: false,
            sync_timeout_ms: 30_000,
            ..PushPreferences::default()
        };
        prefs.save(&conn).unwrap();
        let loaded = PushPreferences::load(&conn).unwrap();
        assert_eq!(loaded, prefs);
        assert!(loaded.event_id_only());
    }

    #[test]
    fn test_flag_by_key() {
        let prefs = PushPreferences {
            turn_screen_on: true,
            ..PushPreferences::default()
        };
        assert_eq!(prefs.flag(keys::TURN_SCREEN_ON), Some(true));
        assert_eq!(prefs.flag(keys::ALLOW_NOTIFICATIONS), Some(true));
        assert_eq!(prefs.flag(keys::SYNC_DELAY_MS), None);
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let conn = setup();
        Settings::set_bool(&conn, keys::TURN_SCREEN_ON, true).unwrap();
        let prefs = PushPreferences::load(&conn).unwrap();
        assert!(prefs.turn_screen_on);
        assert!(prefs.allow_background_sync);
        assert_eq!(prefs.sync_delay_ms, DEFAULT_SYNC_DELAY_MS);
    }
}
