//! Settings key-value store with typed accessors.
//!
//! Registration state, the provider token and every user toggle live in one
//! flat `settings` table. Values are stored as TEXT; typed accessors handle
//! parsing.

use rusqlite::{params, Connection};
use std::collections::HashMap;
use vx_core::error::{VxError, VxResult};

/// Settings key-value store backed by the `settings` table.
pub struct Settings;

impl Settings {
    /// Get a raw string value for a key.
    pub fn get(conn: &Connection, key: &str) -> VxResult<Option<String>> {
        match conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        ) {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(VxError::Database(e.to_string())),
        }
    }

    /// Set a raw string value for a key (upsert).
    pub fn set(conn: &Connection, key: &str, value: &str) -> VxResult<()> {
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )
        .map_err(|e| VxError::Database(e.to_string()))?;
        Ok(())
    }

    /// Delete a setting by key.
    pub fn delete(conn: &Connection, key: &str) -> VxResult<bool> {
        let changed = conn
            .execute("DELETE FROM settings WHERE key = ?1", [key])
            .map_err(|e| VxError::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Get all settings as a HashMap.
    pub fn get_all(conn: &Connection) -> VxResult<HashMap<String, String>> {
        let mut stmt = conn
            .prepare("SELECT key, value FROM settings")
            .map_err(|e| VxError::Database(e.to_string()))?;

        let map = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(|e| VxError::Database(e.to_string()))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(map)
    }

    // ─── Typed accessors ─────────────────────────────────────────────────

    /// Get a boolean setting (stored as "true"/"false" or "1"/"0").
    pub fn get_bool(conn: &Connection, key: &str) -> VxResult<Option<bool>> {
        Ok(Self::get(conn, key)?.map(|v| v == "true" || v == "1"))
    }

    /// Get a boolean setting, falling back to `default` when unset.
    pub fn get_bool_or(conn: &Connection, key: &str, default: bool) -> VxResult<bool> {
        Ok(Self::get_bool(conn, key)?.unwrap_or(default))
    }

    /// Set a boolean setting.
    pub fn set_bool(conn: &Connection, key: &str, value: bool) -> VxResult<()> {
        Self::set(conn, key, if value { "true" } else { "false" })
    }

    /// Get an integer setting.
    pub fn get_i64(conn: &Connection, key: &str) -> VxResult<Option<i64>> {
        Ok(Self::get(conn, key)?.and_then(|v| v.parse().ok()))
    }

    /// Set an integer setting.
    pub fn set_i64(conn: &Connection, key: &str, value: i64) -> VxResult<()> {
        Self::set(conn, key, &value.to_string())
    }

    /// Get a JSON-deserialized setting.
    pub fn get_json<T: serde::de::DeserializeOwned>(
        conn: &Connection,
        key: &str,
    ) -> VxResult<Option<T>> {
        match Self::get(conn, key)? {
            Some(v) => {
                let parsed = serde_json::from_str(&v).map_err(|e| {
                    VxError::Serialization(format!("failed to parse setting {key}: {e}"))
                })?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }

    /// Set a JSON-serialized setting.
    pub fn set_json<T: serde::Serialize>(conn: &Connection, key: &str, value: &T) -> VxResult<()> {
        let json =
            serde_json::to_string(value).map_err(|e| VxError::Serialization(e.to_string()))?;
        Self::set(conn, key, &json)
    }
}

/// Setting keys.
pub mod keys {
    // Push registration
    pub const REGISTRATION_STATE: &str = "push.registration_state";
    pub const PUSH_TOKEN: &str = "push.token";

    // Preferences
    pub const ALLOW_NOTIFICATIONS: &str = "pref.allow_notifications";
    pub const TURN_SCREEN_ON: &str = "pref.turn_screen_on";
    pub const ALLOW_BACKGROUND_SYNC: &str = "pref.allow_background_sync";
    pub const CONTENT_SENDING_TO_PUSH: &str = "pref.allow_content_sending_to_push";
    pub const SYNC_TIMEOUT_MS: &str = "pref.sync_timeout_ms";
    pub const SYNC_DELAY_MS: &str = "pref.sync_delay_ms";
    pub const AUTO_START_ON_BOOT: &str = "pref.auto_start_on_boot";

    // Event stream service
    pub const LAST_RUN_CRASHED: &str = "service.last_run_crashed";
    pub const STREAM_USER_IDS: &str = "stream.user_ids";
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
    fn test_settings_crud() {
        let conn = setup();

        Settings::set(&conn, keys::PUSH_TOKEN, "abc").unwrap();
        assert_eq!(Settings::get(&conn, keys::PUSH_TOKEN).unwrap(), Some("abc".to_string()));

        Settings::set(&conn, keys::PUSH_TOKEN, "def").unwrap();
        assert_eq!(Settings::get(&conn, keys::PUSH_TOKEN).unwrap(), Some("def".to_string()));

        assert!(Settings::delete(&conn, keys::PUSH_TOKEN).unwrap());
        assert_eq!(Settings::get(&conn, keys::PUSH_TOKEN).unwrap(), None);
        assert!(!Settings::delete(&conn, keys::PUSH_TOKEN).unwrap());
    }

    #[test]
    fn test_settings_typed_bool() {
        let conn = setup();
        assert!(Settings::get_bool_or(&conn, keys::ALLOW_NOTIFICATIONS, true).unwrap());

        Settings::set_bool(&conn, keys::ALLOW_NOTIFICATIONS, false).unwrap();
        assert_eq!(Settings::get_bool(&conn, keys::ALLOW_NOTIFICATIONS).unwrap(), Some(false));
        assert!(!Settings::get_bool_or(&conn, keys::ALLOW_NOTIFICATIONS, true).unwrap());
    }

    #[test]
    fn test_settings_typed_i64() {
        let conn = setup();
        Settings::set_i64(&conn, keys::SYNC_TIMEOUT_MS, 12_000).unwrap();
        assert_eq!(Settings::get_i64(&conn, keys::SYNC_TIMEOUT_MS).unwrap(), Some(12_000));

        Settings::set(&conn, keys::SYNC_DELAY_MS, "not a number").unwrap();
        assert_eq!(Settings::get_i64(&conn, keys::SYNC_DELAY_MS).unwrap(), None);
    }

    #[test]
    fn test_settings_json() {
        let conn = setup();
        let ids = vec!["@alice:example.org".to_string(), "@bob:example.org".to_string()];
        Settings::set_json(&conn, keys::STREAM_USER_IDS, &ids).unwrap();
        let loaded: Vec<String> = Settings::get_json(&conn, keys::STREAM_USER_IDS).unwrap().unwrap();
        assert_eq!(loaded, ids);
    }

    #[test]
    fn test_settings_json_malformed() {
        let conn = setup();
        Settings::set(&conn, keys::STREAM_USER_IDS, "[unterminated").unwrap();
        let res: VxResult<Option<Vec<String>>> = Settings::get_json(&conn, keys::STREAM_USER_IDS);
        assert!(matches!(res, Err(VxError::Serialization(_))));
    }

    #[test]
    fn test_settings_get_all() {
        let conn = setup();
        Settings::set(&conn, "a", "1").unwrap();
        Settings::set(&conn, "b", "2").unwrap();
        let all = Settings::get_all(&conn).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["b"], "2");
    }
}
