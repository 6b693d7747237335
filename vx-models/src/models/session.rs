//! Stored session entity model.

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use vx_core::error::{VxError, VxResult};

/// A Matrix account this device is logged into.
///
/// Each session owns one pusher on its home server while the device is
/// server-registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    pub user_id: String,
    pub homeserver_url: String,
    #[serde(skip_serializing, default)]
    pub access_token: String,
    pub device_id: Option<String>,
    pub created_at: String,
}

impl StoredSession {
    pub fn new(
        user_id: impl Into<String>,
        homeserver_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            homeserver_url: homeserver_url.into(),
            access_token: access_token.into(),
            device_id: None,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// Construct a session from a database row.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            homeserver_url: row.get("homeserver_url")?,
            access_token: row.get("access_token")?,
            device_id: row.get("device_id")?,
            created_at: row.get("created_at")?,
        })
    }

    /// Insert or update this session, keyed by user id.
    pub fn save(&self, conn: &Connection) -> VxResult<()> {
        conn.execute(
            "INSERT INTO sessions (user_id, homeserver_url, access_token, device_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                homeserver_url = excluded.homeserver_url,
                access_token = excluded.access_token,
                device_id = excluded.device_id",
            params![
                self.user_id,
                self.homeserver_url,
                self.access_token,
                self.device_id,
                self.created_at
            ],
        )
        .map_err(|e| VxError::Database(e.to_string()))?;
        Ok(())
    }

    // ─── Static finders ──────────────────────────────────────────────────

    pub fn find_by_user_id(conn: &Connection, user_id: &str) -> VxResult<Option<Self>> {
        match conn.query_row(
            "SELECT * FROM sessions WHERE user_id = ?1",
            [user_id],
            Self::from_row,
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(VxError::Database(e.to_string())),
        }
    }

    /// All sessions in login order. Pushers are registered in this order.
    pub fn load_all(conn: &Connection) -> VxResult<Vec<Self>> {
        let mut stmt = conn
            .prepare("SELECT * FROM sessions ORDER BY created_at ASC, user_id ASC")
            .map_err(|e| VxError::Database(e.to_string()))?;
        let rows = stmt
            .query_map([], Self::from_row)
            .map_err(|e| VxError::Database(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| VxError::Database(e.to_string()))
    }

    pub fn delete(conn: &Connection, user_id: &str) -> VxResult<bool> {
        let changed = conn
            .execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])
            .map_err(|e| VxError::Database(e.to_string()))?;
        Ok(changed > 0)
    }

    /// Home server URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.homeserver_url.trim_end_matches('/')
    }
}
