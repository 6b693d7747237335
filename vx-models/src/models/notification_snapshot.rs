//! Versioned persistence of the aggregated notifications.
//!
//! The payload is JSON stored next to an explicit version number. A row
//! written by another version, or one that no longer decodes, is discarded
//! and aggregation restarts from a cold scan.

use chrono::Utc;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use vx_core::constants::NOTIFICATION_SNAPSHOT_VERSION;
use vx_core::error::{VxError, VxResult};

use super::notified_event::RoomNotificationSet;

/// What survives a restart of the notification pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationSnapshot {
    pub rooms: RoomNotificationSet,
    /// Events at or before this timestamp were dismissed by the user.
    #[serde(default)]
    pub dismissed_before: u64,
}

impl NotificationSnapshot {
    /// Write the snapshot, replacing any previous one.
    pub fn save(&self, conn: &Connection) -> VxResult<()> {
        let payload =
            serde_json::to_string(self).map_err(|e| VxError::Serialization(e.to_string()))?;
        conn.execute(
            "INSERT INTO notification_snapshot (id, version, payload, saved_at)
             VALUES (1, ?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                version = excluded.version,
                payload = excluded.payload,
                saved_at = excluded.saved_at",
            params![NOTIFICATION_SNAPSHOT_VERSION, payload, Utc::now().to_rfc3339()],
        )
        .map_err(|e| VxError::Database(e.to_string()))?;
        Ok(())
    }

    /// Load the stored snapshot.
    ///
    /// Returns `None` when nothing usable is stored; an incompatible row is
    /// deleted on the way out.
    pub fn load(conn: &Connection) -> VxResult<Option<Self>> {
        let row = conn.query_row(
            "SELECT version, payload FROM notification_snapshot WHERE id = 1",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
        );
        let (version, payload) = match row {
            Ok(r) => r,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(VxError::Database(e.to_string())),
        };

        if version != NOTIFICATION_SNAPSHOT_VERSION {
            warn!(
                "discarding notification snapshot version {version} (expected {NOTIFICATION_SNAPSHOT_VERSION})"
            );
            Self::clear(conn)?;
            return Ok(None);
        }

        match serde_json::from_str::<Self>(&payload) {
            Ok(snapshot) => {
                info!(
                    "restored {} pending notifications in {} rooms",
                    snapshot.rooms.event_count(),
                    snapshot.rooms.room_count()
                );
                Ok(Some(snapshot))
            }
            Err(e) => {
                warn!("discarding undecodable notification snapshot: {e}");
                Self::clear(conn)?;
                Ok(None)
            }
        }
    }

    pub fn clear(conn: &Connection) -> VxResult<()> {
        conn.execute("DELETE FROM notification_snapshot", [])
            .map_err(|e| VxError::Database(e.to_string()))?;
        Ok(())
    }
}
