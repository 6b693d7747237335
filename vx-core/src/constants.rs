//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "Vector";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Matrix client-server API prefix used for pusher calls.
pub const CLIENT_API_PREFIX: &str = "/_matrix/client/r0";

/// Pusher application id registered on the home server.
pub const DEFAULT_PUSHER_APP_ID: &str = "im.vector.app.android";

/// Push gateway notify endpoint handed to the home server.
pub const DEFAULT_PUSHER_URL: &str = "https://matrix.org/_matrix/push/v1/notify";

/// Prefix of the per-session pusher profile tag.
pub const PUSH_TAG_PREFIX: &str = "mobile";

/// Upper bound on the pusher profile tag length, in bytes.
pub const MAX_PUSH_TAG_LEN: usize = 32;

/// Delay before an automatic re-registration after a network or 5xx failure.
pub const SERVER_RETRY_DELAY_SECS: u64 = 30;

/// Lower bound of the randomized self-restart delay.
pub const RESTART_MIN_DELAY_MS: u64 = 3_000;

/// Upper bound of the randomized self-restart delay.
pub const RESTART_MAX_DELAY_MS: u64 = 8_000;

/// Default long-poll timeout for background sync.
pub const DEFAULT_SYNC_TIMEOUT_MS: i64 = 6_000;

/// Default delay between two background sync requests.
pub const DEFAULT_SYNC_DELAY_MS: i64 = 0;

/// Version of the persisted notification snapshot payload.
pub const NOTIFICATION_SNAPSHOT_VERSION: i64 = 1;

/// Database schema version.
pub const DB_SCHEMA_VERSION: i32 = 1;

/// Matrix event types the notification pipeline cares about.
pub mod event_types {
    pub const MESSAGE: &str = "m.room.message";
    pub const ENCRYPTED: &str = "m.room.encrypted";
    pub const MEMBER: &str = "m.room.member";
    pub const REDACTION: &str = "m.room.redaction";
    pub const CALL_INVITE: &str = "m.call.invite";
    pub const CALL_ANSWER: &str = "m.call.answer";
    pub const CALL_HANGUP: &str = "m.call.hangup";
    pub const CALL_CANDIDATES: &str = "m.call.candidates";

    /// Prefix shared by all call signalling events.
    pub const CALL_PREFIX: &str = "m.call.";
}
