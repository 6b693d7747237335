//! Vector Models - local persistence and the notification data model.
//!
//! This crate owns everything that survives a process restart: the SQLite
//! database with its flat key-value settings table, the persisted push
//! registration record, user preferences, stored sessions and the versioned
//! notification snapshot. It also defines the event and notification types
//! shared by the service layer.

pub mod db;
pub mod schema;
pub mod models;
pub mod migrations;

// Re-export key types
pub use db::{Database, DbPool};
pub use models::event::{BingRule, LiveEvent};
pub use models::notified_event::{NotifiedEvent, RoomNotificationSet};
pub use models::notification_snapshot::NotificationSnapshot;
pub use models::preferences::PushPreferences;
pub use models::push_state::PersistedRegistration;
pub use models::session::StoredSession;
pub use models::settings::Settings;
