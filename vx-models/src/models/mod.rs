//! Persisted entities and shared data types.

pub mod event;
pub mod notified_event;
pub mod notification_snapshot;
pub mod preferences;
pub mod push_state;
pub mod session;
pub mod settings;
