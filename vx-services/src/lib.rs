//! Vector Services - push registration, event stream lifecycle and notifications.
//!
//! This crate provides the service trait, the service registry for
//! dependency injection, and the push subsystem services:
//! - Registration state machine (persisted, tag-based)
//! - Push registration coordinator (provider token, per-session pushers, retries)
//! - Event stream lifecycle (start/pause/resume/catchup/stop, self-restart)
//! - Notification aggregation on a dedicated worker thread
//! - Notification rendering seam with a desktop renderer
//! - Preference toggles with their registration side effects
//! - Event bus (typed intra-service communication)

pub mod service;
pub mod registry;
pub mod event_bus;
pub mod registration;
pub mod push;
pub mod event_stream;
pub mod notification;
pub mod renderer;
pub mod settings;

// Re-export key types
pub use service::{Service, ServiceState};
pub use registry::{Collaborators, ServiceRegistry};
pub use event_bus::{AppEvent, EventBus};
pub use registration::RegistrationStateMachine;
pub use push::{PushProvider, PushRegistrationCoordinator, StaticTokenProvider};
pub use event_stream::{
    EventStreamController, ForegroundNotificationState, ForegroundTracker, MonitoredSession,
    RestartScheduler, SessionEvent, SessionFactory, SessionStream, SharedForeground,
    StreamAction, StreamCommand, StreamState,
};
pub use notification::{NotificationAggregator, NotificationService, NotificationSource, RoomUnreadState};
pub use renderer::{DesktopRenderer, NotificationRenderer, RenderedNotification};
pub use settings::SettingsService;
