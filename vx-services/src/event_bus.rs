//! Typed event bus for intra-service communication.
//!
//! Uses tokio broadcast channels to decouple services from one another.
//! Any service can emit events without knowing who is listening, and any
//! number of subscribers can independently consume events.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::debug;

use vx_core::error::ErrorClass;
use vx_models::models::push_state::RegistrationState;

use crate::event_stream::{ForegroundNotificationState, StreamState};

/// Application-level state changes other services care about.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// The registration state machine moved.
    RegistrationStateChanged {
        from: RegistrationState,
        to: RegistrationState,
    },
    /// A registration or unregistration run failed.
    RegistrationFailed { class: ErrorClass, message: String },
    /// An automatic registration retry was scheduled.
    RegistrationRetryScheduled { delay_ms: u64, reset: bool },
    /// Every session's pusher was created.
    PushersRegistered { session_count: usize },
    /// Every session's pusher was removed.
    PushersUnregistered { session_count: usize },
    /// The event stream service changed run state.
    StreamStateChanged { state: StreamState },
    /// The sticky foreground notification changed.
    ForegroundNotificationChanged { state: ForegroundNotificationState },
    /// The message notification was (re)rendered.
    NotificationsUpdated {
        rooms: usize,
        events: usize,
        is_background: bool,
    },
    /// No notification is pending any more.
    NotificationsCleared,
    /// A call invite was accepted for notification.
    IncomingCall {
        room_id: String,
        call_id: String,
        sender: String,
    },
    /// A tracked call was answered or hung up.
    CallEnded { call_id: String },
    /// A delayed self-restart was scheduled.
    RestartScheduled { delay_ms: u64 },
    /// A user preference was written.
    PreferenceChanged { key: String, value: String },
}

/// Application-wide event bus backed by a tokio broadcast channel.
///
/// Designed for fan-out delivery: every subscriber gets every event.
/// Slow subscribers that fall behind will receive a `Lagged` error
/// and may miss events.
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AppEvent>>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Subscribe to receive application events.
    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: AppEvent) {
        let label = event_label(&event);
        match self.sender.send(event) {
            Ok(count) => {
                debug!("event_bus: emitted {label} to {count} subscriber(s)");
            }
            Err(_) => {
                debug!("event_bus: no subscribers for {label}");
            }
        }
    }

    /// Get the current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Human-readable label for an event (for logging).
pub fn event_label(event: &AppEvent) -> &'static str {
    match event {
        AppEvent::RegistrationStateChanged { .. } => "RegistrationStateChanged",
        AppEvent::RegistrationFailed { .. } => "RegistrationFailed",
        AppEvent::RegistrationRetryScheduled { .. } => "RegistrationRetryScheduled",
        AppEvent::PushersRegistered { .. } => "PushersRegistered",
        AppEvent::PushersUnregistered { .. } => "PushersUnregistered",
        AppEvent::StreamStateChanged { .. } => "StreamStateChanged",
        AppEvent::ForegroundNotificationChanged { .. } => "ForegroundNotificationChanged",
        AppEvent::NotificationsUpdated { .. } => "NotificationsUpdated",
        AppEvent::NotificationsCleared => "NotificationsCleared",
        AppEvent::IncomingCall { .. } => "IncomingCall",
        AppEvent::CallEnded { .. } => "CallEnded",
        AppEvent::RestartScheduled { .. } => "RestartScheduled",
        AppEvent::PreferenceChanged { .. } => "PreferenceChanged",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_receive() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(AppEvent::RegistrationStateChanged {
            from: RegistrationState::PushRegistered,
            to: RegistrationState::ServerRegistering,
        });

        match rx.recv().await.unwrap() {
            AppEvent::RegistrationStateChanged { from, to } => {
                assert_eq!(from, RegistrationState::PushRegistered);
                assert_eq!(to, RegistrationState::ServerRegistering);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(AppEvent::PushersRegistered { session_count: 3 });

        for rx in [&mut rx1, &mut rx2] {
            match rx.recv().await.unwrap() {
                AppEvent::PushersRegistered { session_count } => assert_eq!(session_count, 3),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_event_bus_no_subscribers() {
        let bus = EventBus::new(16);
        bus.emit(AppEvent::NotificationsCleared);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_labels() {
        assert_eq!(event_label(&AppEvent::NotificationsCleared), "NotificationsCleared");
        assert_eq!(
            event_label(&AppEvent::CallEnded { call_id: "c".into() }),
            "CallEnded"
        );
    }
}
