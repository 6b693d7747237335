//! Rendering seam for message, foreground and call notifications.
//!
//! The aggregator decides *what* to show; a [`NotificationRenderer`] decides
//! how it looks on the platform. [`DesktopRenderer`] shows native desktop
//! notifications through `notify-rust`.

use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use vx_core::constants::APP_NAME;
use vx_core::error::{VxError, VxResult};
use vx_models::{NotifiedEvent, RoomNotificationSet};

use crate::event_stream::ForegroundNotificationState;

/// A message notification ready to be displayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedNotification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub room_id: String,
    pub event_id: String,
    /// Digest of everything pending rather than an alert for one event.
    pub is_background: bool,
    pub room_count: usize,
    pub event_count: usize,
}

/// Platform side of notification display.
pub trait NotificationRenderer: Send + Sync {
    /// Build the message notification for `event` given the full aggregate.
    fn build_message_notification(
        &self,
        rooms: &RoomNotificationSet,
        event: &NotifiedEvent,
        is_background: bool,
    ) -> RenderedNotification {
        let room_count = rooms.room_count();
        let event_count = rooms.event_count();
        let title = if room_count <= 1 {
            format!("{event_count} new message(s)")
        } else {
            format!("{event_count} new message(s) in {room_count} rooms")
        };
        let body = if is_background {
            format!("Latest from {} in {}", event.sender, event.room_id)
        } else {
            format!("{} in {}", event.sender, event.room_id)
        };
        RenderedNotification {
            id: Uuid::new_v4(),
            title,
            body,
            room_id: event.room_id.clone(),
            event_id: event.event_id.clone(),
            is_background,
            room_count,
            event_count,
        }
    }

    fn show_message_notification(&self, notification: &RenderedNotification) -> VxResult<()>;

    fn clear_message_notification(&self) -> VxResult<()>;

    fn show_foreground_notification(&self, state: ForegroundNotificationState) -> VxResult<()>;

    fn hide_foreground_notification(&self) -> VxResult<()>;

    fn show_call_notification(
        &self,
        room_id: &str,
        call_id: &str,
        sender: &str,
        in_progress: bool,
    ) -> VxResult<()>;

    fn hide_call_notification(&self, call_id: &str) -> VxResult<()>;
}

/// Native desktop notifications.
///
/// Desktop notification servers have no sticky notifications, so clearing
/// and hiding only log.
#[derive(Debug, Default)]
pub struct DesktopRenderer;

impl DesktopRenderer {
    pub fn new() -> Self {
        Self
    }

    fn show(&self, title: &str, body: &str) -> VxResult<()> {
        #[cfg(not(test))]
        {
            notify_rust::Notification::new()
                .summary(title)
                .body(body)
                .appname(APP_NAME)
                .show()
                .map_err(|e| VxError::Notification(e.to_string()))?;
        }

        debug!("notification shown: {title}");
        Ok(())
    }
}

impl NotificationRenderer for DesktopRenderer {
    fn show_message_notification(&self, notification: &RenderedNotification) -> VxResult<()> {
        self.show(&notification.title, &notification.body)
    }

    fn clear_message_notification(&self) -> VxResult<()> {
        debug!("message notification cleared");
        Ok(())
    }

    fn show_foreground_notification(&self, state: ForegroundNotificationState) -> VxResult<()> {
        match state.description() {
            Some(text) => self.show(APP_NAME, text),
            None => self.hide_foreground_notification(),
        }
    }

    fn hide_foreground_notification(&self) -> VxResult<()> {
        debug!("foreground notification hidden");
        Ok(())
    }

    fn show_call_notification(
        &self,
        room_id: &str,
        _call_id: &str,
        sender: &str,
        in_progress: bool,
    ) -> VxResult<()> {
        let title = if in_progress { "Call in progress" } else { "Incoming call" };
        self.show(title, &format!("{sender} in {room_id}"))
    }

    fn hide_call_notification(&self, call_id: &str) -> VxResult<()> {
        debug!("call notification hidden: {call_id}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx_models::BingRule;

    fn notified(room: &str, id: &str, ts: u64) -> NotifiedEvent {
        NotifiedEvent {
            room_id: room.into(),
            event_id: id.into(),
            rule: BingRule::new(".m.rule.message"),
            origin_server_ts: ts,
            sender: "@bob:example.org".into(),
        }
    }

    #[test]
    fn test_build_counts_rooms_and_events() {
        let mut rooms = RoomNotificationSet::new();
        rooms.insert(notified("!a", "$1", 1));
        rooms.insert(notified("!a", "$2", 2));
        rooms.insert(notified("!b", "$3", 3));
        let latest = rooms.latest().unwrap().clone();

        let n = DesktopRenderer::new().build_message_notification(&rooms, &latest, true);
        assert_eq!(n.room_count, 2);
        assert_eq!(n.event_count, 3);
        assert_eq!(n.event_id, "$3");
        assert!(n.is_background);
        assert!(n.title.contains("2 rooms"));
    }

    #[test]
    fn test_desktop_renderer_is_silent_under_test() {
        let r = DesktopRenderer::new();
        r.show_foreground_notification(ForegroundNotificationState::ListeningForEvents)
            .unwrap();
        r.show_call_notification("!r", "c1", "@bob:example.org", false)
            .unwrap();
        r.hide_call_notification("c1").unwrap();
    }
}
