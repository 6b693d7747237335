//! Live room events and the push rules they match.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use vx_core::constants::event_types;

/// A room event delivered by the live event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveEvent {
    pub event_id: String,
    pub room_id: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub origin_server_ts: u64,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    /// Set on a redaction: the event being redacted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redacts: Option<String>,
}

impl LiveEvent {
    pub fn new(
        event_id: impl Into<String>,
        room_id: impl Into<String>,
        sender: impl Into<String>,
        event_type: impl Into<String>,
        origin_server_ts: u64,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            room_id: room_id.into(),
            sender: sender.into(),
            event_type: event_type.into(),
            origin_server_ts,
            content: Value::Null,
            state_key: None,
            redacts: None,
        }
    }

    pub fn with_content(mut self, content: Value) -> Self {
        self.content = content;
        self
    }

    /// Displayable body, if the event carries a non-empty one.
    pub fn body(&self) -> Option<&str> {
        self.content
            .get("body")
            .and_then(Value::as_str)
            .filter(|b| !b.trim().is_empty())
    }

    pub fn is_membership(&self) -> bool {
        self.event_type == event_types::MEMBER
    }

    pub fn is_call_event(&self) -> bool {
        self.event_type.starts_with(event_types::CALL_PREFIX)
    }

    pub fn is_call_invite(&self) -> bool {
        self.event_type == event_types::CALL_INVITE
    }

    /// `call_id` from the content of a call signalling event.
    pub fn call_id(&self) -> Option<&str> {
        if !self.is_call_event() {
            return None;
        }
        self.content.get("call_id").and_then(Value::as_str)
    }

    pub fn is_redaction(&self) -> bool {
        self.redacts.is_some()
    }
}

/// A server push rule that an event fulfilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BingRule {
    pub rule_id: String,
    #[serde(default = "default_notify")]
    pub notify: bool,
    #[serde(default)]
    pub highlight: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

fn default_notify() -> bool {
    true
}

impl BingRule {
    pub fn new(rule_id: impl Into<String>) -> Self {
        Self {
            rule_id: rule_id.into(),
            notify: true,
            highlight: false,
            sound: None,
        }
    }
}
