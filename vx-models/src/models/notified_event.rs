//! Pending notifications grouped by room.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::event::{BingRule, LiveEvent};

/// One event that matched a push rule and is waiting to be seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifiedEvent {
    pub room_id: String,
    pub event_id: String,
    pub rule: BingRule,
    pub origin_server_ts: u64,
    #[serde(default)]
    pub sender: String,
}

impl NotifiedEvent {
    pub fn from_event(event: &LiveEvent, rule: BingRule) -> Self {
        Self {
            room_id: event.room_id.clone(),
            event_id: event.event_id.clone(),
            rule,
            origin_server_ts: event.origin_server_ts,
            sender: event.sender.clone(),
        }
    }

    /// Ordering key: timestamp, then event id for equal timestamps.
    pub fn order_key(&self) -> (u64, &str) {
        (self.origin_server_ts, self.event_id.as_str())
    }

    pub fn cmp_recency(&self, other: &Self) -> Ordering {
        self.order_key().cmp(&other.order_key())
    }
}

/// Room id to pending events, each list oldest first.
///
/// A room whose list becomes empty is removed from the map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomNotificationSet {
    rooms: BTreeMap<String, Vec<NotifiedEvent>>,
}

impl RoomNotificationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the ordered position. Returns `false` for a duplicate.
    pub fn insert(&mut self, event: NotifiedEvent) -> bool {
        let list = self.rooms.entry(event.room_id.clone()).or_default();
        if list.iter().any(|e| e.event_id == event.event_id) {
            return false;
        }
        let pos = list.partition_point(|e| e.cmp_recency(&event) == Ordering::Less);
        list.insert(pos, event);
        true
    }

    /// Remove one event. Returns whether it was present.
    pub fn remove_event(&mut self, room_id: &str, event_id: &str) -> bool {
        self.retain_room(room_id, |e| e.event_id != event_id)
    }

    /// Keep only the events of `room_id` that satisfy `keep`.
    /// Returns whether anything was removed.
    pub fn retain_room<F>(&mut self, room_id: &str, keep: F) -> bool
    where
        F: FnMut(&NotifiedEvent) -> bool,
    {
        let Some(list) = self.rooms.get_mut(room_id) else {
            return false;
        };
        let before = list.len();
        list.retain(keep);
        let changed = list.len() != before;
        if list.is_empty() {
            self.rooms.remove(room_id);
        }
        changed
    }

    /// Drop whole rooms that fail `keep`. Returns whether any were dropped.
    pub fn retain_rooms<F>(&mut self, mut keep: F) -> bool
    where
        F: FnMut(&str) -> bool,
    {
        let before = self.rooms.len();
        self.rooms.retain(|room_id, _| keep(room_id));
        self.rooms.len() != before
    }

    /// Drop every event at or below the watermark.
    pub fn prune_at_or_before(&mut self, watermark: u64) -> bool {
        let mut changed = false;
        self.rooms.retain(|_, list| {
            let before = list.len();
            list.retain(|e| e.origin_server_ts > watermark);
            changed |= list.len() != before;
            !list.is_empty()
        });
        changed
    }

    /// The most recent pending event across all rooms.
    pub fn latest(&self) -> Option<&NotifiedEvent> {
        self.rooms
            .values()
            .filter_map(|list| list.last())
            .max_by(|a, b| a.cmp_recency(b))
    }

    pub fn contains_event(&self, event_id: &str) -> bool {
        self.rooms
            .values()
            .any(|list| list.iter().any(|e| e.event_id == event_id))
    }

    pub fn room(&self, room_id: &str) -> Option<&[NotifiedEvent]> {
        self.rooms.get(room_id).map(Vec::as_slice)
    }

    pub fn rooms(&self) -> impl Iterator<Item = (&str, &[NotifiedEvent])> {
        self.rooms.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn room_ids(&self) -> Vec<String> {
        self.rooms.keys().cloned().collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn event_count(&self) -> usize {
        self.rooms.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(room: &str, id: &str, ts: u64) -> NotifiedEvent {
        NotifiedEvent {
            room_id: room.into(),
            event_id: id.into(),
            rule: BingRule::new(".m.rule.message"),
            origin_server_ts: ts,
            sender: "@bob:example.org".into(),
        }
    }

    fn ids(set: &RoomNotificationSet, room: &str) -> Vec<String> {
        set.room(room)
            .unwrap_or_default()
            .iter()
            .map(|e| e.event_id.clone())
            .collect()
    }

    #[test]
    fn test_insert_keeps_timestamp_order() {
        let mut set = RoomNotificationSet::new();
        assert!(set.insert(ev("!r", "$c", 300)));
        assert!(set.insert(ev("!r", "$a", 100)));
        assert!(set.insert(ev("!r", "$b", 200)));
        assert_eq!(ids(&set, "!r"), ["$a", "$b", "$c"]);
    }

    #[test]
    fn test_equal_timestamps_order_by_event_id() {
        let mut set = RoomNotificationSet::new();
        set.insert(ev("!r", "$z", 100));
        set.insert(ev("!r", "$m", 100));
        set.insert(ev("!r", "$a", 100));
        assert_eq!(ids(&set, "!r"), ["$a", "$m", "$z"]);
        assert_eq!(set.latest().unwrap().event_id, "$z");
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut set = RoomNotificationSet::new();
        assert!(set.insert(ev("!r", "$a", 100)));
        assert!(!set.insert(ev("!r", "$a", 100)));
        assert_eq!(set.event_count(), 1);
    }

    #[test]
    fn test_removing_last_event_drops_room() {
        let mut set = RoomNotificationSet::new();
        set.insert(ev("!r", "$a", 100));
        assert!(set.remove_event("!r", "$a"));
        assert!(set.is_empty());
        assert_eq!(set.room("!r"), None);
        assert!(!set.remove_event("!r", "$a"));
    }

    #[test]
    fn test_prune_watermark() {
        let mut set = RoomNotificationSet::new();
        set.insert(ev("!r1", "$a", 100));
        set.insert(ev("!r1", "$b", 200));
        set.insert(ev("!r2", "$c", 150));
        assert!(set.prune_at_or_before(150));
        assert_eq!(set.room_ids(), ["!r1"]);
        assert_eq!(ids(&set, "!r1"), ["$b"]);
        assert!(!set.prune_at_or_before(150));
    }

    #[test]
    fn test_latest_across_rooms() {
        let mut set = RoomNotificationSet::new();
        set.insert(ev("!r1", "$a", 100));
        set.insert(ev("!r2", "$b", 500));
        set.insert(ev("!r3", "$c", 300));
        assert_eq!(set.latest().unwrap().event_id, "$b");
        assert_eq!(set.room_count(), 3);
        assert!(set.contains_event("$c"));
    }

    #[test]
    fn test_retain_rooms() {
        let mut set = RoomNotificationSet::new();
        set.insert(ev("!keep", "$a", 1));
        set.insert(ev("!gone", "$b", 2));
        assert!(set.retain_rooms(|r| r == "!keep"));
        assert_eq!(set.room_ids(), ["!keep"]);
    }
}
