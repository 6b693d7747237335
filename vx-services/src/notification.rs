//! Notification aggregation.
//!
//! [`NotificationAggregator`] decides which bing events surface and keeps the
//! per-room set of pending notifications. [`NotificationService`] owns one
//! aggregator on a dedicated worker thread; every mutation is a job on its
//! queue, which gives live events, read receipts and dismissals a single
//! total order.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use vx_core::error::{VxError, VxResult};
use vx_models::models::settings::{keys, Settings};
use vx_models::{
    BingRule, Database, LiveEvent, NotificationSnapshot, NotifiedEvent, RoomNotificationSet,
};

use crate::event_bus::{AppEvent, EventBus};
use crate::event_stream::ForegroundTracker;
use crate::renderer::NotificationRenderer;
use crate::service::{Service, ServiceState, SharedServiceState};

/// Unread state of one room as the session sees it.
#[derive(Debug, Clone, Default)]
pub struct RoomUnreadState {
    pub room_id: String,
    /// Set when the user is invited to the room rather than joined.
    pub invite: Option<LiveEvent>,
    /// Events after the read receipt, oldest first.
    pub unread: Vec<LiveEvent>,
}

/// Read side of a session used to rebuild and prune notifications.
pub trait NotificationSource: Send + Sync {
    fn user_id(&self) -> &str;

    fn rooms(&self) -> Vec<RoomUnreadState>;

    /// The push rule `event` fulfils, if any.
    fn fulfilled_rule(&self, event: &LiveEvent) -> Option<BingRule>;
}

/// Conditions a bing event is judged against.
#[derive(Debug, Clone, Default)]
pub struct BingContext {
    /// The session the event arrived on.
    pub user_id: String,
    pub notifications_allowed: bool,
    pub app_visible: bool,
    pub open_room_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    Duplicate,
    NotificationsDisabled,
    OwnEvent,
    RoomOpen,
    NoBody,
    MissingCallId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BingOutcome {
    Dropped(DropReason),
    Queued,
    IncomingCall {
        room_id: String,
        call_id: String,
        sender: String,
    },
}

/// What the displayed message notification should become.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationDecision {
    Unchanged,
    Clear,
    Render {
        event: NotifiedEvent,
        is_background: bool,
        rooms: RoomNotificationSet,
    },
}

/// Pending notifications and the rules that fill and prune them.
#[derive(Debug)]
pub struct NotificationAggregator {
    rooms: RoomNotificationSet,
    /// Accepted bing events not yet merged into `rooms`.
    pending: Vec<NotifiedEvent>,
    dismissed_before: u64,
    /// Sources whose rooms have been scanned in full.
    scanned: HashSet<String>,
    /// Newest event merged by the last refresh.
    last_drained: Option<NotifiedEvent>,
    displayed: bool,
    /// Changed outside a refresh; the next decision re-renders.
    dirty: bool,
    /// call_id to room id of calls that rang and have not ended.
    active_calls: HashMap<String, String>,
}

impl Default for NotificationAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationAggregator {
    pub fn new() -> Self {
        Self {
            rooms: RoomNotificationSet::new(),
            pending: Vec::new(),
            dismissed_before: 0,
            scanned: HashSet::new(),
            last_drained: None,
            displayed: false,
            dirty: false,
            active_calls: HashMap::new(),
        }
    }

    pub fn rooms(&self) -> &RoomNotificationSet {
        &self.rooms
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn dismissed_before(&self) -> u64 {
        self.dismissed_before
    }

    /// No source has been scanned yet.
    pub fn is_cold(&self) -> bool {
        self.scanned.is_empty()
    }

    /// Scan `user_id`'s rooms again on the next refresh.
    pub fn forget_source(&mut self, user_id: &str) {
        self.scanned.remove(user_id);
    }

    pub fn active_calls(&self) -> impl Iterator<Item = (&str, &str)> {
        self.active_calls
            .iter()
            .map(|(call, room)| (call.as_str(), room.as_str()))
    }

    /// Judge a bing event.
    ///
    /// Call invites go to the call path; other accepted events are queued
    /// until the next refresh.
    pub fn on_bing_event(&mut self, event: &LiveEvent, rule: BingRule, ctx: &BingContext) -> BingOutcome {
        if self.pending.iter().any(|e| e.event_id == event.event_id)
            || self.rooms.contains_event(&event.event_id)
        {
            return BingOutcome::Dropped(DropReason::Duplicate);
        }
        if !ctx.notifications_allowed {
            return BingOutcome::Dropped(DropReason::NotificationsDisabled);
        }
        if event.sender == ctx.user_id {
            return BingOutcome::Dropped(DropReason::OwnEvent);
        }
        if ctx.app_visible && ctx.open_room_id.as_deref() == Some(event.room_id.as_str()) {
            return BingOutcome::Dropped(DropReason::RoomOpen);
        }
        if event.body().is_none() && !event.is_membership() && !event.is_call_event() {
            return BingOutcome::Dropped(DropReason::NoBody);
        }

        if event.is_call_invite() {
            let Some(call_id) = event.call_id() else {
                return BingOutcome::Dropped(DropReason::MissingCallId);
            };
            self.active_calls
                .insert(call_id.to_string(), event.room_id.clone());
            return BingOutcome::IncomingCall {
                room_id: event.room_id.clone(),
                call_id: call_id.to_string(),
                sender: event.sender.clone(),
            };
        }

        self.pending.push(NotifiedEvent::from_event(event, rule));
        BingOutcome::Queued
    }

    /// Bring `rooms` up to date. Returns whether it changed.
    ///
    /// Each room is pruned to its unread tail and rooms that are gone are
    /// dropped. A source seen for the first time has all of its rooms
    /// scanned. Queued bing events are merged last.
    pub fn refresh_notified_messages_list(&mut self, sources: &[Arc<dyn NotificationSource>]) -> bool {
        let before = self.rooms.clone();

        self.prune(sources);
        for source in sources {
            if self.scanned.contains(source.user_id()) {
                continue;
            }
            for room in source.rooms() {
                self.scan_room(source.as_ref(), room);
            }
            self.scanned.insert(source.user_id().to_string());
            debug!(
                "scanned rooms of {}, {} event(s) pending",
                source.user_id(),
                self.rooms.event_count()
            );
        }

        self.last_drained = None;
        for event in std::mem::take(&mut self.pending) {
            if event.origin_server_ts <= self.dismissed_before {
                continue;
            }
            if self.rooms.insert(event.clone()) {
                let newer = self
                    .last_drained
                    .as_ref()
                    .map_or(true, |d| event.cmp_recency(d).is_gt());
                if newer {
                    self.last_drained = Some(event);
                }
            }
        }

        self.rooms != before
    }

    fn scan_room(&mut self, source: &dyn NotificationSource, room: RoomUnreadState) {
        let own = source.user_id();
        if let Some(invite) = room.invite {
            if invite.sender == own {
                return;
            }
            if let Some(rule) = source.fulfilled_rule(&invite).filter(|r| r.notify) {
                self.rooms.insert(NotifiedEvent::from_event(&invite, rule));
            }
            return;
        }
        for event in room
            .unread
            .iter()
            .filter(|e| e.origin_server_ts > self.dismissed_before && e.sender != own)
        {
            if let Some(rule) = source.fulfilled_rule(event).filter(|r| r.notify) {
                self.rooms.insert(NotifiedEvent::from_event(event, rule));
            }
        }
    }

    fn prune(&mut self, sources: &[Arc<dyn NotificationSource>]) {
        let mut unread: HashMap<String, HashSet<String>> = HashMap::new();
        let mut invites: HashSet<String> = HashSet::new();
        for source in sources {
            for room in source.rooms() {
                let ids = unread.entry(room.room_id).or_default();
                if let Some(invite) = room.invite {
                    ids.insert(invite.event_id.clone());
                    invites.insert(invite.event_id);
                }
                ids.extend(room.unread.into_iter().map(|e| e.event_id));
            }
        }

        // Invites stay until answered, whatever the watermark.
        let watermark = self.dismissed_before;
        self.rooms.retain_rooms(|room_id| unread.contains_key(room_id));
        for (room_id, ids) in &unread {
            self.rooms.retain_room(room_id, |e| {
                ids.contains(&e.event_id)
                    && (e.origin_server_ts > watermark || invites.contains(&e.event_id))
            });
        }
    }

    /// Refresh, then decide what the message notification should show.
    ///
    /// A refresh that merged new bing events notifies directly about the
    /// newest of them; any other change shows a background digest led by the
    /// most recent pending event.
    pub fn refresh_messages_notification(
        &mut self,
        sources: &[Arc<dyn NotificationSource>],
    ) -> NotificationDecision {
        let changed = self.refresh_notified_messages_list(sources) | std::mem::take(&mut self.dirty);
        let drained = self.last_drained.take();

        if self.rooms.is_empty() {
            if changed || self.displayed {
                self.displayed = false;
                return NotificationDecision::Clear;
            }
            return NotificationDecision::Unchanged;
        }
        if !changed && drained.is_none() {
            return NotificationDecision::Unchanged;
        }

        let (event, is_background) = match drained {
            Some(event) => (event, false),
            None => match self.rooms.latest() {
                Some(latest) => (latest.clone(), true),
                None => return NotificationDecision::Unchanged,
            },
        };
        self.displayed = true;
        NotificationDecision::Render {
            event,
            is_background,
            rooms: self.rooms.clone(),
        }
    }

    /// Forget a redacted event. Returns whether anything was removed.
    pub fn on_redaction(&mut self, room_id: &str, event_id: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|e| e.event_id != event_id);
        let queued = self.pending.len() != before;
        let removed = self.rooms.remove_event(room_id, event_id);
        self.dirty |= removed;
        removed || queued
    }

    /// Track call signalling. Returns the call id when a ringing call ended.
    pub fn on_live_event(&mut self, event: &LiveEvent) -> Option<String> {
        if event.is_call_invite() {
            return None;
        }
        let call_id = event.call_id()?;
        if matches!(
            event.event_type.as_str(),
            vx_core::constants::event_types::CALL_HANGUP
                | vx_core::constants::event_types::CALL_ANSWER
        ) && self.active_calls.remove(call_id).is_some()
        {
            return Some(call_id.to_string());
        }
        None
    }

    /// Move the dismiss watermark forward. Returns whether it moved.
    pub fn dismiss_before(&mut self, ts: u64) -> bool {
        if ts <= self.dismissed_before {
            return false;
        }
        self.dismissed_before = ts;
        self.pending.retain(|e| e.origin_server_ts > ts);
        self.dirty |= self.rooms.prune_at_or_before(ts);
        true
    }

    /// Dismiss everything pending right now.
    pub fn dismiss_all(&mut self) -> bool {
        let newest = self
            .rooms
            .latest()
            .map(|e| e.origin_server_ts)
            .into_iter()
            .chain(self.pending.iter().map(|e| e.origin_server_ts))
            .max();
        match newest {
            Some(ts) => self.dismiss_before(ts),
            None => false,
        }
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        NotificationSnapshot {
            rooms: self.rooms.clone(),
            dismissed_before: self.dismissed_before,
        }
    }

    /// Seed from a persisted snapshot.
    ///
    /// Sources are still scanned on the next refresh, which picks up events
    /// that arrived while nothing was running.
    pub fn restore(&mut self, snapshot: NotificationSnapshot) {
        self.rooms = snapshot.rooms;
        self.dismissed_before = snapshot.dismissed_before;
        self.displayed = !self.rooms.is_empty();
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

enum Job {
    Bing {
        user_id: String,
        event: LiveEvent,
        rule: BingRule,
    },
    Live(LiveEvent),
    Redaction { room_id: String, event_id: String },
    Refresh,
    AddSource(Arc<dyn NotificationSource>),
    RemoveSource(String),
    DismissBefore(u64),
    DismissAll,
    Snapshot(oneshot::Sender<NotificationSnapshot>),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

struct Worker {
    aggregator: NotificationAggregator,
    sources: Vec<Arc<dyn NotificationSource>>,
    database: Database,
    renderer: Arc<dyn NotificationRenderer>,
    event_bus: EventBus,
    foreground: Arc<dyn ForegroundTracker>,
    saved: NotificationSnapshot,
}

impl Worker {
    fn run(mut self, mut rx: mpsc::UnboundedReceiver<Job>) {
        self.load_snapshot();
        while let Some(job) = rx.blocking_recv() {
            match job {
                Job::Bing {
                    user_id,
                    event,
                    rule,
                } => self.on_bing(user_id, event, rule),
                Job::Live(event) => self.on_live(event),
                Job::Redaction { room_id, event_id } => {
                    if self.aggregator.on_redaction(&room_id, &event_id) {
                        self.refresh();
                    }
                }
                Job::Refresh => self.refresh(),
                Job::AddSource(source) => {
                    self.sources.retain(|s| s.user_id() != source.user_id());
                    self.aggregator.forget_source(source.user_id());
                    self.sources.push(source);
                }
                Job::RemoveSource(user_id) => {
                    self.sources.retain(|s| s.user_id() != user_id);
                    self.aggregator.forget_source(&user_id);
                    self.refresh();
                }
                Job::DismissBefore(ts) => {
                    if self.aggregator.dismiss_before(ts) {
                        self.refresh();
                    }
                }
                Job::DismissAll => {
                    if self.aggregator.dismiss_all() {
                        self.refresh();
                    }
                }
                Job::Snapshot(reply) => {
                    let _ = reply.send(self.aggregator.snapshot());
                }
                Job::Flush(reply) => {
                    let _ = reply.send(());
                }
                Job::Shutdown => break,
            }
        }
        self.persist();
        debug!("notification worker stopped");
    }

    fn load_snapshot(&mut self) {
        let loaded = self
            .database
            .conn()
            .and_then(|conn| NotificationSnapshot::load(&conn));
        match loaded {
            Ok(Some(snapshot)) => {
                info!(
                    "restored {} pending notification(s)",
                    snapshot.rooms.event_count()
                );
                self.saved = snapshot.clone();
                self.aggregator.restore(snapshot);
            }
            Ok(None) => debug!("no notification snapshot, starting cold"),
            Err(e) => warn!("failed to load notification snapshot: {e}"),
        }
    }

    fn context(&self, user_id: String) -> BingContext {
        let notifications_allowed = self
            .database
            .conn()
            .and_then(|conn| Settings::get_bool_or(&conn, keys::ALLOW_NOTIFICATIONS, true))
            .unwrap_or_else(|e| {
                warn!("failed to read notification preference: {e}");
                true
            });
        BingContext {
            user_id,
            notifications_allowed,
            app_visible: self.foreground.is_app_visible(),
            open_room_id: self.foreground.open_room_id(),
        }
    }

    fn on_bing(&mut self, user_id: String, event: LiveEvent, rule: BingRule) {
        let ctx = self.context(user_id);
        match self.aggregator.on_bing_event(&event, rule, &ctx) {
            BingOutcome::Queued => self.refresh(),
            BingOutcome::IncomingCall {
                room_id,
                call_id,
                sender,
            } => {
                info!("incoming call {call_id} in {room_id}");
                self.event_bus.emit(AppEvent::IncomingCall {
                    room_id,
                    call_id,
                    sender,
                });
            }
            BingOutcome::Dropped(reason) => {
                debug!("bing event {} dropped: {reason:?}", event.event_id);
            }
        }
    }

    fn on_live(&mut self, event: LiveEvent) {
        if let Some(redacted) = event.redacts.as_deref() {
            if self.aggregator.on_redaction(&event.room_id, redacted) {
                self.refresh();
            }
            return;
        }
        if let Some(call_id) = self.aggregator.on_live_event(&event) {
            info!("call {call_id} ended");
            self.event_bus.emit(AppEvent::CallEnded { call_id });
        }
    }

    fn refresh(&mut self) {
        match self.aggregator.refresh_messages_notification(&self.sources) {
            NotificationDecision::Unchanged => {}
            NotificationDecision::Clear => {
                if let Err(e) = self.renderer.clear_message_notification() {
                    warn!("failed to clear message notification: {e}");
                }
                self.event_bus.emit(AppEvent::NotificationsCleared);
            }
            NotificationDecision::Render {
                event,
                is_background,
                rooms,
            } => {
                let rendered = self
                    .renderer
                    .build_message_notification(&rooms, &event, is_background);
                if let Err(e) = self.renderer.show_message_notification(&rendered) {
                    warn!("failed to show message notification: {e}");
                }
                self.event_bus.emit(AppEvent::NotificationsUpdated {
                    rooms: rooms.room_count(),
                    events: rooms.event_count(),
                    is_background,
                });
            }
        }
        self.persist();
    }

    fn persist(&mut self) {
        let snapshot = self.aggregator.snapshot();
        if snapshot == self.saved {
            return;
        }
        let saved = self.database.conn().and_then(|conn| snapshot.save(&conn));
        match saved {
            Ok(()) => self.saved = snapshot,
            Err(e) => error!("failed to persist notification snapshot: {e}"),
        }
    }
}

// ─── Service ────────────────────────────────────────────────────────────────

struct Running {
    tx: mpsc::UnboundedSender<Job>,
    thread: JoinHandle<()>,
}

struct Shared {
    database: Database,
    renderer: Arc<dyn NotificationRenderer>,
    event_bus: EventBus,
    foreground: Arc<dyn ForegroundTracker>,
    worker: Mutex<Option<Running>>,
    state: SharedServiceState,
}

/// Handle to the notification worker thread, spawned on first use.
#[derive(Clone)]
pub struct NotificationService {
    shared: Arc<Shared>,
}

impl NotificationService {
    pub fn new(
        database: Database,
        renderer: Arc<dyn NotificationRenderer>,
        event_bus: EventBus,
        foreground: Arc<dyn ForegroundTracker>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                database,
                renderer,
                event_bus,
                foreground,
                worker: Mutex::new(None),
                state: SharedServiceState::new(),
            }),
        }
    }

    fn submit(&self, job: Job) -> VxResult<()> {
        let mut worker = self
            .shared
            .worker
            .lock()
            .map_err(|_| VxError::Internal("notification worker lock poisoned".into()))?;
        if worker.as_ref().map_or(true, |w| w.tx.is_closed()) {
            *worker = Some(self.spawn_worker()?);
        }
        let running = worker
            .as_ref()
            .ok_or_else(|| VxError::Internal("notification worker missing".into()))?;
        running
            .tx
            .send(job)
            .map_err(|_| VxError::Internal("notification worker stopped".into()))
    }

    fn spawn_worker(&self) -> VxResult<Running> {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = Worker {
            aggregator: NotificationAggregator::new(),
            sources: Vec::new(),
            database: self.shared.database.clone(),
            renderer: self.shared.renderer.clone(),
            event_bus: self.shared.event_bus.clone(),
            foreground: self.shared.foreground.clone(),
            saved: NotificationSnapshot::default(),
        };
        let thread = std::thread::Builder::new()
            .name("vx-notifications".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| VxError::ServiceInit(format!("notification worker: {e}")))?;
        debug!("notification worker spawned");
        Ok(Running { tx, thread })
    }

    /// Judge a bing event `user_id`'s session received.
    pub fn on_bing_event(&self, user_id: &str, event: LiveEvent, rule: BingRule) -> VxResult<()> {
        self.submit(Job::Bing {
            user_id: user_id.to_string(),
            event,
            rule,
        })
    }

    pub fn on_live_event(&self, event: LiveEvent) -> VxResult<()> {
        self.submit(Job::Live(event))
    }

    pub fn on_redaction(&self, room_id: &str, event_id: &str) -> VxResult<()> {
        self.submit(Job::Redaction {
            room_id: room_id.to_string(),
            event_id: event_id.to_string(),
        })
    }

    /// Re-evaluate after read receipts or a processed sync chunk.
    pub fn refresh(&self) -> VxResult<()> {
        self.submit(Job::Refresh)
    }

    pub fn add_source(&self, source: Arc<dyn NotificationSource>) -> VxResult<()> {
        self.submit(Job::AddSource(source))
    }

    pub fn remove_source(&self, user_id: &str) -> VxResult<()> {
        self.submit(Job::RemoveSource(user_id.to_string()))
    }

    pub fn dismiss_before(&self, ts: u64) -> VxResult<()> {
        self.submit(Job::DismissBefore(ts))
    }

    pub fn dismiss_all(&self) -> VxResult<()> {
        self.submit(Job::DismissAll)
    }

    /// Current aggregate, after every job queued so far.
    pub async fn snapshot(&self) -> VxResult<NotificationSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.submit(Job::Snapshot(tx))?;
        rx.await
            .map_err(|_| VxError::Internal("notification worker dropped the request".into()))
    }

    /// Wait until every job queued so far has run.
    pub async fn flush(&self) -> VxResult<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Job::Flush(tx))?;
        rx.await
            .map_err(|_| VxError::Internal("notification worker dropped the request".into()))
    }

    fn stop_worker(&self) {
        let running = match self.shared.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(_) => None,
        };
        if let Some(running) = running {
            let _ = running.tx.send(Job::Shutdown);
            if running.thread.join().is_err() {
                error!("notification worker panicked");
            }
        }
    }
}

impl Service for NotificationService {
    fn name(&self) -> &str {
        "notification"
    }

    fn state(&self) -> ServiceState {
        self.shared.state.get()
    }

    fn init(&mut self) -> VxResult<()> {
        self.shared.state.set(ServiceState::Running);
        info!("notification service initialized");
        Ok(())
    }

    fn shutdown(&mut self) -> VxResult<()> {
        self.shared.state.set(ServiceState::ShuttingDown);
        self.stop_worker();
        self.shared.state.set(ServiceState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vx_core::constants::event_types;

    struct FakeSource {
        user_id: String,
        rooms: Mutex<Vec<RoomUnreadState>>,
    }

    impl FakeSource {
        fn new(rooms: Vec<RoomUnreadState>) -> Arc<Self> {
            Self::with_user("@me:example.org", rooms)
        }

        fn with_user(user_id: &str, rooms: Vec<RoomUnreadState>) -> Arc<Self> {
            Arc::new(Self {
                user_id: user_id.into(),
                rooms: Mutex::new(rooms),
            })
        }

        fn set(&self, rooms: Vec<RoomUnreadState>) {
            *self.rooms.lock().unwrap() = rooms;
        }
    }

    impl NotificationSource for FakeSource {
        fn user_id(&self) -> &str {
            &self.user_id
        }

        fn rooms(&self) -> Vec<RoomUnreadState> {
            self.rooms.lock().unwrap().clone()
        }

        fn fulfilled_rule(&self, _event: &LiveEvent) -> Option<BingRule> {
            Some(BingRule::new(".m.rule.message"))
        }
    }

    fn msg(room: &str, id: &str, ts: u64) -> LiveEvent {
        LiveEvent::new(id, room, "@bob:example.org", event_types::MESSAGE, ts)
            .with_content(json!({"msgtype": "m.text", "body": "hi"}))
    }

    fn unread(room: &str, events: Vec<LiveEvent>) -> RoomUnreadState {
        RoomUnreadState {
            room_id: room.into(),
            invite: None,
            unread: events,
        }
    }

    fn allowed() -> BingContext {
        BingContext {
            user_id: "@me:example.org".into(),
            notifications_allowed: true,
            ..Default::default()
        }
    }

    fn rule() -> BingRule {
        BingRule::new(".m.rule.message")
    }

    fn sources(source: &Arc<FakeSource>) -> Vec<Arc<dyn NotificationSource>> {
        vec![source.clone() as Arc<dyn NotificationSource>]
    }

    #[test]
    fn test_bing_filters() {
        let mut agg = NotificationAggregator::new();
        let e = msg("!r", "$1", 100);

        let off = BingContext::default();
        assert_eq!(
            agg.on_bing_event(&e, rule(), &off),
            BingOutcome::Dropped(DropReason::NotificationsDisabled)
        );

        let open = BingContext {
            app_visible: true,
            open_room_id: Some("!r".into()),
            ..allowed()
        };
        assert_eq!(
            agg.on_bing_event(&e, rule(), &open),
            BingOutcome::Dropped(DropReason::RoomOpen)
        );

        let bodyless = LiveEvent::new("$2", "!r", "@bob:example.org", "m.reaction", 100);
        assert_eq!(
            agg.on_bing_event(&bodyless, rule(), &allowed()),
            BingOutcome::Dropped(DropReason::NoBody)
        );

        assert_eq!(agg.on_bing_event(&e, rule(), &allowed()), BingOutcome::Queued);
        assert_eq!(
            agg.on_bing_event(&e, rule(), &allowed()),
            BingOutcome::Dropped(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_open_room_only_filters_when_visible() {
        let mut agg = NotificationAggregator::new();
        let ctx = BingContext {
            app_visible: false,
            open_room_id: Some("!r".into()),
            ..allowed()
        };
        assert_eq!(
            agg.on_bing_event(&msg("!r", "$1", 1), rule(), &ctx),
            BingOutcome::Queued
        );
    }

    #[test]
    fn test_membership_without_body_is_accepted() {
        let mut agg = NotificationAggregator::new();
        let invite = LiveEvent::new("$m", "!r", "@bob:example.org", event_types::MEMBER, 5)
            .with_content(json!({"membership": "invite"}));
        assert_eq!(agg.on_bing_event(&invite, rule(), &allowed()), BingOutcome::Queued);
    }

    #[test]
    fn test_call_invite_routed_to_call_path() {
        let mut agg = NotificationAggregator::new();
        let invite = LiveEvent::new("$c", "!r", "@bob:example.org", event_types::CALL_INVITE, 5)
            .with_content(json!({"call_id": "call-1"}));
        assert_eq!(
            agg.on_bing_event(&invite, rule(), &allowed()),
            BingOutcome::IncomingCall {
                room_id: "!r".into(),
                call_id: "call-1".into(),
                sender: "@bob:example.org".into(),
            }
        );
        assert_eq!(agg.pending_count(), 0);

        let hangup = LiveEvent::new("$h", "!r", "@bob:example.org", event_types::CALL_HANGUP, 6)
            .with_content(json!({"call_id": "call-1"}));
        assert_eq!(agg.on_live_event(&hangup).as_deref(), Some("call-1"));
        assert_eq!(agg.on_live_event(&hangup), None);
    }

    #[test]
    fn test_cold_scan_respects_watermark_and_invites() {
        let invite = LiveEvent::new("$inv", "!inv", "@bob:example.org", event_types::MEMBER, 10);
        let source = FakeSource::new(vec![
            unread("!a", vec![msg("!a", "$1", 100), msg("!a", "$2", 200)]),
            RoomUnreadState {
                room_id: "!inv".into(),
                invite: Some(invite),
                unread: vec![],
            },
        ]);
        let mut agg = NotificationAggregator::new();
        agg.dismiss_before(150);

        assert!(agg.refresh_notified_messages_list(&sources(&source)));
        assert!(!agg.is_cold());
        assert_eq!(agg.rooms().room("!a").unwrap().len(), 1);
        assert!(agg.rooms().contains_event("$inv"));

        // The invite is older than the watermark but stays until answered.
        assert!(!agg.refresh_notified_messages_list(&sources(&source)));
        assert!(agg.rooms().contains_event("$inv"));
    }

    #[test]
    fn test_own_events_never_notify() {
        let mut agg = NotificationAggregator::new();
        let mine = LiveEvent::new("$mine", "!a", "@me:example.org", event_types::MESSAGE, 100)
            .with_content(json!({"msgtype": "m.text", "body": "hi"}));
        assert_eq!(
            agg.on_bing_event(&mine, rule(), &allowed()),
            BingOutcome::Dropped(DropReason::OwnEvent)
        );

        let source = FakeSource::new(vec![unread("!a", vec![mine, msg("!a", "$1", 200)])]);
        agg.refresh_notified_messages_list(&sources(&source));
        assert!(!agg.rooms().contains_event("$mine"));
        assert!(agg.rooms().contains_event("$1"));
    }

    #[test]
    fn test_late_source_is_scanned() {
        let first = FakeSource::new(vec![unread("!a", vec![msg("!a", "$1", 100)])]);
        let second = FakeSource::with_user(
            "@other:example.org",
            vec![unread("!b", vec![msg("!b", "$2", 200)])],
        );
        let mut agg = NotificationAggregator::new();
        agg.refresh_notified_messages_list(&sources(&first));
        assert!(!agg.rooms().contains_event("$2"));

        let both = vec![
            first as Arc<dyn NotificationSource>,
            second as Arc<dyn NotificationSource>,
        ];
        assert!(agg.refresh_notified_messages_list(&both));
        assert!(agg.rooms().contains_event("$1"));
        assert!(agg.rooms().contains_event("$2"));
    }

    #[test]
    fn test_forgotten_source_is_rescanned() {
        let source = FakeSource::new(vec![]);
        let mut agg = NotificationAggregator::new();
        agg.refresh_notified_messages_list(&sources(&source));

        // Unread events that never came through as bing events.
        source.set(vec![unread("!a", vec![msg("!a", "$1", 100)])]);
        assert!(!agg.refresh_notified_messages_list(&sources(&source)));

        agg.forget_source("@me:example.org");
        assert!(agg.refresh_notified_messages_list(&sources(&source)));
        assert!(agg.rooms().contains_event("$1"));
    }

    #[test]
    fn test_refresh_is_idempotent() {
        let source = FakeSource::new(vec![unread("!a", vec![msg("!a", "$1", 100)])]);
        let mut agg = NotificationAggregator::new();
        assert!(agg.refresh_notified_messages_list(&sources(&source)));
        assert!(!agg.refresh_notified_messages_list(&sources(&source)));
    }

    #[test]
    fn test_read_receipt_removes_room() {
        let source = FakeSource::new(vec![unread("!a", vec![msg("!a", "$1", 100)])]);
        let mut agg = NotificationAggregator::new();
        agg.refresh_notified_messages_list(&sources(&source));

        source.set(vec![unread("!a", vec![])]);
        assert!(agg.refresh_notified_messages_list(&sources(&source)));
        assert!(agg.rooms().room("!a").is_none());
    }

    #[test]
    fn test_vanished_room_dropped() {
        let source = FakeSource::new(vec![unread("!a", vec![msg("!a", "$1", 100)])]);
        let mut agg = NotificationAggregator::new();
        agg.refresh_notified_messages_list(&sources(&source));

        source.set(vec![]);
        assert!(agg.refresh_notified_messages_list(&sources(&source)));
        assert!(agg.rooms().is_empty());
    }

    #[test]
    fn test_direct_then_background_decisions() {
        let source = FakeSource::new(vec![]);
        let mut agg = NotificationAggregator::new();
        assert_eq!(
            agg.refresh_messages_notification(&sources(&source)),
            NotificationDecision::Unchanged
        );

        let e1 = msg("!a", "$1", 100);
        let e2 = msg("!b", "$2", 200);
        source.set(vec![unread("!a", vec![e1.clone()]), unread("!b", vec![e2.clone()])]);
        agg.on_bing_event(&e1, rule(), &allowed());
        agg.on_bing_event(&e2, rule(), &allowed());

        match agg.refresh_messages_notification(&sources(&source)) {
            NotificationDecision::Render {
                event,
                is_background,
                rooms,
            } => {
                assert_eq!(event.event_id, "$2");
                assert!(!is_background);
                assert_eq!(rooms.room_count(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        // Read receipt for room b: background digest led by the newest remaining event.
        source.set(vec![unread("!a", vec![e1]), unread("!b", vec![])]);
        match agg.refresh_messages_notification(&sources(&source)) {
            NotificationDecision::Render {
                event,
                is_background,
                ..
            } => {
                assert_eq!(event.event_id, "$1");
                assert!(is_background);
            }
            other => panic!("unexpected {other:?}"),
        }

        source.set(vec![unread("!a", vec![]), unread("!b", vec![])]);
        assert_eq!(
            agg.refresh_messages_notification(&sources(&source)),
            NotificationDecision::Clear
        );
        assert_eq!(
            agg.refresh_messages_notification(&sources(&source)),
            NotificationDecision::Unchanged
        );
    }

    #[test]
    fn test_dismiss_watermark_only_moves_forward() {
        let mut agg = NotificationAggregator::new();
        assert!(agg.dismiss_before(100));
        assert!(!agg.dismiss_before(50));
        assert_eq!(agg.dismissed_before(), 100);
    }

    #[test]
    fn test_dismiss_all_clears_pending() {
        let source = FakeSource::new(vec![unread("!a", vec![msg("!a", "$1", 100)])]);
        let mut agg = NotificationAggregator::new();
        agg.refresh_notified_messages_list(&sources(&source));
        agg.on_bing_event(&msg("!a", "$2", 300), rule(), &allowed());

        assert!(agg.dismiss_all());
        assert_eq!(agg.dismissed_before(), 300);
        assert_eq!(agg.pending_count(), 0);
        assert!(agg.rooms().is_empty());
    }

    #[test]
    fn test_redaction_removes_event() {
        let source = FakeSource::new(vec![unread("!a", vec![msg("!a", "$1", 100)])]);
        let mut agg = NotificationAggregator::new();
        agg.refresh_notified_messages_list(&sources(&source));
        assert!(agg.on_redaction("!a", "$1"));
        assert!(agg.rooms().is_empty());
        assert!(!agg.on_redaction("!a", "$1"));
    }

    #[test]
    fn test_redaction_rerenders_remaining() {
        let source = FakeSource::new(vec![unread(
            "!a",
            vec![msg("!a", "$1", 100), msg("!a", "$2", 200)],
        )]);
        let mut agg = NotificationAggregator::new();
        agg.refresh_messages_notification(&sources(&source));
        assert!(agg.on_redaction("!a", "$2"));

        match agg.refresh_messages_notification(&sources(&source)) {
            NotificationDecision::Render { event, rooms, .. } => {
                assert_eq!(event.event_id, "$1");
                assert_eq!(rooms.event_count(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_restore_seeds_then_scans() {
        let mut rooms = RoomNotificationSet::new();
        rooms.insert(NotifiedEvent::from_event(&msg("!a", "$1", 100), rule()));
        rooms.insert(NotifiedEvent::from_event(&msg("!gone", "$0", 90), rule()));
        let mut agg = NotificationAggregator::new();
        agg.restore(NotificationSnapshot {
            rooms,
            dismissed_before: 50,
        });
        assert!(agg.is_cold());

        // Restored events survive only while still unread; events that
        // arrived while stopped are picked up by the scan.
        let source = FakeSource::new(vec![
            unread("!a", vec![msg("!a", "$1", 100)]),
            unread("!b", vec![msg("!b", "$2", 300), msg("!b", "$old", 40)]),
        ]);
        assert!(agg.refresh_notified_messages_list(&sources(&source)));
        assert!(!agg.is_cold());
        assert!(agg.rooms().contains_event("$1"));
        assert!(agg.rooms().contains_event("$2"));
        assert!(!agg.rooms().contains_event("$old"));
        assert!(agg.rooms().room("!gone").is_none());
        assert_eq!(agg.snapshot().dismissed_before, 50);
    }
}
