//! Shared test utilities for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::{broadcast, mpsc};

use vx_api::{HttpPusher, Pusher, PusherApi, PusherData};
use vx_core::config::{AppConfig, ConfigHandle, DatabaseConfig};
use vx_core::constants::event_types;
use vx_core::error::{VxError, VxResult};
use vx_models::models::push_state::RegistrationState;
use vx_models::{BingRule, Database, LiveEvent};
use vx_services::event_bus::{AppEvent, EventBus};
use vx_services::event_stream::{
    EventStreamController, ForegroundNotificationState, MonitoredSession, RestartScheduler,
    SessionEvent, SessionFactory, SessionStream, SharedForeground, StreamCommand, StreamDeps,
};
use vx_services::notification::{NotificationService, NotificationSource, RoomUnreadState};
use vx_services::push::{PushProvider, PushRegistrationCoordinator};
use vx_services::renderer::{NotificationRenderer, RenderedNotification};

/// Create a temporary database with full schema and migrations applied.
/// Returns the Database and the TempDir (must be held alive for the duration of the test).
pub fn create_test_db() -> (Database, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let path = dir.path().join("test.db");
    let config = DatabaseConfig::default();
    let db = Database::init(&path, &config).expect("failed to init test database");
    (db, dir)
}

/// Default configuration with short retry and restart delays.
pub fn create_test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.push.retry_delay_ms = 50;
    config.push.device_display_name = "test-device".into();
    config.service.restart_min_delay_ms = 3_000;
    config.service.restart_max_delay_ms = 8_000;
    config
}

pub fn create_test_config_handle() -> ConfigHandle {
    ConfigHandle::new(create_test_config())
}

/// Create an EventBus with a small buffer suitable for tests.
pub fn create_test_event_bus() -> EventBus {
    EventBus::new(64)
}

// ─── Push provider ──────────────────────────────────────────────────────────

/// Issues `tok-1`, `tok-2`, ... : a fresh token after every clear.
#[derive(Default)]
pub struct MockPushProvider {
    token: Mutex<Option<String>>,
    issued: AtomicUsize,
    pub fail: AtomicBool,
    pub token_calls: AtomicUsize,
    pub clear_calls: AtomicUsize,
}

impl MockPushProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let provider = Self::default();
        provider.fail.store(true, Ordering::SeqCst);
        Arc::new(provider)
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushProvider for MockPushProvider {
    async fn registration_token(&self) -> VxResult<String> {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(VxError::PushProvider("play services unavailable".into()));
        }
        let mut token = self.token.lock().unwrap();
        if token.is_none() {
            let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
            *token = Some(format!("tok-{n}"));
        }
        Ok(token.clone().unwrap())
    }

    async fn clear_registration_token(&self) -> VxResult<()> {
        self.clear_calls.fetch_add(1, Ordering::SeqCst);
        *self.token.lock().unwrap() = None;
        Ok(())
    }
}

// ─── Pusher sessions ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    None,
    Network,
    Server(u16),
    NotFound,
}

impl FailMode {
    fn error(self) -> Option<VxError> {
        match self {
            FailMode::None => None,
            FailMode::Network => Some(VxError::Timeout("connection timed out".into())),
            FailMode::Server(status) => Some(VxError::ServerError {
                status,
                errcode: Some("M_UNKNOWN".into()),
                message: "boom".into(),
            }),
            FailMode::NotFound => Some(VxError::NotFound("pusher".into())),
        }
    }
}

/// In-memory home server for one session.
pub struct MockPusherSession {
    user_id: String,
    pub add_fail: Mutex<FailMode>,
    pub remove_fail: Mutex<FailMode>,
    pub delay: Mutex<Duration>,
    pub added: Mutex<Vec<HttpPusher>>,
    pub removed: Mutex<Vec<HttpPusher>>,
    pub add_calls: AtomicUsize,
    pub remove_calls: AtomicUsize,
}

impl MockPusherSession {
    pub fn new(user_id: &str) -> Arc<Self> {
        Arc::new(Self {
            user_id: user_id.to_string(),
            add_fail: Mutex::new(FailMode::None),
            remove_fail: Mutex::new(FailMode::None),
            delay: Mutex::new(Duration::ZERO),
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            add_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
        })
    }

    pub fn fail_add(&self, mode: FailMode) {
        *self.add_fail.lock().unwrap() = mode;
    }

    pub fn fail_remove(&self, mode: FailMode) {
        *self.remove_fail.lock().unwrap() = mode;
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn add_calls(&self) -> usize {
        self.add_calls.load(Ordering::SeqCst)
    }

    pub fn remove_calls(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn added(&self) -> Vec<HttpPusher> {
        self.added.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<HttpPusher> {
        self.removed.lock().unwrap().clone()
    }

    pub fn as_api(self: &Arc<Self>) -> Arc<dyn PusherApi> {
        self.clone()
    }
}

#[async_trait]
impl PusherApi for MockPusherSession {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn add_http_pusher(&self, pusher: &HttpPusher) -> VxResult<()> {
        self.add_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.add_fail.lock().unwrap().error() {
            return Err(e);
        }
        self.added.lock().unwrap().push(pusher.clone());
        Ok(())
    }

    async fn remove_http_pusher(&self, pusher: &HttpPusher) -> VxResult<()> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Some(e) = self.remove_fail.lock().unwrap().error() {
            return Err(e);
        }
        self.removed.lock().unwrap().push(pusher.clone());
        Ok(())
    }

    async fn get_pushers(&self) -> VxResult<Vec<Pusher>> {
        let removed = self.removed();
        Ok(self
            .added()
            .into_iter()
            .filter(|p| !removed.iter().any(|r| r.pushkey == p.pushkey))
            .map(|p| Pusher {
                pushkey: p.pushkey,
                kind: Some("http".into()),
                app_id: p.app_id,
                app_display_name: p.app_display_name,
                device_display_name: p.device_display_name,
                profile_tag: Some(p.profile_tag),
                lang: p.lang,
                data: PusherData {
                    url: Some(p.url),
                    format: None,
                },
            })
            .collect())
    }
}

// ─── Event stream sessions ──────────────────────────────────────────────────

#[derive(Default)]
pub struct MockStream {
    user_id: String,
    pub events: Mutex<Option<mpsc::UnboundedSender<SessionEvent>>>,
    pub starts: AtomicUsize,
    pub pauses: AtomicUsize,
    pub resumes: AtomicUsize,
    pub stops: AtomicUsize,
    pub catchups: AtomicUsize,
    pub network_refreshes: AtomicUsize,
    pub initial_sync_complete: AtomicBool,
}

impl MockStream {
    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn complete_initial_sync(&self) {
        self.initial_sync_complete.store(true, Ordering::SeqCst);
    }

    /// Deliver an event as the sync SDK would.
    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = self.events.lock().unwrap().as_ref() {
            tx.send(event).unwrap();
        }
    }
}

impl SessionStream for MockStream {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn start(&self, events: mpsc::UnboundedSender<SessionEvent>) -> VxResult<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        *self.events.lock().unwrap() = Some(events);
        Ok(())
    }

    fn pause(&self) {
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn catchup(&self) {
        self.catchups.fetch_add(1, Ordering::SeqCst);
    }

    fn refresh_network_connections(&self) {
        self.network_refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn is_initial_sync_complete(&self) -> bool {
        self.initial_sync_complete.load(Ordering::SeqCst)
    }
}

/// Room unread state that tests edit directly. Every event fulfils the message rule.
pub struct MockSource {
    user_id: String,
    pub rooms: Mutex<Vec<RoomUnreadState>>,
}

impl MockSource {
    pub fn set_rooms(&self, rooms: Vec<RoomUnreadState>) {
        *self.rooms.lock().unwrap() = rooms;
    }
}

impl NotificationSource for MockSource {
    fn user_id(&self) -> &str {
        &self.user_id
    }

    fn rooms(&self) -> Vec<RoomUnreadState> {
        self.rooms.lock().unwrap().clone()
    }

    fn fulfilled_rule(&self, _event: &LiveEvent) -> Option<BingRule> {
        Some(message_rule())
    }
}

/// Opens mock sessions and keeps them for inspection.
#[derive(Default)]
pub struct MockSessionFactory {
    pub streams: Mutex<HashMap<String, Arc<MockStream>>>,
    pub sources: Mutex<HashMap<String, Arc<MockSource>>>,
    pub initially_synced: AtomicBool,
}

impl MockSessionFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn synced() -> Arc<Self> {
        let factory = Self::default();
        factory.initially_synced.store(true, Ordering::SeqCst);
        Arc::new(factory)
    }

    pub fn stream(&self, user_id: &str) -> Arc<MockStream> {
        self.streams.lock().unwrap()[user_id].clone()
    }

    pub fn source(&self, user_id: &str) -> Arc<MockSource> {
        self.sources.lock().unwrap()[user_id].clone()
    }
}

impl SessionFactory for MockSessionFactory {
    fn open(&self, user_id: &str) -> VxResult<MonitoredSession> {
        let stream = self
            .streams
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_insert_with(|| {
                let stream = MockStream {
                    user_id: user_id.to_string(),
                    ..Default::default()
                };
                if self.initially_synced.load(Ordering::SeqCst) {
                    stream.complete_initial_sync();
                }
                Arc::new(stream)
            })
            .clone();
        let source = self
            .sources
            .lock()
            .unwrap()
            .entry(user_id.to_string())
            .or_insert_with(|| {
                Arc::new(MockSource {
                    user_id: user_id.to_string(),
                    rooms: Mutex::new(Vec::new()),
                })
            })
            .clone();
        Ok(MonitoredSession {
            stream,
            source,
        })
    }
}

// ─── Renderer and scheduler ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Message(RenderedNotification),
    ClearMessage,
    Foreground(ForegroundNotificationState),
    HideForeground,
    Call { call_id: String, in_progress: bool },
    HideCall(String),
}

#[derive(Default)]
pub struct RecordingRenderer {
    pub calls: Mutex<Vec<Rendered>>,
}

impl RecordingRenderer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Rendered> {
        self.calls.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<RenderedNotification> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Rendered::Message(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Rendered) -> VxResult<()> {
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

impl NotificationRenderer for RecordingRenderer {
    fn show_message_notification(&self, notification: &RenderedNotification) -> VxResult<()> {
        self.record(Rendered::Message(notification.clone()))
    }

    fn clear_message_notification(&self) -> VxResult<()> {
        self.record(Rendered::ClearMessage)
    }

    fn show_foreground_notification(&self, state: ForegroundNotificationState) -> VxResult<()> {
        self.record(Rendered::Foreground(state))
    }

    fn hide_foreground_notification(&self) -> VxResult<()> {
        self.record(Rendered::HideForeground)
    }

    fn show_call_notification(
        &self,
        _room_id: &str,
        call_id: &str,
        _sender: &str,
        in_progress: bool,
    ) -> VxResult<()> {
        self.record(Rendered::Call {
            call_id: call_id.to_string(),
            in_progress,
        })
    }

    fn hide_call_notification(&self, call_id: &str) -> VxResult<()> {
        self.record(Rendered::HideCall(call_id.to_string()))
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    pub scheduled: Mutex<Vec<(Duration, StreamCommand)>>,
    pub cancels: AtomicUsize,
}

impl RecordingScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn scheduled(&self) -> Vec<(Duration, StreamCommand)> {
        self.scheduled.lock().unwrap().clone()
    }
}

impl RestartScheduler for RecordingScheduler {
    fn schedule_restart(&self, delay: Duration, command: StreamCommand) {
        self.scheduled.lock().unwrap().push((delay, command));
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

// ─── Assembled fixtures ─────────────────────────────────────────────────────

pub struct PushFixture {
    pub db: Database,
    pub _dir: TempDir,
    pub config: ConfigHandle,
    pub bus: EventBus,
    pub provider: Arc<MockPushProvider>,
    pub coordinator: PushRegistrationCoordinator,
}

pub fn push_fixture_with(provider: Arc<MockPushProvider>) -> PushFixture {
    let (db, dir) = create_test_db();
    let config = create_test_config_handle();
    let bus = create_test_event_bus();
    let coordinator =
        PushRegistrationCoordinator::new(db.clone(), config.clone(), provider.clone(), bus.clone())
            .expect("failed to build coordinator");
    PushFixture {
        db,
        _dir: dir,
        config,
        bus,
        provider,
        coordinator,
    }
}

pub fn push_fixture() -> PushFixture {
    push_fixture_with(MockPushProvider::new())
}

pub struct StreamFixture {
    pub push: PushFixture,
    pub factory: Arc<MockSessionFactory>,
    pub renderer: Arc<RecordingRenderer>,
    pub scheduler: Arc<RecordingScheduler>,
    pub foreground: Arc<SharedForeground>,
    pub notifications: NotificationService,
    pub controller: EventStreamController,
}

pub fn stream_fixture_with(factory: Arc<MockSessionFactory>) -> StreamFixture {
    let push = push_fixture();
    let renderer = RecordingRenderer::new();
    let scheduler = RecordingScheduler::new();
    let foreground = Arc::new(SharedForeground::new());
    let notifications = NotificationService::new(
        push.db.clone(),
        renderer.clone(),
        push.bus.clone(),
        foreground.clone(),
    );
    let controller = EventStreamController::new(StreamDeps {
        database: push.db.clone(),
        config: push.config.clone(),
        event_bus: push.bus.clone(),
        coordinator: push.coordinator.clone(),
        notifications: notifications.clone(),
        renderer: renderer.clone(),
        tracker: foreground.clone(),
        factory: factory.clone(),
        scheduler: Some(scheduler.clone()),
    });
    StreamFixture {
        push,
        factory,
        renderer,
        scheduler,
        foreground,
        notifications,
        controller,
    }
}

pub fn stream_fixture() -> StreamFixture {
    stream_fixture_with(MockSessionFactory::synced())
}

// ─── Events ─────────────────────────────────────────────────────────────────

pub fn message_rule() -> BingRule {
    BingRule::new(".m.rule.message")
}

pub fn text_event(room: &str, id: &str, ts: u64) -> LiveEvent {
    LiveEvent::new(id, room, "@bob:example.org", event_types::MESSAGE, ts)
        .with_content(json!({"msgtype": "m.text", "body": format!("message {id}")}))
}

pub fn call_event(ty: &str, room: &str, id: &str, call_id: &str, ts: u64) -> LiveEvent {
    LiveEvent::new(id, room, "@bob:example.org", ty, ts)
        .with_content(json!({"call_id": call_id, "version": 0}))
}

pub fn unread(room: &str, events: Vec<LiveEvent>) -> RoomUnreadState {
    RoomUnreadState {
        room_id: room.to_string(),
        invite: None,
        unread: events,
    }
}

// ─── Waiting ────────────────────────────────────────────────────────────────

/// Poll until the coordinator settles on `state`.
pub async fn wait_for_state(coordinator: &PushRegistrationCoordinator, state: RegistrationState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if coordinator.current_state().await == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {state}, still {}",
            coordinator.current_state().await
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll until `check` holds.
pub async fn wait_until<F: Fn() -> bool>(what: &str, check: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Receive until an event matches.
pub async fn recv_matching<F: Fn(&AppEvent) -> bool>(
    rx: &mut broadcast::Receiver<AppEvent>,
    matches: F,
) -> AppEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if matches(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
