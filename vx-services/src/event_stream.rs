//! Event stream lifecycle.
//!
//! [`EventStreamController`] owns the run state of the background event
//! stream service, separate from the per-session sync state of each
//! [`SessionStream`]. It decides which sticky foreground notification is
//! shown and survives process death by persisting the monitored user ids
//! and a crash marker.
//!
//! Commands arrive either as direct calls or as [`StreamCommand`]s on the
//! actor loop started by [`EventStreamController::spawn`].

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vx_core::config::ConfigHandle;
use vx_core::error::{VxError, VxResult};
use vx_models::models::push_state::RegistrationState;
use vx_models::models::settings::{keys, Settings};
use vx_models::{BingRule, Database, LiveEvent, PushPreferences};

use crate::event_bus::{AppEvent, EventBus};
use crate::notification::{NotificationService, NotificationSource};
use crate::push::PushRegistrationCoordinator;
use crate::renderer::NotificationRenderer;
use crate::service::{Service, ServiceState, SharedServiceState};

/// Run state of the event stream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Idle,
    Start,
    Pause,
    Resume,
    Catchup,
    Stop,
    AutoRestart,
}

impl StreamState {
    /// Streams are live and long-polling.
    pub fn is_running(self) -> bool {
        matches!(self, Self::Start | Self::Resume | Self::AutoRestart)
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Catchup => "catchup",
            Self::Stop => "stop",
            Self::AutoRestart => "auto_restart",
        };
        f.write_str(label)
    }
}

/// Control actions accepted by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamAction {
    Start,
    Stop,
    Pause,
    Resume,
    Catchup,
    GcmStatusUpdate,
    AutoRestart,
}

impl StreamAction {
    pub const ALL: [StreamAction; 7] = [
        Self::Start,
        Self::Stop,
        Self::Pause,
        Self::Resume,
        Self::Catchup,
        Self::GcmStatusUpdate,
        Self::AutoRestart,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Catchup => "CATCHUP",
            Self::GcmStatusUpdate => "GCM_STATUS_UPDATE",
            Self::AutoRestart => "AUTO_RESTART",
        }
    }
}

impl fmt::Display for StreamAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamAction {
    type Err = VxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|a| a.as_str() == wanted)
            .ok_or_else(|| VxError::InvalidState(format!("unknown stream action: {s}")))
    }
}

/// One control request with its extras.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamCommand {
    pub action: StreamAction,
    pub user_ids: Vec<String>,
    /// Set on the restart the service schedules for itself.
    pub auto_restart: bool,
}

impl StreamCommand {
    pub fn new(action: StreamAction) -> Self {
        Self {
            action,
            user_ids: Vec::new(),
            auto_restart: false,
        }
    }

    pub fn with_user_ids(mut self, user_ids: Vec<String>) -> Self {
        self.user_ids = user_ids;
        self
    }
}

/// Sticky notification keeping the service visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForegroundNotificationState {
    None,
    InitialSyncing,
    ListeningForEvents,
    IncomingCall,
    CallInProgress,
}

impl ForegroundNotificationState {
    pub fn is_call(self) -> bool {
        matches!(self, Self::IncomingCall | Self::CallInProgress)
    }

    pub fn description(self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::InitialSyncing => Some("Synchronising"),
            Self::ListeningForEvents => Some("Listening for events"),
            Self::IncomingCall => Some("Incoming call"),
            Self::CallInProgress => Some("Call in progress"),
        }
    }
}

impl fmt::Display for ForegroundNotificationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::InitialSyncing => "initial_syncing",
            Self::ListeningForEvents => "listening_for_events",
            Self::IncomingCall => "incoming_call",
            Self::CallInProgress => "call_in_progress",
        };
        f.write_str(label)
    }
}

/// What a monitored session reports while its stream runs.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Any live room event, redactions included.
    Live { user_id: String, event: LiveEvent },
    /// A live event that fulfilled a push rule.
    Bing {
        user_id: String,
        event: LiveEvent,
        rule: BingRule,
    },
    InitialSyncComplete { user_id: String },
    ReadReceipt { user_id: String, room_id: String },
    BingRulesUpdated { user_id: String },
    /// A sync response was fully applied.
    ChunkProcessed { user_id: String },
}

/// Per-session event stream, driven by the sync SDK.
pub trait SessionStream: Send + Sync {
    fn user_id(&self) -> &str;

    /// Start or resume streaming, delivering events on `events`.
    fn start(&self, events: mpsc::UnboundedSender<SessionEvent>) -> VxResult<()>;

    fn pause(&self);

    fn resume(&self);

    fn stop(&self);

    /// Poll once now instead of waiting for the long-poll.
    fn catchup(&self);

    fn refresh_network_connections(&self);

    fn is_initial_sync_complete(&self) -> bool;
}

/// A session opened for monitoring.
#[derive(Clone)]
pub struct MonitoredSession {
    pub stream: Arc<dyn SessionStream>,
    pub source: Arc<dyn NotificationSource>,
}

/// Opens sessions by user id.
pub trait SessionFactory: Send + Sync {
    fn open(&self, user_id: &str) -> VxResult<MonitoredSession>;
}

/// Deferred self-restart.
pub trait RestartScheduler: Send + Sync {
    fn schedule_restart(&self, delay: Duration, command: StreamCommand);

    fn cancel(&self);
}

/// Restart scheduler that re-enters the controller's own command queue.
pub struct TokioRestartScheduler {
    commands: mpsc::UnboundedSender<StreamCommand>,
    pending: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TokioRestartScheduler {
    pub fn new(commands: mpsc::UnboundedSender<StreamCommand>) -> Self {
        Self {
            commands,
            pending: std::sync::Mutex::new(None),
        }
    }
}

impl RestartScheduler for TokioRestartScheduler {
    fn schedule_restart(&self, delay: Duration, command: StreamCommand) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("no runtime available, restart not scheduled");
            return;
        };
        let commands = self.commands.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if commands.send(command).is_err() {
                debug!("controller gone, scheduled restart dropped");
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = pending.replace(task) {
            previous.abort();
        }
    }

    fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = pending.take() {
            task.abort();
        }
    }
}

/// Whether the UI is on screen and which room it shows.
pub trait ForegroundTracker: Send + Sync {
    fn is_app_visible(&self) -> bool;

    fn open_room_id(&self) -> Option<String>;
}

/// Foreground state set by whoever owns the UI.
#[derive(Debug, Default)]
pub struct SharedForeground {
    visible: AtomicBool,
    open_room: std::sync::Mutex<Option<String>>,
}

impl SharedForeground {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    pub fn set_open_room(&self, room_id: Option<String>) {
        *self.open_room.lock().unwrap_or_else(|e| e.into_inner()) = room_id;
    }
}

impl ForegroundTracker for SharedForeground {
    fn is_app_visible(&self) -> bool {
        self.visible.load(Ordering::SeqCst)
    }

    fn open_room_id(&self) -> Option<String> {
        self.open_room
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Everything the foreground notification depends on.
#[derive(Debug, Clone, Copy)]
pub struct ForegroundInputs {
    pub current: ForegroundNotificationState,
    pub stream_state: StreamState,
    pub initial_sync_complete: bool,
    pub push_enabled: bool,
    pub registration: RegistrationState,
    pub background_sync_allowed: bool,
    pub notifications_allowed: bool,
}

/// Pick the foreground notification. Call states stay until hidden explicitly.
pub fn compute_foreground(inputs: &ForegroundInputs) -> ForegroundNotificationState {
    use ForegroundNotificationState as F;

    if inputs.current.is_call() {
        return inputs.current;
    }
    match inputs.stream_state {
        StreamState::Idle => return F::None,
        StreamState::Stop | StreamState::Catchup => return F::InitialSyncing,
        _ => {}
    }
    if !inputs.initial_sync_complete {
        return F::InitialSyncing;
    }
    let push_available =
        inputs.push_enabled && inputs.registration == RegistrationState::ServerRegistered;
    if !push_available && inputs.background_sync_allowed && inputs.notifications_allowed {
        F::ListeningForEvents
    } else {
        F::None
    }
}

/// Mark the run as crashed whenever a panic unwinds.
pub fn install_crash_marker(database: Database) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        if let Ok(conn) = database.conn() {
            let _ = Settings::set_bool(&conn, keys::LAST_RUN_CRASHED, true);
        }
        previous(info);
    }));
}

#[derive(Debug, Clone)]
struct ActiveCall {
    room_id: String,
    call_id: String,
    sender: String,
}

struct Inner {
    state: StreamState,
    sessions: Vec<MonitoredSession>,
    foreground: ForegroundNotificationState,
    active_call: Option<ActiveCall>,
    /// Set by an explicit stop; suppresses self-restart.
    self_destroying: bool,
}

type Receivers = (
    mpsc::UnboundedReceiver<StreamCommand>,
    mpsc::UnboundedReceiver<SessionEvent>,
);

/// Dependencies of the controller.
pub struct StreamDeps {
    pub database: Database,
    pub config: ConfigHandle,
    pub event_bus: EventBus,
    pub coordinator: PushRegistrationCoordinator,
    pub notifications: NotificationService,
    pub renderer: Arc<dyn NotificationRenderer>,
    pub tracker: Arc<dyn ForegroundTracker>,
    pub factory: Arc<dyn SessionFactory>,
    /// Defaults to a [`TokioRestartScheduler`] on the controller's own queue.
    pub scheduler: Option<Arc<dyn RestartScheduler>>,
}

struct Shared {
    inner: Mutex<Inner>,
    database: Database,
    config: ConfigHandle,
    event_bus: EventBus,
    coordinator: PushRegistrationCoordinator,
    notifications: NotificationService,
    renderer: Arc<dyn NotificationRenderer>,
    tracker: Arc<dyn ForegroundTracker>,
    factory: Arc<dyn SessionFactory>,
    scheduler: Arc<dyn RestartScheduler>,
    cmd_tx: mpsc::UnboundedSender<StreamCommand>,
    event_tx: mpsc::UnboundedSender<SessionEvent>,
    receivers: std::sync::Mutex<Option<Receivers>>,
    actor: std::sync::Mutex<Option<JoinHandle<()>>>,
    state: SharedServiceState,
}

/// Lifecycle of the background event stream service.
#[derive(Clone)]
pub struct EventStreamController {
    shared: Arc<Shared>,
}

impl EventStreamController {
    pub fn new(deps: StreamDeps) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let scheduler = deps
            .scheduler
            .unwrap_or_else(|| Arc::new(TokioRestartScheduler::new(cmd_tx.clone())));

        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: StreamState::Idle,
                    sessions: Vec::new(),
                    foreground: ForegroundNotificationState::None,
                    active_call: None,
                    self_destroying: false,
                }),
                database: deps.database,
                config: deps.config,
                event_bus: deps.event_bus,
                coordinator: deps.coordinator,
                notifications: deps.notifications,
                renderer: deps.renderer,
                tracker: deps.tracker,
                factory: deps.factory,
                scheduler,
                cmd_tx,
                event_tx,
                receivers: std::sync::Mutex::new(Some((cmd_rx, event_rx))),
                actor: std::sync::Mutex::new(None),
                state: SharedServiceState::new(),
            }),
        }
    }

    pub async fn state(&self) -> StreamState {
        self.shared.inner.lock().await.state
    }

    pub async fn foreground_state(&self) -> ForegroundNotificationState {
        self.shared.inner.lock().await.foreground
    }

    pub async fn monitored_user_ids(&self) -> Vec<String> {
        let inner = self.shared.inner.lock().await;
        inner
            .sessions
            .iter()
            .map(|s| s.stream.user_id().to_string())
            .collect()
    }

    /// Queue for [`StreamCommand`]s handled by the actor loop.
    pub fn command_sender(&self) -> mpsc::UnboundedSender<StreamCommand> {
        self.shared.cmd_tx.clone()
    }

    /// Queue session streams deliver their events on.
    pub fn session_event_sender(&self) -> mpsc::UnboundedSender<SessionEvent> {
        self.shared.event_tx.clone()
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// User-triggered start. An empty list reuses the persisted user ids.
    pub async fn start(&self, user_ids: Vec<String>) -> VxResult<()> {
        self.start_sessions(user_ids, true).await
    }

    async fn start_sessions(&self, user_ids: Vec<String>, user_triggered: bool) -> VxResult<()> {
        let mut inner = self.shared.inner.lock().await;
        match inner.state {
            state if state.is_running() => {
                debug!("start while {state}, refreshing network connections");
                for session in &inner.sessions {
                    session.stream.refresh_network_connections();
                }
                return Ok(());
            }
            StreamState::Pause | StreamState::Catchup => {
                drop(inner);
                return self.resume().await;
            }
            _ => {}
        }

        let user_ids = if user_ids.is_empty() {
            self.persisted_user_ids()?
        } else {
            self.persist_user_ids(&user_ids)?;
            user_ids
        };
        if user_ids.is_empty() {
            return Err(VxError::InvalidState("no sessions to monitor".into()));
        }

        let mut sessions = Vec::with_capacity(user_ids.len());
        for user_id in &user_ids {
            let session = self.shared.factory.open(user_id)?;
            session.stream.start(self.shared.event_tx.clone())?;
            self.shared.notifications.add_source(session.source.clone())?;
            sessions.push(session);
        }
        inner.sessions = sessions;
        inner.self_destroying = false;
        self.set_state(&mut inner, StreamState::Start);

        if user_triggered {
            let conn = self.shared.database.conn()?;
            Settings::set_bool(&conn, keys::LAST_RUN_CRASHED, false)?;
        }
        info!("event stream started for {} session(s)", user_ids.len());
        self.update_foreground(&mut inner, false).await;
        Ok(())
    }

    /// Suspend every stream. Only valid while `Start` or `Resume`.
    pub async fn pause(&self) -> VxResult<()> {
        let mut inner = self.shared.inner.lock().await;
        if !matches!(inner.state, StreamState::Start | StreamState::Resume) {
            return Err(VxError::InvalidState(format!(
                "cannot pause while {}",
                inner.state
            )));
        }
        for session in &inner.sessions {
            session.stream.pause();
        }
        self.set_state(&mut inner, StreamState::Pause);
        self.update_foreground(&mut inner, false).await;
        Ok(())
    }

    /// Resume suspended streams. Only valid while `Pause` or `Catchup`.
    pub async fn resume(&self) -> VxResult<()> {
        let mut inner = self.shared.inner.lock().await;
        if !matches!(inner.state, StreamState::Pause | StreamState::Catchup) {
            return Err(VxError::InvalidState(format!(
                "cannot resume while {}",
                inner.state
            )));
        }
        for session in &inner.sessions {
            session.stream.resume();
        }
        self.set_state(&mut inner, StreamState::Resume);
        self.update_foreground(&mut inner, false).await;
        Ok(())
    }

    /// Poll every stream once. Returns whether a poll was triggered.
    ///
    /// With `check_state`, a live stream with the app on screen is left alone.
    pub async fn catchup(&self, check_state: bool) -> VxResult<bool> {
        let mut inner = self.shared.inner.lock().await;
        if check_state {
            let proceed = match inner.state {
                StreamState::Catchup | StreamState::Pause => true,
                StreamState::Start => !self.shared.tracker.is_app_visible(),
                _ => false,
            };
            if !proceed {
                debug!("catchup skipped while {}", inner.state);
                return Ok(false);
            }
        }
        if inner.sessions.is_empty() {
            return Ok(false);
        }
        for session in &inner.sessions {
            session.stream.catchup();
        }
        if inner.state == StreamState::Pause {
            self.set_state(&mut inner, StreamState::Catchup);
        }
        self.update_foreground(&mut inner, false).await;
        Ok(true)
    }

    /// Explicit stop. Disables self-restart until the next start.
    pub async fn stop(&self) -> VxResult<()> {
        let mut inner = self.shared.inner.lock().await;
        inner.self_destroying = true;
        self.shared.scheduler.cancel();
        for session in inner.sessions.drain(..) {
            session.stream.stop();
            if let Err(e) = self
                .shared
                .notifications
                .remove_source(session.stream.user_id())
            {
                warn!("failed to detach notification source: {e}");
            }
        }
        self.set_state(&mut inner, StreamState::Stop);
        inner.active_call = None;
        self.apply_foreground(&mut inner, ForegroundNotificationState::None);
        info!("event stream stopped");
        Ok(())
    }

    /// Cold start the service gave itself. Returns whether it restarted.
    ///
    /// Refused after a crash, when background sync is off, or when no user
    /// ids were persisted.
    pub async fn auto_restart(&self) -> VxResult<bool> {
        {
            let conn = self.shared.database.conn()?;
            if Settings::get_bool_or(&conn, keys::LAST_RUN_CRASHED, false)? {
                warn!("last run crashed, not restarting");
                return Ok(false);
            }
            if !PushPreferences::load(&conn)?.allow_background_sync {
                info!("background sync disallowed, not restarting");
                return Ok(false);
            }
        }
        let user_ids = self.persisted_user_ids()?;
        if user_ids.is_empty() {
            info!("no persisted sessions, not restarting");
            return Ok(false);
        }

        self.start_sessions(user_ids, false).await?;
        let mut inner = self.shared.inner.lock().await;
        if inner.state == StreamState::Start {
            self.set_state(&mut inner, StreamState::AutoRestart);
        }
        Ok(true)
    }

    /// Push or preference status changed; recompute the foreground notification.
    pub async fn on_push_status_update(&self) {
        let mut inner = self.shared.inner.lock().await;
        if inner.state == StreamState::Stop {
            return;
        }
        self.update_foreground(&mut inner, false).await;
    }

    /// The task was removed or the process is about to die unplanned.
    ///
    /// Returns the restart delay, or `None` when the stop was intentional.
    pub async fn on_task_removed(&self) -> Option<Duration> {
        let inner = self.shared.inner.lock().await;
        if inner.self_destroying {
            debug!("self-destroying, no restart");
            return None;
        }
        let user_ids: Vec<String> = inner
            .sessions
            .iter()
            .map(|s| s.stream.user_id().to_string())
            .collect();
        drop(inner);

        let service = self.shared.config.read().await.service.clone();
        let (min, max) = (service.restart_min_delay_ms, service.restart_max_delay_ms);
        let delay_ms = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        let delay = Duration::from_millis(delay_ms);

        let command = StreamCommand {
            action: StreamAction::AutoRestart,
            user_ids,
            auto_restart: true,
        };
        self.shared.scheduler.schedule_restart(delay, command);
        info!("restart scheduled in {delay_ms}ms");
        self.shared
            .event_bus
            .emit(AppEvent::RestartScheduled { delay_ms });
        Some(delay)
    }

    // ─── Calls ───────────────────────────────────────────────────────────

    pub async fn show_incoming_call(&self, room_id: &str, call_id: &str, sender: &str) {
        let mut inner = self.shared.inner.lock().await;
        if let Err(e) = self
            .shared
            .renderer
            .show_call_notification(room_id, call_id, sender, false)
        {
            warn!("failed to show call notification: {e}");
        }
        inner.active_call = Some(ActiveCall {
            room_id: room_id.to_string(),
            call_id: call_id.to_string(),
            sender: sender.to_string(),
        });
        self.apply_foreground(&mut inner, ForegroundNotificationState::IncomingCall);
    }

    /// Switch the ringing call to in-progress.
    pub async fn show_call_in_progress(&self) -> VxResult<()> {
        let mut inner = self.shared.inner.lock().await;
        let Some(call) = inner.active_call.clone() else {
            return Err(VxError::InvalidState("no active call".into()));
        };
        self.shared
            .renderer
            .show_call_notification(&call.room_id, &call.call_id, &call.sender, true)?;
        self.apply_foreground(&mut inner, ForegroundNotificationState::CallInProgress);
        Ok(())
    }

    /// Leave the call state and recompute the regular foreground notification.
    pub async fn hide_call_notification(&self) {
        let mut inner = self.shared.inner.lock().await;
        if let Some(call) = inner.active_call.take() {
            if let Err(e) = self.shared.renderer.hide_call_notification(&call.call_id) {
                warn!("failed to hide call notification: {e}");
            }
        }
        if inner.state == StreamState::Stop {
            self.apply_foreground(&mut inner, ForegroundNotificationState::None);
        } else {
            self.update_foreground(&mut inner, true).await;
        }
    }

    // ─── Actor ───────────────────────────────────────────────────────────

    /// Run one control command.
    pub async fn handle_command(&self, command: StreamCommand) -> VxResult<()> {
        debug!("stream command {}", command.action);
        match command.action {
            StreamAction::Start if command.auto_restart => self.auto_restart().await.map(drop),
            StreamAction::Start => self.start(command.user_ids).await,
            StreamAction::Stop => self.stop().await,
            StreamAction::Pause => self.pause().await,
            StreamAction::Resume => self.resume().await,
            StreamAction::Catchup => self.catchup(true).await.map(drop),
            StreamAction::GcmStatusUpdate => {
                self.on_push_status_update().await;
                Ok(())
            }
            StreamAction::AutoRestart => self.auto_restart().await.map(drop),
        }
    }

    /// Route one session event.
    pub async fn handle_session_event(&self, event: SessionEvent) -> VxResult<()> {
        let notifications = &self.shared.notifications;
        match event {
            SessionEvent::Live { event, .. } => notifications.on_live_event(event),
            SessionEvent::Bing {
                user_id,
                event,
                rule,
            } => notifications.on_bing_event(&user_id, event, rule),
            SessionEvent::InitialSyncComplete { user_id } => {
                info!("initial sync complete for {user_id}");
                self.on_push_status_update().await;
                notifications.refresh()
            }
            SessionEvent::ReadReceipt { .. }
            | SessionEvent::BingRulesUpdated { .. }
            | SessionEvent::ChunkProcessed { .. } => notifications.refresh(),
        }
    }

    async fn handle_app_event(&self, event: AppEvent) {
        match event {
            AppEvent::IncomingCall {
                room_id,
                call_id,
                sender,
            } => self.show_incoming_call(&room_id, &call_id, &sender).await,
            AppEvent::CallEnded { call_id } => {
                let ringing = {
                    let inner = self.shared.inner.lock().await;
                    inner
                        .active_call
                        .as_ref()
                        .is_some_and(|c| c.call_id == call_id)
                };
                if ringing {
                    self.hide_call_notification().await;
                }
            }
            AppEvent::RegistrationStateChanged { .. } => self.on_push_status_update().await,
            _ => {}
        }
    }

    /// Start the actor loop. Only the first call spawns.
    pub fn spawn(&self) -> VxResult<()> {
        let receivers = self
            .shared
            .receivers
            .lock()
            .map_err(|_| VxError::Internal("controller lock poisoned".into()))?
            .take();
        let Some((mut commands, mut events)) = receivers else {
            return Err(VxError::InvalidState("event stream actor already running".into()));
        };
        let mut bus = self.shared.event_bus.subscribe();
        let this = self.clone();

        let actor = tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(command) = commands.recv() => {
                        let action = command.action;
                        if let Err(e) = this.handle_command(command).await {
                            warn!("stream command {action} failed: {e}");
                        }
                    }
                    Some(event) = events.recv() => {
                        if let Err(e) = this.handle_session_event(event).await {
                            warn!("session event not handled: {e}");
                        }
                    }
                    app = bus.recv() => match app {
                        Ok(event) => this.handle_app_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!("event stream actor lagged by {n} event(s)");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    else => break,
                }
            }
            debug!("event stream actor stopped");
        });

        *self
            .shared
            .actor
            .lock()
            .map_err(|_| VxError::Internal("controller lock poisoned".into()))? = Some(actor);
        Ok(())
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn set_state(&self, inner: &mut Inner, state: StreamState) {
        if inner.state == state {
            return;
        }
        debug!("stream state {} -> {state}", inner.state);
        inner.state = state;
        self.shared
            .event_bus
            .emit(AppEvent::StreamStateChanged { state });
    }

    async fn update_foreground(&self, inner: &mut Inner, leaving_call: bool) {
        let push = self.shared.config.push().await;
        let registration = self.shared.coordinator.current_state().await;
        let prefs = self
            .shared
            .database
            .conn()
            .and_then(|conn| PushPreferences::load(&conn))
            .unwrap_or_else(|e| {
                warn!("failed to load preferences: {e}");
                PushPreferences::default()
            });

        let current = if leaving_call {
            ForegroundNotificationState::None
        } else {
            inner.foreground
        };
        let next = compute_foreground(&ForegroundInputs {
            current,
            stream_state: inner.state,
            initial_sync_complete: inner
                .sessions
                .iter()
                .all(|s| s.stream.is_initial_sync_complete()),
            push_enabled: push.enabled,
            registration,
            background_sync_allowed: prefs.allow_background_sync,
            notifications_allowed: prefs.allow_notifications,
        });
        self.apply_foreground(inner, next);
    }

    fn apply_foreground(&self, inner: &mut Inner, next: ForegroundNotificationState) {
        if inner.foreground == next {
            return;
        }
        debug!("foreground notification {} -> {next}", inner.foreground);
        inner.foreground = next;

        // Call states are drawn by the call notification itself.
        let rendered = match next {
            ForegroundNotificationState::None => self.shared.renderer.hide_foreground_notification(),
            state if state.is_call() => Ok(()),
            state => self.shared.renderer.show_foreground_notification(state),
        };
        if let Err(e) = rendered {
            warn!("failed to update foreground notification: {e}");
        }
        self.shared
            .event_bus
            .emit(AppEvent::ForegroundNotificationChanged { state: next });
    }

    fn persisted_user_ids(&self) -> VxResult<Vec<String>> {
        let conn = self.shared.database.conn()?;
        match Settings::get_json::<Vec<String>>(&conn, keys::STREAM_USER_IDS) {
            Ok(ids) => Ok(ids.unwrap_or_default()),
            Err(VxError::Serialization(e)) => {
                warn!("persisted session ids unreadable: {e}");
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    fn persist_user_ids(&self, user_ids: &[String]) -> VxResult<()> {
        let conn = self.shared.database.conn()?;
        Settings::set_json(&conn, keys::STREAM_USER_IDS, &user_ids)
    }
}

impl Service for EventStreamController {
    fn name(&self) -> &str {
        "event_stream"
    }

    fn state(&self) -> ServiceState {
        self.shared.state.get()
    }

    fn init(&mut self) -> VxResult<()> {
        self.shared.state.set(ServiceState::Running);
        info!("event stream controller initialized");
        Ok(())
    }

    fn shutdown(&mut self) -> VxResult<()> {
        self.shared.state.set(ServiceState::ShuttingDown);
        if let Ok(mut actor) = self.shared.actor.lock() {
            if let Some(task) = actor.take() {
                task.abort();
            }
        }
        self.shared.scheduler.cancel();
        match self.shared.inner.try_lock() {
            Ok(mut inner) => {
                inner.self_destroying = true;
                for session in inner.sessions.drain(..) {
                    session.stream.stop();
                }
            }
            Err(_) => error!("event stream busy during shutdown, sessions left running"),
        }
        self.shared.state.set(ServiceState::Stopped);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ForegroundNotificationState as F;

    fn inputs() -> ForegroundInputs {
        ForegroundInputs {
            current: F::None,
            stream_state: StreamState::Start,
            initial_sync_complete: true,
            push_enabled: true,
            registration: RegistrationState::ServerRegistered,
            background_sync_allowed: true,
            notifications_allowed: true,
        }
    }

    #[test]
    fn test_action_parse_and_print() {
        for action in StreamAction::ALL {
            assert_eq!(action.to_string().parse::<StreamAction>().unwrap(), action);
        }
        assert_eq!(
            "gcm-status-update".parse::<StreamAction>().unwrap(),
            StreamAction::GcmStatusUpdate
        );
        assert!("REBOOT".parse::<StreamAction>().is_err());
    }

    #[test]
    fn test_running_states() {
        assert!(StreamState::Start.is_running());
        assert!(StreamState::Resume.is_running());
        assert!(StreamState::AutoRestart.is_running());
        assert!(!StreamState::Pause.is_running());
        assert!(!StreamState::Catchup.is_running());
    }

    #[test]
    fn test_registered_push_needs_no_listening_notification() {
        assert_eq!(compute_foreground(&inputs()), F::None);
    }

    #[test]
    fn test_listening_when_push_unavailable() {
        let mut i = inputs();
        i.registration = RegistrationState::PushRegistered;
        assert_eq!(compute_foreground(&i), F::ListeningForEvents);

        let mut i = inputs();
        i.push_enabled = false;
        assert_eq!(compute_foreground(&i), F::ListeningForEvents);

        i.background_sync_allowed = false;
        assert_eq!(compute_foreground(&i), F::None);

        i.background_sync_allowed = true;
        i.notifications_allowed = false;
        assert_eq!(compute_foreground(&i), F::None);
    }

    #[test]
    fn test_initial_syncing_states() {
        let mut i = inputs();
        i.initial_sync_complete = false;
        assert_eq!(compute_foreground(&i), F::InitialSyncing);

        let mut i = inputs();
        i.stream_state = StreamState::Catchup;
        assert_eq!(compute_foreground(&i), F::InitialSyncing);

        i.stream_state = StreamState::Stop;
        assert_eq!(compute_foreground(&i), F::InitialSyncing);

        i.stream_state = StreamState::Idle;
        assert_eq!(compute_foreground(&i), F::None);
    }

    #[test]
    fn test_call_states_are_sticky() {
        let mut i = inputs();
        i.initial_sync_complete = false;
        i.current = F::IncomingCall;
        assert_eq!(compute_foreground(&i), F::IncomingCall);
        i.current = F::CallInProgress;
        i.stream_state = StreamState::Catchup;
        assert_eq!(compute_foreground(&i), F::CallInProgress);
    }

    #[test]
    fn test_shared_foreground() {
        let fg = SharedForeground::new();
        assert!(!fg.is_app_visible());
        fg.set_visible(true);
        fg.set_open_room(Some("!r".into()));
        assert!(fg.is_app_visible());
        assert_eq!(fg.open_room_id().as_deref(), Some("!r"));
    }

    #[tokio::test]
    async fn test_tokio_scheduler_delivers_command() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioRestartScheduler::new(tx);
        scheduler.schedule_restart(
            Duration::from_millis(10),
            StreamCommand::new(StreamAction::AutoRestart),
        );
        let cmd = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cmd.action, StreamAction::AutoRestart);
    }

    #[tokio::test]
    async fn test_tokio_scheduler_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioRestartScheduler::new(tx);
        scheduler.schedule_restart(
            Duration::from_millis(50),
            StreamCommand::new(StreamAction::AutoRestart),
        );
        scheduler.cancel();
        let got = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(got.is_err());
    }
}
