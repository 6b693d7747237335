//! Push registration coordinator.
//!
//! Drives [`RegistrationStateMachine`] and performs the pusher calls for
//! every session. At most one registration run and one unregistration run
//! are in flight; callers arriving while a run is active wait on the same
//! outcome. Sessions are processed one after another so a failure on
//! session N is never hidden by a success on session N+1.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vx_api::{push_tag, HttpPusher, Pusher, PusherApi};
use vx_core::config::{ConfigHandle, PushConfig};
use vx_core::error::{ErrorClass, VxError, VxResult};
use vx_models::models::push_state::RegistrationState;
use vx_models::models::settings::{keys, Settings};
use vx_models::{Database, PushPreferences};

use crate::event_bus::{AppEvent, EventBus};
use crate::registration::RegistrationStateMachine;
use crate::service::{Service, ServiceState, SharedServiceState};

use RegistrationState::*;

/// Platform push provider issuing the device token.
#[async_trait]
pub trait PushProvider: Send + Sync {
    async fn registration_token(&self) -> VxResult<String>;
    async fn clear_registration_token(&self) -> VxResult<()>;
}

/// Provider whose token is handed in from outside, e.g. on the command line.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    token: std::sync::Mutex<Option<String>>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: std::sync::Mutex::new(token),
        }
    }
}

#[async_trait]
impl PushProvider for StaticTokenProvider {
    async fn registration_token(&self) -> VxResult<String> {
        self.token
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| VxError::PushProvider("no push token available".into()))
    }

    async fn clear_registration_token(&self) -> VxResult<()> {
        *self.token.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }
}

/// Outcome shared by every caller coalesced onto one run.
#[derive(Debug, Clone)]
struct Failure {
    class: ErrorClass,
    message: String,
}

impl Failure {
    fn from_error(e: &VxError) -> Self {
        Self {
            class: e.class(),
            message: e.to_string(),
        }
    }

    fn into_error(self) -> VxError {
        VxError::Registration {
            class: self.class,
            message: self.message,
        }
    }
}

type Outcome = Result<(), Failure>;
type Waiters = Vec<oneshot::Sender<Outcome>>;

struct Inner {
    machine: RegistrationStateMachine,
    sessions: Vec<Arc<dyn PusherApi>>,
    register_waiters: Waiters,
    unregister_waiters: Waiters,
    reregister_after_unregister: bool,
    /// Token to adopt once the pushers keyed by the old one are gone.
    pending_token: Option<String>,
    /// Last listing per user id, filtered to our app id.
    pushers: HashMap<String, Vec<Pusher>>,
    retry_task: Option<JoinHandle<()>>,
}

struct Shared {
    database: Database,
    config: ConfigHandle,
    provider: Arc<dyn PushProvider>,
    event_bus: EventBus,
    inner: Mutex<Inner>,
    state: SharedServiceState,
}

/// Registers and unregisters this device's pushers for every session.
#[derive(Clone)]
pub struct PushRegistrationCoordinator {
    shared: Arc<Shared>,
}

impl PushRegistrationCoordinator {
    pub fn new(
        database: Database,
        config: ConfigHandle,
        provider: Arc<dyn PushProvider>,
        event_bus: EventBus,
    ) -> VxResult<Self> {
        let machine = RegistrationStateMachine::load(database.clone())?;
        Ok(Self {
            shared: Arc::new(Shared {
                database,
                config,
                provider,
                event_bus,
                inner: Mutex::new(Inner {
                    machine,
                    sessions: Vec::new(),
                    register_waiters: Vec::new(),
                    unregister_waiters: Vec::new(),
                    reregister_after_unregister: true,
                    pending_token: None,
                    pushers: HashMap::new(),
                    retry_task: None,
                }),
                state: SharedServiceState::new(),
            }),
        })
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub async fn current_state(&self) -> RegistrationState {
        self.shared.inner.lock().await.machine.current_state()
    }

    pub async fn token(&self) -> Option<String> {
        self.shared.inner.lock().await.machine.token().map(String::from)
    }

    pub async fn is_server_registered(&self) -> bool {
        self.current_state().await == ServerRegistered
    }

    pub async fn session_user_ids(&self) -> Vec<String> {
        let inner = self.shared.inner.lock().await;
        inner.sessions.iter().map(|s| s.user_id().to_string()).collect()
    }

    /// Whether the last pusher listing for `user_id` contains our token.
    pub async fn is_pusher_registered(&self, user_id: &str) -> bool {
        let inner = self.shared.inner.lock().await;
        let Some(token) = inner.machine.token() else {
            return false;
        };
        inner
            .pushers
            .get(user_id)
            .is_some_and(|list| list.iter().any(|p| p.pushkey == token))
    }

    fn preferences(&self) -> VxResult<PushPreferences> {
        PushPreferences::load(&*self.shared.database.conn()?)
    }

    // ─── Registration ────────────────────────────────────────────────────

    /// Register the device with the push provider and every home server.
    ///
    /// Resolves when the run this caller joined has settled.
    pub async fn register(&self) -> VxResult<()> {
        if !self.shared.config.push().await.enabled {
            return Err(VxError::PushProvider("push provider is disabled".into()));
        }

        let rx = {
            let mut inner = self.shared.inner.lock().await;
            match inner.machine.current_state() {
                ServerRegistered => {
                    drop(inner);
                    debug!("already registered on the home servers");
                    self.disable_auto_start()?;
                    return Ok(());
                }
                ServerUnregistering => {
                    return Err(VxError::InvalidState(
                        "cannot register while unregistration is in progress".into(),
                    ));
                }
                PushRegistering | ServerRegistering => Self::enqueue(&mut inner.register_waiters),
                Unregistered => {
                    self.transition(&mut inner, PushRegistering)?;
                    let rx = Self::enqueue(&mut inner.register_waiters);
                    tokio::spawn(self.clone().drive_register());
                    rx
                }
                PushRegistered => {
                    if !self.preferences()?.allow_notifications {
                        debug!("notifications disabled, pushers not registered");
                        return Ok(());
                    }
                    self.transition(&mut inner, ServerRegistering)?;
                    let rx = Self::enqueue(&mut inner.register_waiters);
                    tokio::spawn(self.clone().drive_register());
                    rx
                }
            }
        };
        Self::await_outcome(rx).await
    }

    async fn drive_register(self) {
        match self.provider_phase().await {
            Ok(true) => self.server_phase().await,
            Ok(false) => {}
            Err(e) => {
                warn!("push provider registration failed: {e}");
                let mut inner = self.shared.inner.lock().await;
                if inner.machine.current_state() == PushRegistering {
                    if let Err(clear_err) = inner.machine.set_token(None) {
                        error!("failed to drop push token: {clear_err}");
                    }
                    if let Err(t) = self.transition(&mut inner, Unregistered) {
                        error!("failed to roll back registration: {t}");
                    }
                }
                self.fail(&mut inner.register_waiters, &e);
            }
        }
    }

    /// Acquire a provider token when needed. Returns whether the server phase follows.
    async fn provider_phase(&self) -> VxResult<bool> {
        if self.current_state().await != PushRegistering {
            return Ok(true);
        }
        let token = self.shared.provider.registration_token().await?;

        let mut inner = self.shared.inner.lock().await;
        inner.machine.set_token(Some(token))?;
        self.transition(&mut inner, PushRegistered)?;
        info!("push provider token acquired");

        if !self.preferences()?.allow_notifications {
            info!("notifications disabled, stopping at push registration");
            Self::settle(&mut inner.register_waiters, Ok(()));
            return Ok(false);
        }
        self.transition(&mut inner, ServerRegistering)?;
        Ok(true)
    }

    async fn server_phase(&self) {
        let (sessions, token) = {
            let inner = self.shared.inner.lock().await;
            (inner.sessions.clone(), inner.machine.token().map(String::from))
        };
        let push = self.shared.config.push().await;

        let result = match (token, self.preferences()) {
            (Some(token), Ok(prefs)) => {
                register_sessions(&sessions, &push, &token, prefs.event_id_only()).await
            }
            (None, _) => Err(VxError::InvalidState("no push token to register".into())),
            (_, Err(e)) => Err(e),
        };

        let mut inner = self.shared.inner.lock().await;
        match result.and_then(|()| self.transition(&mut inner, ServerRegistered)) {
            Ok(()) => {
                info!("pushers registered for {} session(s)", sessions.len());
                if let Err(e) = self.disable_auto_start() {
                    warn!("failed to disable auto start: {e}");
                }
                self.shared.event_bus.emit(AppEvent::PushersRegistered {
                    session_count: sessions.len(),
                });
                Self::settle(&mut inner.register_waiters, Ok(()));
                drop(inner);

                // Notifications may have been turned off while the run was in flight.
                let allowed = self
                    .preferences()
                    .map(|p| p.allow_notifications)
                    .unwrap_or(true);
                if !allowed {
                    info!("notifications disabled during registration, removing pushers");
                    self.spawn_unregister();
                }
            }
            Err(e) => {
                warn!("pusher registration failed: {e}");
                if let Err(t) = self.transition(&mut inner, PushRegistered) {
                    error!("failed to roll back registration: {t}");
                }
                self.fail(&mut inner.register_waiters, &e);
                if e.is_network_failure() {
                    self.schedule_retry(&mut inner, push.retry_delay(), false);
                } else if e.is_server_failure() {
                    self.schedule_retry(&mut inner, push.retry_delay(), true);
                }
            }
        }
    }

    // ─── Unregistration ──────────────────────────────────────────────────

    /// Remove every session's pusher. Only valid while server-registered.
    ///
    /// Re-registers straight away when notifications are still allowed.
    pub async fn unregister(&self) -> VxResult<()> {
        self.unregister_with(true).await
    }

    async fn unregister_with(&self, reregister: bool) -> VxResult<()> {
        let rx = {
            let mut inner = self.shared.inner.lock().await;
            match inner.machine.current_state() {
                ServerRegistered => {
                    self.transition(&mut inner, ServerUnregistering)?;
                    inner.reregister_after_unregister = reregister;
                    let rx = Self::enqueue(&mut inner.unregister_waiters);
                    tokio::spawn(self.clone().drive_unregister());
                    rx
                }
                ServerUnregistering => {
                    if !reregister {
                        inner.reregister_after_unregister = false;
                    }
                    Self::enqueue(&mut inner.unregister_waiters)
                }
                other => {
                    return Err(VxError::InvalidState(format!(
                        "cannot unregister while {other}"
                    )));
                }
            }
        };
        Self::await_outcome(rx).await
    }

    async fn drive_unregister(self) {
        let (sessions, token) = {
            let inner = self.shared.inner.lock().await;
            (inner.sessions.clone(), inner.machine.token().map(String::from))
        };
        let push = self.shared.config.push().await;

        let result = match token {
            Some(token) => unregister_sessions(&sessions, &push, &token).await,
            None => Err(VxError::InvalidState("no push token to unregister".into())),
        };

        let mut inner = self.shared.inner.lock().await;
        if let Err(e) = result {
            warn!("pusher removal failed: {e}");
            inner.pending_token = None;
            if let Err(t) = self.transition(&mut inner, ServerRegistered) {
                error!("failed to roll back unregistration: {t}");
            }
            self.fail(&mut inner.unregister_waiters, &e);
            return;
        }

        if let Err(e) = self.transition(&mut inner, PushRegistered) {
            self.fail(&mut inner.unregister_waiters, &e);
            return;
        }
        inner.pushers.clear();
        if let Some(token) = inner.pending_token.take() {
            if let Err(e) = inner.machine.set_token(Some(token)) {
                error!("failed to store refreshed push token: {e}");
            }
        }
        info!("pushers removed for {} session(s)", sessions.len());
        self.shared.event_bus.emit(AppEvent::PushersUnregistered {
            session_count: sessions.len(),
        });
        Self::settle(&mut inner.unregister_waiters, Ok(()));

        let reregister = std::mem::replace(&mut inner.reregister_after_unregister, true);
        drop(inner);

        let wanted = push.enabled
            && self
                .preferences()
                .map(|p| p.allow_notifications)
                .unwrap_or(false);
        if reregister && wanted {
            info!("notifications still enabled, registering again");
            self.spawn_register();
        }
    }

    // ─── Recovery and maintenance ────────────────────────────────────────

    /// Recreate every pusher, e.g. after a preference that shapes them changed.
    pub async fn force_sessions_registration(&self) -> VxResult<()> {
        {
            let mut inner = self.shared.inner.lock().await;
            match inner.machine.current_state() {
                ServerRegistered => self.transition(&mut inner, PushRegistered)?,
                PushRegistered => {}
                other => {
                    return Err(VxError::InvalidState(format!(
                        "cannot force registration while {other}"
                    )));
                }
            }
        }
        self.register().await
    }

    /// Forget everything: remove pushers, drop the provider token, go back to `Unregistered`.
    pub async fn reset_registration(&self) -> VxResult<()> {
        let state = self.current_state().await;
        if state.is_transient() {
            return Err(VxError::InvalidState(format!("cannot reset while {state}")));
        }
        if state == ServerRegistered {
            if let Err(e) = self.unregister_with(false).await {
                warn!("pusher removal failed during reset: {e}");
            }
        }
        if let Err(e) = self.shared.provider.clear_registration_token().await {
            warn!("failed to clear provider token: {e}");
        }

        let mut inner = self.shared.inner.lock().await;
        let from = inner.machine.reset()?;
        inner.pushers.clear();
        inner.pending_token = None;
        if from != Unregistered {
            self.shared.event_bus.emit(AppEvent::RegistrationStateChanged {
                from,
                to: Unregistered,
            });
        }
        Ok(())
    }

    /// The provider rotated its token.
    ///
    /// Pushers keyed by the old token are removed before the new token is
    /// adopted and registered.
    pub async fn on_token_refreshed(&self, token: String) -> VxResult<()> {
        let state = {
            let mut inner = self.shared.inner.lock().await;
            if inner.machine.token() == Some(token.as_str()) {
                debug!("push token unchanged");
                return Ok(());
            }
            let state = inner.machine.current_state();
            match state {
                Unregistered | PushRegistered => {
                    inner.machine.set_token(Some(token))?;
                    info!("push token refreshed");
                    return Ok(());
                }
                ServerRegistered => {
                    inner.pending_token = Some(token);
                    state
                }
                other => {
                    return Err(VxError::InvalidState(format!(
                        "cannot refresh the token while {other}"
                    )));
                }
            }
        };
        debug!("token refreshed while {state}, replacing pushers");
        self.unregister_with(true).await
    }

    /// Connectivity came back; retry registration if it is wanted and missing.
    pub async fn on_network_connected(&self) -> VxResult<bool> {
        if !self.shared.config.push().await.enabled {
            return Ok(false);
        }
        let state = self.current_state().await;
        if !matches!(state, Unregistered | PushRegistered) || !self.preferences()?.allow_notifications {
            return Ok(false);
        }
        info!("network connected while {state}, registering");
        self.register().await?;
        Ok(true)
    }

    // ─── Sessions ────────────────────────────────────────────────────────

    /// Track a session. Pushers are recreated when already server-registered.
    pub async fn add_session(&self, session: Arc<dyn PusherApi>) -> VxResult<()> {
        let state = {
            let mut inner = self.shared.inner.lock().await;
            let user_id = session.user_id().to_string();
            match inner.sessions.iter().position(|s| s.user_id() == user_id) {
                Some(i) => inner.sessions[i] = session,
                None => inner.sessions.push(session),
            }
            debug!("session {user_id} added ({} total)", inner.sessions.len());
            inner.machine.current_state()
        };
        if state == ServerRegistered {
            self.force_sessions_registration().await?;
        }
        Ok(())
    }

    /// Stop tracking a session, removing its pusher when registered.
    pub async fn remove_session(&self, user_id: &str) -> VxResult<bool> {
        let (removed, token, state) = {
            let mut inner = self.shared.inner.lock().await;
            let removed = inner
                .sessions
                .iter()
                .position(|s| s.user_id() == user_id)
                .map(|i| inner.sessions.remove(i));
            inner.pushers.remove(user_id);
            (
                removed,
                inner.machine.token().map(String::from),
                inner.machine.current_state(),
            )
        };
        let Some(session) = removed else {
            return Ok(false);
        };

        if let (ServerRegistered, Some(token)) = (state, token) {
            let push = self.shared.config.push().await;
            let pusher = build_pusher(&push, &token, user_id, false, false);
            match session.remove_http_pusher(&pusher).await {
                Ok(()) => info!("pusher removed for departed session {user_id}"),
                Err(VxError::NotFound(_)) => debug!("no pusher left for {user_id}"),
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }

    /// List every session's pushers from the home servers.
    pub async fn refresh_pushers_list(&self) -> VxResult<HashMap<String, Vec<Pusher>>> {
        let sessions = self.shared.inner.lock().await.sessions.clone();
        let app_id = self.shared.config.push().await.app_id;

        let mut listing = HashMap::new();
        for session in &sessions {
            let pushers: Vec<Pusher> = session
                .get_pushers()
                .await?
                .into_iter()
                .filter(|p| p.app_id == app_id)
                .collect();
            listing.insert(session.user_id().to_string(), pushers);
        }

        self.shared.inner.lock().await.pushers = listing.clone();
        Ok(listing)
    }

    // ─── Internals ───────────────────────────────────────────────────────

    fn transition(&self, inner: &mut Inner, target: RegistrationState) -> VxResult<()> {
        let from = inner.machine.transition(target)?;
        if from != target {
            self.shared
                .event_bus
                .emit(AppEvent::RegistrationStateChanged { from, to: target });
        }
        Ok(())
    }

    fn disable_auto_start(&self) -> VxResult<()> {
        let conn = self.shared.database.conn()?;
        Settings::set_bool(&conn, keys::AUTO_START_ON_BOOT, false)
    }

    fn enqueue(waiters: &mut Waiters) -> oneshot::Receiver<Outcome> {
        let (tx, rx) = oneshot::channel();
        waiters.push(tx);
        rx
    }

    fn settle(waiters: &mut Waiters, outcome: Outcome) {
        for waiter in waiters.drain(..) {
            let _ = waiter.send(outcome.clone());
        }
    }

    fn fail(&self, waiters: &mut Waiters, e: &VxError) {
        let failure = Failure::from_error(e);
        self.shared.event_bus.emit(AppEvent::RegistrationFailed {
            class: failure.class,
            message: failure.message.clone(),
        });
        Self::settle(waiters, Err(failure));
    }

    async fn await_outcome(rx: oneshot::Receiver<Outcome>) -> VxResult<()> {
        match rx.await {
            Ok(outcome) => outcome.map_err(Failure::into_error),
            Err(_) => Err(VxError::Internal(
                "registration run ended without an outcome".into(),
            )),
        }
    }

    fn spawn_register(&self) {
        let this = self.clone();
        let run: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            if let Err(e) = this.register().await {
                warn!("background registration failed: {e}");
            }
        });
        tokio::spawn(run);
    }

    fn spawn_unregister(&self) {
        let this = self.clone();
        let run: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            if let Err(e) = this.unregister_with(false).await {
                warn!("background unregistration failed: {e}");
            }
        });
        tokio::spawn(run);
    }

    /// Retry after `delay`; with `reset`, start over from a fresh provider token.
    fn schedule_retry(&self, inner: &mut Inner, delay: std::time::Duration, reset: bool) {
        if inner.retry_task.as_ref().is_some_and(|t| !t.is_finished()) {
            debug!("registration retry already scheduled");
            return;
        }
        let this = self.clone();
        let run: Pin<Box<dyn Future<Output = ()> + Send>> = Box::pin(async move {
            tokio::time::sleep(delay).await;
            this.shared.inner.lock().await.retry_task = None;
            if reset {
                if let Err(e) = this.reset_registration().await {
                    warn!("registration reset before retry failed: {e}");
                }
            }
            if let Err(e) = this.register().await {
                warn!("registration retry failed: {e}");
            }
        });
        let delay_ms = delay.as_millis() as u64;
        info!("registration retry in {delay_ms}ms (reset={reset})");
        inner.retry_task = Some(tokio::spawn(run));
        self.shared
            .event_bus
            .emit(AppEvent::RegistrationRetryScheduled { delay_ms, reset });
    }
}

impl Service for PushRegistrationCoordinator {
    fn name(&self) -> &str {
        "push_registration"
    }

    fn state(&self) -> ServiceState {
        self.shared.state.get()
    }

    fn init(&mut self) -> VxResult<()> {
        self.shared.state.set(ServiceState::Running);
        info!("push registration coordinator initialized");
        Ok(())
    }

    fn shutdown(&mut self) -> VxResult<()> {
        self.shared.state.set(ServiceState::ShuttingDown);
        if let Ok(mut inner) = self.shared.inner.try_lock() {
            if let Some(task) = inner.retry_task.take() {
                task.abort();
            }
        }
        self.shared.state.set(ServiceState::Stopped);
        Ok(())
    }
}

/// The pusher this device registers for one session.
pub fn build_pusher(
    push: &PushConfig,
    token: &str,
    user_id: &str,
    append: bool,
    event_id_only: bool,
) -> HttpPusher {
    HttpPusher {
        pushkey: token.to_string(),
        app_id: push.app_id.clone(),
        profile_tag: push_tag(user_id),
        lang: push.lang.clone(),
        app_display_name: push.app_display_name.clone(),
        device_display_name: push.effective_device_name(),
        url: push.pusher_url.clone(),
        append,
        event_id_only,
    }
}

/// Add a pusher per session in order, stopping at the first failure.
async fn register_sessions(
    sessions: &[Arc<dyn PusherApi>],
    push: &PushConfig,
    token: &str,
    event_id_only: bool,
) -> VxResult<()> {
    for (index, session) in sessions.iter().enumerate() {
        let pusher = build_pusher(push, token, session.user_id(), index > 0, event_id_only);
        session.add_http_pusher(&pusher).await.map_err(|e| {
            warn!("add pusher failed for {} (session {index}): {e}", session.user_id());
            e
        })?;
        debug!("pusher added for {}", session.user_id());
    }
    Ok(())
}

/// Remove the pusher of every session in order. Missing pushers count as removed.
async fn unregister_sessions(
    sessions: &[Arc<dyn PusherApi>],
    push: &PushConfig,
    token: &str,
) -> VxResult<()> {
    for (index, session) in sessions.iter().enumerate() {
        let pusher = build_pusher(push, token, session.user_id(), index > 0, false);
        match session.remove_http_pusher(&pusher).await {
            Ok(()) => debug!("pusher removed for {}", session.user_id()),
            Err(VxError::NotFound(_)) => debug!("pusher already gone for {}", session.user_id()),
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
