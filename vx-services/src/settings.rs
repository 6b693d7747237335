//! Settings service for the push preference toggles.
//!
//! Wraps the persisted [`PushPreferences`] with setters that carry the
//! side effects each toggle implies: registering or unregistering pushers,
//! recreating them with new flags, and refreshing the foreground
//! notification.

use tracing::{debug, info, warn};

use vx_core::error::{VxError, VxResult};
use vx_models::models::settings::{keys, Settings};
use vx_models::{Database, PushPreferences};

use crate::event_bus::{AppEvent, EventBus};
use crate::event_stream::EventStreamController;
use crate::push::PushRegistrationCoordinator;
use crate::service::{Service, ServiceState, SharedServiceState};

/// Service for reading and changing push preferences.
#[derive(Clone)]
pub struct SettingsService {
    state: SharedServiceState,
    database: Database,
    event_bus: EventBus,
    coordinator: PushRegistrationCoordinator,
    controller: EventStreamController,
}

impl SettingsService {
    pub fn new(
        database: Database,
        event_bus: EventBus,
        coordinator: PushRegistrationCoordinator,
        controller: EventStreamController,
    ) -> Self {
        Self {
            state: SharedServiceState::new(),
            database,
            event_bus,
            coordinator,
            controller,
        }
    }

    pub fn preferences(&self) -> VxResult<PushPreferences> {
        PushPreferences::load(&*self.database.conn()?)
    }

    // ─── Toggles with side effects ──────────────────────────────────────

    /// Enable or disable device notifications, registering or unregistering pushers.
    pub async fn set_allow_notifications(&self, allow: bool) -> VxResult<()> {
        if !self.write_bool(keys::ALLOW_NOTIFICATIONS, allow)? {
            return Ok(());
        }
        let result = if allow {
            self.coordinator.register().await
        } else if self.coordinator.is_server_registered().await {
            self.coordinator.unregister().await
        } else {
            Ok(())
        };
        self.controller.on_push_status_update().await;
        result
    }

    /// Whether full event content may be sent through the push gateway.
    pub async fn set_allow_content_sending_to_push(&self, allow: bool) -> VxResult<()> {
        if !self.write_bool(keys::CONTENT_SENDING_TO_PUSH, allow)? {
            return Ok(());
        }
        self.recreate_pushers().await?;
        self.controller.on_push_status_update().await;
        Ok(())
    }

    pub async fn set_allow_background_sync(&self, allow: bool) -> VxResult<()> {
        if !self.write_bool(keys::ALLOW_BACKGROUND_SYNC, allow)? {
            return Ok(());
        }
        self.recreate_pushers().await?;
        self.controller.on_push_status_update().await;
        Ok(())
    }

    // ─── Plain toggles ───────────────────────────────────────────────────

    pub async fn set_turn_screen_on(&self, on: bool) -> VxResult<()> {
        self.write_bool(keys::TURN_SCREEN_ON, on)?;
        self.controller.on_push_status_update().await;
        Ok(())
    }

    pub async fn set_auto_start_on_boot(&self, on: bool) -> VxResult<()> {
        self.write_bool(keys::AUTO_START_ON_BOOT, on)?;
        self.controller.on_push_status_update().await;
        Ok(())
    }

    pub async fn set_sync_timeout_ms(&self, ms: i64) -> VxResult<()> {
        self.write_i64(keys::SYNC_TIMEOUT_MS, ms)?;
        self.controller.on_push_status_update().await;
        Ok(())
    }

    pub async fn set_sync_delay_ms(&self, ms: i64) -> VxResult<()> {
        self.write_i64(keys::SYNC_DELAY_MS, ms)?;
        self.controller.on_push_status_update().await;
        Ok(())
    }

    /// Set a preference by key, parsing `value` for its type.
    pub async fn set_by_key(&self, key: &str, value: &str) -> VxResult<()> {
        let flag = || {
            value
                .parse::<bool>()
                .map_err(|_| VxError::Config(format!("{key} expects true or false, got {value}")))
        };
        let number = || {
            value
                .parse::<i64>()
                .map_err(|_| VxError::Config(format!("{key} expects an integer, got {value}")))
        };
        match key {
            keys::ALLOW_NOTIFICATIONS => self.set_allow_notifications(flag()?).await,
            keys::CONTENT_SENDING_TO_PUSH => self.set_allow_content_sending_to_push(flag()?).await,
            keys::ALLOW_BACKGROUND_SYNC => self.set_allow_background_sync(flag()?).await,
            keys::TURN_SCREEN_ON => self.set_turn_screen_on(flag()?).await,
            keys::AUTO_START_ON_BOOT => self.set_auto_start_on_boot(flag()?).await,
            keys::SYNC_TIMEOUT_MS => self.set_sync_timeout_ms(number()?).await,
            keys::SYNC_DELAY_MS => self.set_sync_delay_ms(number()?).await,
            other => Err(VxError::Config(format!("unknown preference: {other}"))),
        }
    }

    // ─── Internals ───────────────────────────────────────────────────────

    /// Pushers carry these flags, so every session's pusher is recreated.
    async fn recreate_pushers(&self) -> VxResult<()> {
        match self.coordinator.force_sessions_registration().await {
            Err(VxError::InvalidState(reason)) => {
                debug!("pushers not recreated: {reason}");
                Ok(())
            }
            other => other,
        }
    }

    /// Write a flag. Returns whether the effective value changed; an unset
    /// flag counts as its default.
    fn write_bool(&self, key: &str, value: bool) -> VxResult<bool> {
        let conn = self.database.conn()?;
        let previous = PushPreferences::load(&conn)?.flag(key);
        Settings::set_bool(&conn, key, value)?;
        drop(conn);
        self.emit(key, value.to_string());
        let changed = previous != Some(value);
        if !changed {
            debug!("{key} already {value}");
        }
        Ok(changed)
    }

    fn write_i64(&self, key: &str, value: i64) -> VxResult<()> {
        let conn = self.database.conn()?;
        Settings::set_i64(&conn, key, value)?;
        drop(conn);
        self.emit(key, value.to_string());
        Ok(())
    }

    fn emit(&self, key: &str, value: String) {
        info!("preference {key} = {value}");
        self.event_bus.emit(AppEvent::PreferenceChanged {
            key: key.to_string(),
            value,
        });
    }
}

impl Service for SettingsService {
    fn name(&self) -> &str {
        "settings"
    }

    fn state(&self) -> ServiceState {
        self.state.get()
    }

    fn init(&mut self) -> VxResult<()> {
        match self.preferences() {
            Ok(prefs) => debug!("preferences loaded: {prefs:?}"),
            Err(e) => warn!("preferences unreadable, defaults apply: {e}"),
        }
        self.state.set(ServiceState::Running);
        info!("settings service initialized");
        Ok(())
    }

    fn shutdown(&mut self) -> VxResult<()> {
        self.state.set(ServiceState::Stopped);
        Ok(())
    }
}
