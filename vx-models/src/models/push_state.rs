//! Persisted push registration record.
//!
//! Only the three stable registration states are ever written. States are
//! stored by tag rather than ordinal, so reordering the enum never changes
//! the meaning of a stored row.

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vx_core::error::{VxError, VxResult};

use super::settings::{keys, Settings};

/// Where the device stands with the push provider and the home server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Unregistered,
    PushRegistering,
    PushRegistered,
    ServerRegistering,
    ServerRegistered,
    ServerUnregistering,
}

impl RegistrationState {
    pub const ALL: [RegistrationState; 6] = [
        Self::Unregistered,
        Self::PushRegistering,
        Self::PushRegistered,
        Self::ServerRegistering,
        Self::ServerRegistered,
        Self::ServerUnregistering,
    ];

    /// Stable persistence tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::PushRegistering => "push_registering",
            Self::PushRegistered => "push_registered",
            Self::ServerRegistering => "server_registering",
            Self::ServerRegistered => "server_registered",
            Self::ServerUnregistering => "server_unregistering",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.tag() == tag)
    }

    /// In-flight states are never persisted.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PushRegistering | Self::ServerRegistering | Self::ServerUnregistering
        )
    }

    /// Whether a provider token must accompany this state.
    pub fn requires_token(&self) -> bool {
        !matches!(self, Self::Unregistered | Self::PushRegistering)
    }
}

impl std::fmt::Display for RegistrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

/// The registration state and provider token as stored in `settings`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedRegistration {
    pub state: RegistrationState,
    pub token: Option<String>,
}

impl Default for PersistedRegistration {
    fn default() -> Self {
        Self {
            state: RegistrationState::Unregistered,
            token: None,
        }
    }
}

impl PersistedRegistration {
    /// Load the stored record.
    ///
    /// A missing record yields `Unregistered`. A transient or unknown tag, or
    /// a registered state without a token, is reported as
    /// [`VxError::CorruptState`].
    pub fn load(conn: &Connection) -> VxResult<Self> {
        let token = Settings::get(conn, keys::PUSH_TOKEN)?.filter(|t| !t.is_empty());
        let Some(tag) = Settings::get(conn, keys::REGISTRATION_STATE)? else {
            return Ok(Self {
                state: RegistrationState::Unregistered,
                token,
            });
        };

        let state = RegistrationState::from_tag(&tag)
            .ok_or_else(|| VxError::CorruptState(format!("unknown registration tag '{tag}'")))?;
        if state.is_transient() {
            return Err(VxError::CorruptState(format!(
                "transient registration state '{tag}' found in storage"
            )));
        }
        if state.requires_token() && token.is_none() {
            return Err(VxError::CorruptState(format!(
                "registration state '{tag}' stored without a push token"
            )));
        }

        debug!("loaded registration state {state}");
        Ok(Self { state, token })
    }

    /// Persist the record. Transient states are rejected.
    ///
    /// Writes two keys; run it inside [`crate::Database::transaction`] to keep
    /// them consistent.
    pub fn save(&self, conn: &Connection) -> VxResult<()> {
        if self.state.is_transient() {
            return Err(VxError::InvalidState(format!(
                "refusing to persist transient state {}",
                self.state
            )));
        }
        Settings::set(conn, keys::REGISTRATION_STATE, self.state.tag())?;
        match &self.token {
            Some(token) => Settings::set(conn, keys::PUSH_TOKEN, token)?,
            None => {
                Settings::delete(conn, keys::PUSH_TOKEN)?;
            }
        }
        Ok(())
    }

    /// Drop the stored record entirely.
    pub fn clear(conn: &Connection) -> VxResult<()> {
        Settings::delete(conn, keys::REGISTRATION_STATE)?;
        Settings::delete(conn, keys::PUSH_TOKEN)?;
        Ok(())
    }
}
