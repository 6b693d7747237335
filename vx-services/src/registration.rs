//! Registration state machine.
//!
//! Tracks whether this device holds a provider push token and whether every
//! session's pusher exists on its home server. Stable states are written
//! through to the settings table on every transition; in-flight states live
//! in memory only.

use tracing::{debug, info, warn};

use vx_core::error::{VxError, VxResult};
use vx_models::models::push_state::{PersistedRegistration, RegistrationState};
use vx_models::Database;

use RegistrationState::*;

/// Legal single-step transitions. Anything else needs [`RegistrationStateMachine::reset`].
const TRANSITIONS: &[(RegistrationState, RegistrationState)] = &[
    (Unregistered, PushRegistering),
    (PushRegistering, PushRegistered),
    (PushRegistering, Unregistered),
    (PushRegistered, ServerRegistering),
    (ServerRegistering, ServerRegistered),
    (ServerRegistering, PushRegistered),
    (ServerRegistered, ServerUnregistering),
    (ServerRegistered, PushRegistered),
    (ServerUnregistering, PushRegistered),
    (ServerUnregistering, ServerRegistered),
];

/// Owner of the registration state and the provider token.
pub struct RegistrationStateMachine {
    database: Database,
    state: RegistrationState,
    token: Option<String>,
}

impl RegistrationStateMachine {
    /// Load the persisted state.
    ///
    /// A corrupt record (transient or unknown tag, token missing) is logged,
    /// wiped, and replaced by `Unregistered` without a token.
    pub fn load(database: Database) -> VxResult<Self> {
        let loaded = PersistedRegistration::load(&*database.conn()?);
        let record = match loaded {
            Ok(record) => record,
            Err(VxError::CorruptState(reason)) => {
                warn!("registration state discarded: {reason}");
                database.transaction(PersistedRegistration::clear)?;
                PersistedRegistration::default()
            }
            Err(e) => return Err(e),
        };

        info!("registration state loaded: {}", record.state);
        Ok(Self {
            database,
            state: record.state,
            token: record.token,
        })
    }

    pub fn current_state(&self) -> RegistrationState {
        self.state
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn can_transition(from: RegistrationState, to: RegistrationState) -> bool {
        from == to || TRANSITIONS.contains(&(from, to))
    }

    /// Move to `target`, returning the previous state.
    ///
    /// Requesting the current state is a no-op. Stable targets are persisted
    /// before the in-memory state changes, so a failed write leaves the
    /// machine where it was.
    pub fn transition(&mut self, target: RegistrationState) -> VxResult<RegistrationState> {
        let from = self.state;
        if from == target {
            return Ok(from);
        }
        if !Self::can_transition(from, target) {
            return Err(VxError::invalid_transition(from, target));
        }
        if target.requires_token() && self.token.is_none() {
            return Err(VxError::InvalidState(format!(
                "cannot enter {target} without a push token"
            )));
        }
        if !target.is_transient() {
            self.persist(target)?;
        }
        self.state = target;
        debug!("registration state {from} -> {target}");
        Ok(from)
    }

    /// Replace the provider token. Written through when the current state is stable.
    pub fn set_token(&mut self, token: Option<String>) -> VxResult<()> {
        let token = token.filter(|t| !t.is_empty());
        if self.state.requires_token() && token.is_none() {
            return Err(VxError::InvalidState(format!(
                "cannot drop the push token while {}",
                self.state
            )));
        }
        let previous = std::mem::replace(&mut self.token, token);
        if !self.state.is_transient() {
            if let Err(e) = self.persist(self.state) {
                self.token = previous;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Recovery path: forget the token and return to `Unregistered` from any state.
    pub fn reset(&mut self) -> VxResult<RegistrationState> {
        let from = self.state;
        self.database.transaction(PersistedRegistration::clear)?;
        self.state = Unregistered;
        self.token = None;
        info!("registration reset from {from}");
        Ok(from)
    }

    /// State and token are written in one transaction.
    fn persist(&self, state: RegistrationState) -> VxResult<()> {
        let record = PersistedRegistration {
            state,
            token: self.token.clone(),
        };
        self.database.transaction(|conn| record.save(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx_models::models::settings::{keys, Settings};

    fn machine() -> (RegistrationStateMachine, Database) {
        let db = Database::in_memory().unwrap();
        (RegistrationStateMachine::load(db.clone()).unwrap(), db)
    }

    fn stored(db: &Database) -> PersistedRegistration {
        PersistedRegistration::load(&db.conn().unwrap()).unwrap()
    }

    #[test]
    fn test_fresh_machine_is_unregistered() {
        let (m, _db) = machine();
        assert_eq!(m.current_state(), Unregistered);
        assert_eq!(m.token(), None);
    }

    #[test]
    fn test_full_registration_path_persists_stable_states() {
        let (mut m, db) = machine();
        m.transition(PushRegistering).unwrap();
        assert_eq!(stored(&db).state, Unregistered);

        m.set_token(Some("tok".into())).unwrap();
        m.transition(PushRegistered).unwrap();
        assert_eq!(stored(&db).state, PushRegistered);

        m.transition(ServerRegistering).unwrap();
        assert_eq!(stored(&db).state, PushRegistered);

        m.transition(ServerRegistered).unwrap();
        let record = stored(&db);
        assert_eq!(record.state, ServerRegistered);
        assert_eq!(record.token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_failed_token_write_leaves_state_untouched() {
        let (mut m, db) = machine();
        db.conn()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_token BEFORE INSERT ON settings
                 WHEN NEW.key = 'push.token'
                 BEGIN SELECT RAISE(ABORT, 'token write rejected'); END;",
            )
            .unwrap();

        m.transition(PushRegistering).unwrap();
        m.set_token(Some("tok".into())).unwrap();
        assert!(m.transition(PushRegistered).is_err());
        assert_eq!(m.current_state(), PushRegistering);

        // Neither half of the record was written.
        let record = stored(&db);
        assert_eq!(record.state, Unregistered);
        assert_eq!(record.token, None);
    }

    #[test]
    fn test_state_skips_rejected() {
        let (mut m, _db) = machine();
        let err = m.transition(ServerRegistered).unwrap_err();
        assert!(matches!(err, VxError::InvalidTransition { .. }));
        assert!(m.transition(ServerRegistering).is_err());
        assert_eq!(m.current_state(), Unregistered);
    }

    #[test]
    fn test_identity_transition_is_noop() {
        let (mut m, _db) = machine();
        assert_eq!(m.transition(Unregistered).unwrap(), Unregistered);
    }

    #[test]
    fn test_push_registered_requires_token() {
        let (mut m, _db) = machine();
        m.transition(PushRegistering).unwrap();
        assert!(matches!(m.transition(PushRegistered), Err(VxError::InvalidState(_))));
        assert_eq!(m.transition(Unregistered).unwrap(), PushRegistering);
    }

    #[test]
    fn test_reload_restores_state() {
        let (mut m, db) = machine();
        m.transition(PushRegistering).unwrap();
        m.set_token(Some("tok".into())).unwrap();
        m.transition(PushRegistered).unwrap();
        drop(m);

        let m = RegistrationStateMachine::load(db).unwrap();
        assert_eq!(m.current_state(), PushRegistered);
        assert_eq!(m.token(), Some("tok"));
    }

    #[test]
    fn test_corrupt_record_falls_back_to_unregistered() {
        let db = Database::in_memory().unwrap();
        {
            let conn = db.conn().unwrap();
            Settings::set(&conn, keys::REGISTRATION_STATE, "server_registering").unwrap();
            Settings::set(&conn, keys::PUSH_TOKEN, "tok").unwrap();
        }
        let m = RegistrationStateMachine::load(db.clone()).unwrap();
        assert_eq!(m.current_state(), Unregistered);
        assert_eq!(m.token(), None);
        assert_eq!(Settings::get(&db.conn().unwrap(), keys::PUSH_TOKEN).unwrap(), None);
    }

    #[test]
    fn test_reset_clears_token() {
        let (mut m, db) = machine();
        m.transition(PushRegistering).unwrap();
        m.set_token(Some("tok".into())).unwrap();
        m.transition(PushRegistered).unwrap();

        assert_eq!(m.reset().unwrap(), PushRegistered);
        assert_eq!(m.current_state(), Unregistered);
        assert_eq!(m.token(), None);
        assert_eq!(stored(&db), PersistedRegistration::default());
    }

    #[test]
    fn test_cannot_drop_token_while_registered() {
        let (mut m, _db) = machine();
        m.transition(PushRegistering).unwrap();
        m.set_token(Some("tok".into())).unwrap();
        m.transition(PushRegistered).unwrap();
        assert!(m.set_token(None).is_err());
        assert_eq!(m.token(), Some("tok"));
    }

    #[test]
    fn test_every_listed_transition_is_legal() {
        for (from, to) in TRANSITIONS {
            assert!(RegistrationStateMachine::can_transition(*from, *to));
        }
        assert!(!RegistrationStateMachine::can_transition(Unregistered, ServerUnregistering));
        assert!(!RegistrationStateMachine::can_transition(PushRegistered, Unregistered));
    }
}
