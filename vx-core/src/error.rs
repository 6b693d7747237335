//! Global error types for the Vector push subsystem.
//!
//! All error categories across the workspace are unified into a single
//! `VxError` enum with conversions from underlying library errors. Each
//! variant maps onto an [`ErrorClass`], which is what the registration
//! coordinator uses to decide between surfacing, retrying, or resetting.

use thiserror::Error;

/// Convenience type alias for Results using VxError.
pub type VxResult<T> = Result<T, VxError>;

/// Coarse failure taxonomy used for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// The push provider could not hand out a token. Not retried within the attempt.
    Provider,
    /// Transport-level failure (connect, timeout). Retried after a fixed delay.
    Network,
    /// The home server answered with an error status.
    Server,
    /// The home server does not know the resource. Idempotent deletes treat this as success.
    NotFound,
    /// The operation is not valid from the current state.
    InvalidState,
    /// Local persistence failed.
    Storage,
    /// Anything unclassified.
    Internal,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Provider => "provider",
            Self::Network => "network",
            Self::Server => "server",
            Self::NotFound => "not_found",
            Self::InvalidState => "invalid_state",
            Self::Storage => "storage",
            Self::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// Unified error type covering all error categories.
#[derive(Error, Debug)]
pub enum VxError {
    // -- Configuration errors --
    /// Failed to load or parse application configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A required configuration value is missing.
    #[error("missing configuration: {0}")]
    MissingConfig(String),

    // -- Database errors --
    /// SQLite database error.
    #[error("database error: {0}")]
    Database(String),

    /// Database migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Database connection pool error.
    #[error("connection pool error: {0}")]
    Pool(String),

    /// Database integrity check failed.
    #[error("database integrity check failed: {0}")]
    IntegrityCheck(String),

    /// A persisted value could not be interpreted and was discarded.
    #[error("corrupt persisted state: {0}")]
    CorruptState(String),

    // -- Network errors --
    /// HTTP request failed before a response was received.
    #[error("http error: {0}")]
    Http(String),

    /// HTTP request timed out.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Home server returned an error response.
    #[error("server error (status {status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Matrix `errcode`, when the body carried one.
        errcode: Option<String>,
        /// Error message from the server.
        message: String,
    },

    /// The requested resource does not exist on the home server.
    #[error("not found: {0}")]
    NotFound(String),

    /// Access token rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    // -- Push registration errors --
    /// The platform push provider failed to issue a token.
    #[error("push provider error: {0}")]
    PushProvider(String),

    /// A registration state transition that the state machine forbids.
    #[error("invalid registration transition: {from} -> {to}")]
    InvalidTransition {
        /// State the machine was in.
        from: String,
        /// Requested target state.
        to: String,
    },

    /// An operation was invoked from an incompatible state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Outcome of a shared registration/unregistration run, delivered to
    /// every coalesced caller.
    #[error("registration failed ({class}): {message}")]
    Registration {
        /// Failure class of the underlying error.
        class: ErrorClass,
        /// Rendered underlying error.
        message: String,
    },

    // -- File/IO errors --
    /// File system operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    // -- Service errors --
    /// A service failed to initialize.
    #[error("service init error: {0}")]
    ServiceInit(String),

    /// A service operation failed.
    #[error("service error: {0}")]
    Service(String),

    // -- Notification errors --
    /// Rendering or displaying a notification failed.
    #[error("notification error: {0}")]
    Notification(String),

    // -- Generic --
    /// An unexpected internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Wrapping anyhow errors for interop.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VxError {
    /// Classify this error for retry and reporting decisions.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::PushProvider(_) => ErrorClass::Provider,
            Self::Http(_) | Self::Timeout(_) => ErrorClass::Network,
            Self::ServerError { .. } | Self::AuthFailed(_) => ErrorClass::Server,
            Self::NotFound(_) => ErrorClass::NotFound,
            Self::InvalidTransition { .. } | Self::InvalidState(_) => ErrorClass::InvalidState,
            Self::Database(_)
            | Self::Migration(_)
            | Self::Pool(_)
            | Self::IntegrityCheck(_)
            | Self::CorruptState(_)
            | Self::Io(_) => ErrorClass::Storage,
            Self::Registration { class, .. } => *class,
            Self::Config(_)
            | Self::MissingConfig(_)
            | Self::Serialization(_)
            | Self::ServiceInit(_)
            | Self::Service(_)
            | Self::Notification(_)
            | Self::Internal(_)
            | Self::Other(_) => ErrorClass::Internal,
        }
    }

    /// Whether this is a 5xx-or-unknown failure, which calls for a full
    /// token reset before the delayed retry.
    pub fn is_server_failure(&self) -> bool {
        match self {
            Self::ServerError { status, .. } => *status >= 500,
            Self::Registration { class, .. } => *class == ErrorClass::Internal,
            other => other.class() == ErrorClass::Internal,
        }
    }

    /// Whether this is a transport failure worth retrying as-is.
    pub fn is_network_failure(&self) -> bool {
        self.class() == ErrorClass::Network
    }

    /// Build an invalid-transition error from any displayable states.
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

impl From<serde_json::Error> for VxError {
    fn from(e: serde_json::Error) -> Self {
        VxError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for VxError {
    fn from(e: toml::de::Error) -> Self {
        VxError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vx_error_display() {
        let err = VxError::Config("bad value".to_string());
        assert_eq!(err.to_string(), "configuration error: bad value");
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(VxError::PushProvider("no token".into()).class(), ErrorClass::Provider);
        assert_eq!(VxError::Timeout("slow".into()).class(), ErrorClass::Network);
        assert_eq!(VxError::NotFound("pusher".into()).class(), ErrorClass::NotFound);
        assert_eq!(
            VxError::invalid_transition("unregistered", "server_registered").class(),
            ErrorClass::InvalidState
        );
        let server = VxError::ServerError {
            status: 403,
            errcode: Some("M_FORBIDDEN".into()),
            message: "nope".into(),
        };
        assert_eq!(server.class(), ErrorClass::Server);
    }

    #[test]
    fn test_server_failure_detection() {
        let five = VxError::ServerError {
            status: 502,
            errcode: None,
            message: "bad gateway".into(),
        };
        assert!(five.is_server_failure());

        let four = VxError::ServerError {
            status: 400,
            errcode: Some("M_BAD_JSON".into()),
            message: "bad".into(),
        };
        assert!(!four.is_server_failure());

        assert!(VxError::Internal("boom".into()).is_server_failure());
        assert!(!VxError::Http("connection refused".into()).is_server_failure());
        assert!(VxError::Http("connection refused".into()).is_network_failure());
    }

    #[test]
    fn test_invalid_transition_display() {
        let err = VxError::invalid_transition("push_registered", "server_unregistering");
        assert_eq!(
            err.to_string(),
            "invalid registration transition: push_registered -> server_unregistering"
        );
    }
}
