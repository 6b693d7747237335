//! Service trait and lifecycle management.
//!
//! All services implement the `Service` trait which provides a standard
//! lifecycle (init, shutdown) and health checking interface.

use std::sync::{Arc, RwLock};

use vx_core::error::VxResult;

/// Lifecycle state of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Service has been created but not initialized.
    Created,
    /// Service is initializing.
    Initializing,
    /// Service is running and ready.
    Running,
    /// Service is shutting down.
    ShuttingDown,
    /// Service has been stopped.
    Stopped,
    /// Service encountered a fatal error.
    Failed,
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
            Self::Stopped => write!(f, "stopped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle state shared by every clone of a service handle.
#[derive(Debug, Clone)]
pub struct SharedServiceState(Arc<RwLock<ServiceState>>);

impl SharedServiceState {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(ServiceState::Created)))
    }

    pub fn get(&self) -> ServiceState {
        *self.0.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, state: ServiceState) {
        *self.0.write().unwrap_or_else(|e| e.into_inner()) = state;
    }
}

impl Default for SharedServiceState {
    fn default() -> Self {
        Self::new()
    }
}

/// Trait that all push services implement.
///
/// Services are initialized in dependency order by the ServiceRegistry.
pub trait Service: Send + Sync {
    /// Human-readable name of this service.
    fn name(&self) -> &str;

    /// Current state of this service.
    fn state(&self) -> ServiceState;

    /// Initialize the service. Called once during application startup.
    fn init(&mut self) -> VxResult<()>;

    /// Gracefully shut down the service. Called during application teardown.
    fn shutdown(&mut self) -> VxResult<()>;

    /// Health check. Returns true if the service is operational.
    fn is_healthy(&self) -> bool {
        self.state() == ServiceState::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestService {
        state: SharedServiceState,
    }

    impl Service for TestService {
        fn name(&self) -> &str {
            "test"
        }
        fn state(&self) -> ServiceState {
            self.state.get()
        }
        fn init(&mut self) -> VxResult<()> {
            self.state.set(ServiceState::Running);
            Ok(())
        }
        fn shutdown(&mut self) -> VxResult<()> {
            self.state.set(ServiceState::Stopped);
            Ok(())
        }
    }

    #[test]
    fn test_service_lifecycle() {
        let mut svc = TestService {
            state: SharedServiceState::new(),
        };
        assert!(!svc.is_healthy());
        svc.init().unwrap();
        assert!(svc.is_healthy());
        svc.shutdown().unwrap();
        assert!(!svc.is_healthy());
    }

    #[test]
    fn test_shared_state_visible_to_clones() {
        let a = SharedServiceState::new();
        let b = a.clone();
        a.set(ServiceState::Running);
        assert_eq!(b.get(), ServiceState::Running);
    }
}
