//! Service registry for dependency injection and lifecycle management.
//!
//! The registry builds every push service from the core infrastructure and
//! the platform collaborators, initializes them in dependency order, and
//! shuts them down in reverse.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

use vx_api::{ApiClient, PusherApi};
use vx_core::config::ConfigHandle;
use vx_core::error::{VxError, VxResult};
use vx_models::{Database, StoredSession};

use crate::event_bus::EventBus;
use crate::event_stream::{
    EventStreamController, ForegroundTracker, RestartScheduler, SessionFactory, StreamDeps,
};
use crate::notification::NotificationService;
use crate::push::{PushProvider, PushRegistrationCoordinator};
use crate::renderer::NotificationRenderer;
use crate::service::{Service, ServiceState};
use crate::settings::SettingsService;

/// Platform pieces the services are built on.
pub struct Collaborators {
    pub provider: Arc<dyn PushProvider>,
    pub session_factory: Arc<dyn SessionFactory>,
    pub renderer: Arc<dyn NotificationRenderer>,
    pub foreground: Arc<dyn ForegroundTracker>,
    pub restart_scheduler: Option<Arc<dyn RestartScheduler>>,
}

/// Central registry that owns every push service.
///
/// Services are explicitly constructed here and handed out as cheap clones;
/// there are no process-wide singletons.
pub struct ServiceRegistry {
    /// Application configuration.
    pub config: ConfigHandle,
    /// Database connection pool.
    pub database: Database,
    /// Application-level event bus.
    pub event_bus: EventBus,
    coordinator: PushRegistrationCoordinator,
    notifications: NotificationService,
    controller: EventStreamController,
    settings: SettingsService,
    /// Registered services in initialization order.
    services: Vec<(String, Arc<RwLock<Box<dyn Service>>>)>,
}

impl ServiceRegistry {
    /// Build and register all services.
    ///
    /// Initialization order:
    /// 1. Notification (database, renderer, event_bus)
    /// 2. PushRegistration (database, config, provider, event_bus)
    /// 3. EventStream (everything above)
    /// 4. Settings (push registration, event stream)
    pub async fn new(
        config: ConfigHandle,
        database: Database,
        collaborators: Collaborators,
    ) -> VxResult<Self> {
        let capacity = config.read().await.service.event_bus_capacity;
        let event_bus = EventBus::new(capacity);

        let notifications = NotificationService::new(
            database.clone(),
            collaborators.renderer.clone(),
            event_bus.clone(),
            collaborators.foreground.clone(),
        );
        let coordinator = PushRegistrationCoordinator::new(
            database.clone(),
            config.clone(),
            collaborators.provider,
            event_bus.clone(),
        )?;
        let controller = EventStreamController::new(StreamDeps {
            database: database.clone(),
            config: config.clone(),
            event_bus: event_bus.clone(),
            coordinator: coordinator.clone(),
            notifications: notifications.clone(),
            renderer: collaborators.renderer,
            tracker: collaborators.foreground,
            factory: collaborators.session_factory,
            scheduler: collaborators.restart_scheduler,
        });
        let settings = SettingsService::new(
            database.clone(),
            event_bus.clone(),
            coordinator.clone(),
            controller.clone(),
        );

        let mut registry = Self {
            config,
            database,
            event_bus,
            coordinator: coordinator.clone(),
            notifications: notifications.clone(),
            controller: controller.clone(),
            settings: settings.clone(),
            services: Vec::new(),
        };
        registry.register(notifications);
        registry.register(coordinator);
        registry.register(controller);
        registry.register(settings);
        info!("registered {} services", registry.services.len());
        Ok(registry)
    }

    /// Register a service. Services are initialized in registration order.
    pub fn register<S: Service + 'static>(&mut self, service: S) {
        let name = service.name().to_string();
        info!("registered service: {name}");
        self.services
            .push((name, Arc::new(RwLock::new(Box::new(service)))));
    }

    /// Initialize all registered services in order.
    pub async fn init_all(&self) -> VxResult<()> {
        info!("initializing {} services", self.services.len());

        for (name, service) in &self.services {
            info!("initializing service: {name}");
            let mut svc = service.write().await;
            if let Err(e) = svc.init() {
                error!("failed to initialize service {name}: {e}");
                return Err(VxError::ServiceInit(format!("{name}: {e}")));
            }
        }

        info!("all services initialized");
        Ok(())
    }

    /// Shut down all services in reverse order.
    pub async fn shutdown_all(&self) -> VxResult<()> {
        info!("shutting down services");

        for (name, service) in self.services.iter().rev() {
            info!("shutting down service: {name}");
            let mut svc = service.write().await;
            if let Err(e) = svc.shutdown() {
                error!("error shutting down service {name}: {e}");
                // Continue shutting down other services
            }
        }

        info!("all services shut down");
        Ok(())
    }

    /// Hand every stored session to the coordinator as a pusher client.
    ///
    /// Returns how many sessions were attached.
    pub async fn attach_stored_sessions(&self) -> VxResult<usize> {
        let sessions = StoredSession::load_all(&*self.database.conn()?)?;
        let push = self.config.push().await;

        let mut attached = 0;
        for session in &sessions {
            let client = match ApiClient::for_session(session, &push) {
                Ok(client) => client,
                Err(e) => {
                    warn!("skipping session {}: {e}", session.user_id);
                    continue;
                }
            };
            self.coordinator
                .add_session(Arc::new(client) as Arc<dyn PusherApi>)
                .await?;
            attached += 1;
        }
        info!("attached {attached} of {} stored session(s)", sessions.len());
        Ok(attached)
    }

    pub fn coordinator(&self) -> &PushRegistrationCoordinator {
        &self.coordinator
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn controller(&self) -> &EventStreamController {
        &self.controller
    }

    pub fn settings(&self) -> &SettingsService {
        &self.settings
    }

    /// Get a reference to the event bus.
    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Get the health status of all services.
    pub async fn health_check(&self) -> Vec<(String, ServiceState, bool)> {
        let mut results = Vec::new();
        for (name, service) in &self.services {
            let svc = service.read().await;
            results.push((name.clone(), svc.state(), svc.is_healthy()));
        }
        results
    }

    /// Get the number of registered services.
    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}
