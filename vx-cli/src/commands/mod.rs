//! CLI command implementations.

pub mod status;
pub mod push;
pub mod sessions;
pub mod pushers;
pub mod settings;
pub mod notifications;
pub mod stream;
pub mod logs;
pub mod db;

use std::sync::Arc;

use vx_core::config::ConfigHandle;
use vx_core::error::{VxError, VxResult};
use vx_models::{Database, PersistedRegistration};
use vx_services::event_stream::{MonitoredSession, SessionFactory, SharedForeground};
use vx_services::{Collaborators, DesktopRenderer, ServiceRegistry, StaticTokenProvider};

/// Helper to initialize the database from config.
pub async fn init_database(config: &ConfigHandle) -> VxResult<Database> {
    let cfg = config.read().await;
    let db_path = cfg.effective_db_path()?;
    Database::init(&db_path, &cfg.database)
}

/// The command line has no sync loop, so there is nothing to stream from.
struct NoLiveSync;

impl SessionFactory for NoLiveSync {
    fn open(&self, user_id: &str) -> VxResult<MonitoredSession> {
        Err(VxError::InvalidState(format!(
            "live sync for {user_id} is not available from the command line"
        )))
    }
}

/// Build the service registry with every stored session attached.
///
/// `token` overrides the provider token; otherwise the stored one is reused.
pub async fn build_registry(config: &ConfigHandle, token: Option<String>) -> VxResult<ServiceRegistry> {
    let database = init_database(config).await?;
    let token = match token {
        Some(token) => Some(token),
        None => PersistedRegistration::load(&*database.conn()?)
            .map(|record| record.token)
            .unwrap_or(None),
    };

    let collaborators = Collaborators {
        provider: Arc::new(StaticTokenProvider::new(token)),
        session_factory: Arc::new(NoLiveSync),
        renderer: Arc::new(DesktopRenderer::new()),
        foreground: Arc::new(SharedForeground::new()),
        restart_scheduler: None,
    };
    let registry = ServiceRegistry::new(config.clone(), database, collaborators).await?;
    registry.init_all().await?;
    registry.attach_stored_sessions().await?;
    Ok(registry)
}

/// Show only the ends of a secret.
pub fn mask(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
