//! Vector Core - Foundation types, error handling, configuration, and logging.
//!
//! This crate provides the shared foundation used by all other Vector push crates:
//! - Application configuration (pusher endpoint, restart window, sync defaults)
//! - Global error type and the error taxonomy used by registration retries
//! - Structured logging with tracing
//! - Platform detection utilities
//! - Common constants

pub mod config;
pub mod error;
pub mod logging;
pub mod platform;
pub mod constants;

// Re-export commonly used items at the crate root
pub use config::{AppConfig, ConfigHandle};
pub use error::{ErrorClass, VxError, VxResult};
pub use logging::init_logging;
pub use platform::Platform;
