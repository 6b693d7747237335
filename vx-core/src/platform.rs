//! Platform detection and OS-specific paths.

use std::path::PathBuf;

use crate::constants::APP_NAME;
use crate::error::{VxError, VxResult};

/// Detected operating system platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    /// Detect the current platform at compile time.
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    /// Per-user data directory holding the database and logs.
    pub fn data_dir() -> VxResult<PathBuf> {
        let base = dirs::data_dir()
            .ok_or_else(|| VxError::Config("could not determine data directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    /// Per-user configuration directory holding `config.toml`.
    pub fn config_dir() -> VxResult<PathBuf> {
        let base = dirs::config_dir()
            .ok_or_else(|| VxError::Config("could not determine config directory".into()))?;
        Ok(base.join(APP_NAME))
    }

    /// Human-readable platform name.
    pub fn name(&self) -> &'static str {
        match self {
            Platform::Windows => "Windows",
            Platform::MacOs => "macOS",
            Platform::Linux => "Linux",
        }
    }

    /// Device display name sent with every pusher.
    pub fn device_display_name() -> String {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| format!("{APP_NAME} ({})", Self::current().name()))
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
