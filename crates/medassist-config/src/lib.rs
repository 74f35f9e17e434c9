//! # medassist configuration
//!
//! Settings for the assistant client, read from a TOML file with environment
//! overrides on top:
//!
//! ```toml
//! [backend]
//! origin = "https://clinic.example.org"
//! stall_timeout_secs = 90
//!
//! [panel]
//! width = 480
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Every section and field is optional. Leaving out `backend.origin` is valid:
//! the client then answers every turn with an explanatory message instead of
//! making requests.

mod backend;
mod loader;
mod panel;

pub use backend::BackendConfig;
pub use loader::{ConfigError, ConfigLoader, ENV_BACKEND_URL, ENV_LOG, ENV_STALL_TIMEOUT};
pub use panel::PanelConfig;

use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssistantConfig {
    pub backend: BackendConfig,
    pub panel: PanelConfig,
    pub logging: LoggingConfig,
}

/// Log filter for the binary's subscriber
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `medassist_client=debug`
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
