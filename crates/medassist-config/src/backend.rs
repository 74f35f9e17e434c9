//! Backend endpoint configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub(crate) const DEFAULT_CHAT_PATH: &str = "/api/chat";
pub(crate) const DEFAULT_SESSIONS_PATH: &str = "/api/chat/sessions/{id}";
pub(crate) const DEFAULT_TOOLS_PATH: &str = "/api/tools";
pub(crate) const DEFAULT_AGENTS_PATH: &str = "/api/agents";
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
pub(crate) const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub(crate) const DEFAULT_STALL_TIMEOUT_SECS: u64 = 60;

/// Where the agent backend lives and how to talk to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Scheme and host of the backend, e.g. `http://localhost:8000`
    pub origin: Option<String>,
    /// Path for sending a turn
    pub chat_path: String,
    /// Path template for one persisted session; `{id}` is replaced
    pub sessions_path: String,
    pub tools_path: String,
    pub agents_path: String,
    /// Ask the backend for an event stream instead of a single JSON reply
    pub stream: bool,
    pub connect_timeout_secs: u64,
    /// Timeout for non-streaming requests (history, registries)
    pub request_timeout_secs: u64,
    /// Give up on a stream after this long without a chunk; 0 disables
    pub stall_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            origin: None,
            chat_path: DEFAULT_CHAT_PATH.to_string(),
            sessions_path: DEFAULT_SESSIONS_PATH.to_string(),
            tools_path: DEFAULT_TOOLS_PATH.to_string(),
            agents_path: DEFAULT_AGENTS_PATH.to_string(),
            stream: true,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            stall_timeout_secs: DEFAULT_STALL_TIMEOUT_SECS,
        }
    }
}

impl BackendConfig {
    /// Origin without trailing slash, if one is configured and non-blank
    pub fn origin(&self) -> Option<&str> {
        self.origin
            .as_deref()
            .map(|o| o.trim().trim_end_matches('/'))
            .filter(|o| !o.is_empty())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stall_timeout(&self) -> Option<Duration> {
        (self.stall_timeout_secs > 0).then(|| Duration::from_secs(self.stall_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_is_normalized() {
        let config = BackendConfig {
            origin: Some(" http://localhost:8000/ ".into()),
            ..Default::default()
        };
        assert_eq!(config.origin(), Some("http://localhost:8000"));
    }

    #[test]
    fn blank_origin_counts_as_missing() {
        let config = BackendConfig {
            origin: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(config.origin(), None);
    }

    #[test]
    fn zero_stall_timeout_disables_it() {
        let config = BackendConfig {
            stall_timeout_secs: 0,
            ..Default::default()
        };
        assert_eq!(config.stall_timeout(), None);
        assert_eq!(
            BackendConfig::default().stall_timeout(),
            Some(Duration::from_secs(60))
        );
    }
}
