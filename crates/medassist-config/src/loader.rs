//! Config file discovery, parsing, and environment overrides

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use crate::AssistantConfig;

/// Overrides `backend.origin`
pub const ENV_BACKEND_URL: &str = "MEDASSIST_BACKEND_URL";
/// Overrides `backend.stall_timeout_secs`
pub const ENV_STALL_TIMEOUT: &str = "MEDASSIST_STALL_TIMEOUT";
/// Overrides `logging.level`
pub const ENV_LOG: &str = "MEDASSIST_LOG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// `<config dir>/medassist/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("medassist").join("config.toml"))
    }

    /// Load configuration with environment overrides applied
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when present and built-in defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<AssistantConfig, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_path().filter(|p| p.exists()) {
                Some(default) => Self::load_from_file(&default)?,
                None => {
                    debug!("No config file found, using defaults");
                    AssistantConfig::default()
                }
            },
        };

        Self::apply_env_overrides(&mut config);
        Self::validate(&config)?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<AssistantConfig, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<AssistantConfig, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_env_overrides(config: &mut AssistantConfig) {
        if let Ok(url) = std::env::var(ENV_BACKEND_URL) {
            config.backend.origin = Some(url);
        }
        if let Ok(raw) = std::env::var(ENV_STALL_TIMEOUT) {
            match raw.trim().parse() {
                Ok(secs) => config.backend.stall_timeout_secs = secs,
                Err(_) => warn!(value = %raw, "Ignoring non-numeric {}", ENV_STALL_TIMEOUT),
            }
        }
        if let Ok(level) = std::env::var(ENV_LOG) {
            config.logging.level = level;
        }
    }

    pub fn validate(config: &AssistantConfig) -> Result<(), ConfigError> {
        if let Some(origin) = config.backend.origin() {
            if !(origin.starts_with("http://") || origin.starts_with("https://")) {
                return Err(ConfigError::Invalid(format!(
                    "backend.origin must be an http(s) URL, got '{}'",
                    origin
                )));
            }
        }
        if !config.backend.sessions_path.contains("{id}") {
            return Err(ConfigError::Invalid(
                "backend.sessions_path must contain an {id} placeholder".to_string(),
            ));
        }
        let panel = &config.panel;
        if panel.min_width > panel.max_width {
            return Err(ConfigError::Invalid(format!(
                "panel.min_width ({}) exceeds panel.max_width ({})",
                panel.min_width, panel.max_width
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        std::env::remove_var(ENV_BACKEND_URL);
        std::env::remove_var(ENV_STALL_TIMEOUT);
        std::env::remove_var(ENV_LOG);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = ConfigLoader::from_toml("").unwrap();
        assert_eq!(config, AssistantConfig::default());
        assert!(config.backend.stream);
        assert_eq!(config.backend.origin(), None);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = ConfigLoader::from_toml(
            r#"
            [backend]
            origin = "http://localhost:8000"
            stream = false

            [panel]
            width = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.backend.origin(), Some("http://localhost:8000"));
        assert!(!config.backend.stream);
        assert_eq!(config.backend.chat_path, "/api/chat");
        assert_eq!(config.panel.width, 500);
        assert_eq!(config.panel.max_width, 960);
    }

    #[test]
    #[serial]
    fn load_reads_explicit_file() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let config = ConfigLoader::load(Some(file.path())).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    #[serial]
    fn missing_explicit_file_is_an_error() {
        clear_env();
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigLoader::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    #[serial]
    fn env_overrides_file_values() {
        clear_env();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[backend]\norigin = \"http://file:1\"\nstall_timeout_secs = 5"
        )
        .unwrap();

        std::env::set_var(ENV_BACKEND_URL, "https://env.example.org");
        std::env::set_var(ENV_STALL_TIMEOUT, "0");
        let config = ConfigLoader::load(Some(file.path()));
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.backend.origin(), Some("https://env.example.org"));
        assert_eq!(config.backend.stall_timeout(), None);
    }

    #[test]
    #[serial]
    fn bad_stall_timeout_env_is_ignored() {
        clear_env();
        let mut config = AssistantConfig::default();
        std::env::set_var(ENV_STALL_TIMEOUT, "soon");
        ConfigLoader::apply_env_overrides(&mut config);
        clear_env();
        assert_eq!(config.backend.stall_timeout_secs, 60);
    }

    #[test]
    fn non_http_origin_is_rejected() {
        let config = ConfigLoader::from_toml("[backend]\norigin = \"ftp://x\"").unwrap();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn inverted_panel_bounds_are_rejected() {
        let config =
            ConfigLoader::from_toml("[panel]\nmin_width = 900\nmax_width = 400").unwrap();
        assert!(ConfigLoader::validate(&config).is_err());
    }
}
