//! Worker settings, layered defaults -> file -> environment.

use serde::{Deserialize, Serialize};

use crate::provider::ProviderConfig;
use crate::ConfigError;

/// Process-level settings for the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Room handle passed to the transport on connect
    #[serde(default = "default_room")]
    pub room: String,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
    /// Sessions past this age are closed by the reaper
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    /// Transport handshake must complete within this bound
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
}

fn default_room() -> String {
    "default".to_string()
}

fn default_max_sessions() -> usize {
    64
}

fn default_session_timeout_secs() -> u64 {
    3_600
}

fn default_handshake_timeout_ms() -> u64 {
    5_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            room: default_room(),
            max_sessions: default_max_sessions(),
            session_timeout_secs: default_session_timeout_secs(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
        }
    }
}

/// Top-level settings tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
}

/// Load settings from an optional TOML file plus `PARLEY_` environment
/// variables (`PARLEY_WORKER__ROOM`, `PARLEY_PROVIDER__PERSONA`, ...).
/// Environment values win over the file; omitted fields use defaults.
pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder();

    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path).required(true));
    }

    let loaded = builder
        .add_source(
            config::Environment::with_prefix("PARLEY")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let settings: Settings = loaded.try_deserialize()?;
    settings.provider.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.worker.max_sessions, 64);
        assert_eq!(settings.worker.handshake_timeout_ms, 5_000);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = load_settings(Some("/nonexistent/parley.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_settings_toml() {
        let raw = r#"
            [worker]
            room = "lobby"
            max_sessions = 4

            [provider]
            persona = "You are the club's front-desk assistant."
        "#;
        let settings: Settings = toml::from_str(raw).unwrap();
        assert_eq!(settings.worker.room, "lobby");
        assert_eq!(settings.worker.max_sessions, 4);
        assert!(settings.provider.validate().is_ok());
    }
}
