//! Configuration management for the Parley worker
//!
//! Supports loading configuration from:
//! - TOML files
//! - Environment variables (PARLEY_ prefix)
//!
//! Provider configuration is validated for presence only; endpoint
//! semantics, credentials, and persona content are opaque to the
//! orchestrator.

pub mod provider;
pub mod settings;

pub use provider::{
    GeneratorProviderConfig, ProviderConfig, ProviderKind, SttProviderConfig, TtsProviderConfig,
    TurnConfig, VadConfig,
};
pub use settings::{load_settings, Settings, WorkerConfig};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}

impl From<ConfigError> for parley_core::Error {
    fn from(err: ConfigError) -> Self {
        parley_core::Error::Config(err.to_string())
    }
}
