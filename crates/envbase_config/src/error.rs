//! Error types for configuration resolution.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while building the configuration tree.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required configuration value: {section}.{key}")]
    MissingRequired { section: String, key: String },

    #[error("Missing configuration section: {0}")]
    MissingSection(String),

    #[error("Missing configuration key: {section}.{key}")]
    MissingKey { section: String, key: String },

    #[error("Invalid type for {section}.{key}: expected {expected}, found {found}")]
    InvalidType {
        section: String,
        key: String,
        expected: String,
        found: String,
    },

    #[error("Invalid override for {section}.{key}: {message}")]
    InvalidOverride {
        section: String,
        key: String,
        message: String,
    },

    #[error("Invalid configuration document {path:?}: {message}")]
    InvalidDocument { path: PathBuf, message: String },

    #[error("Unknown schema type: {0}")]
    UnknownSchemaType(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
