//! Error types for template composition.

use thiserror::Error;

/// Result type alias for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur while building, composing or publishing templates.
#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("Duplicate logical id '{id}' in template {template}")]
    DuplicateLogicalId { template: String, id: String },

    #[error("Pattern listed more than once: {0}")]
    DuplicatePattern(String),

    #[error("Unknown pattern: {0}")]
    UnknownPattern(String),

    #[error("Pattern '{pattern}' requires '{requires}', which must be listed before it")]
    ForwardReference { pattern: String, requires: String },

    #[error("Pattern '{pattern}' failed: {message}")]
    PatternFailed { pattern: String, message: String },

    #[error("Invalid template: {0}")]
    InvalidTemplate(String),

    #[error("Template validation hash missing")]
    MissingValidationHash,

    #[error("Template validation hash mismatch: expected {expected}, computed {actual}")]
    ValidationHashMismatch { expected: String, actual: String },

    #[error("Missing template setting: {0}")]
    MissingSetting(String),

    #[error("Config error: {0}")]
    Config(#[from] envbase_config::ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] envbase_provider::ProviderError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
