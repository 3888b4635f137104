//! Error types for the core module.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while running a lifecycle action.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Config error: {0}")]
    Config(#[from] envbase_config::ConfigError),

    #[error("Network error: {0}")]
    Network(#[from] envbase_network::NetworkError),

    #[error("Template error: {0}")]
    Template(#[from] envbase_template::TemplateError),

    #[error("Provider error: {0}")]
    Provider(#[from] envbase_provider::ProviderError),

    #[error("Hook {hook} failed: {message}")]
    Hook { hook: String, message: String },

    #[error("Timed out after {waited_secs}s waiting for stack {stack} to finish")]
    MonitorTimeout { stack: String, waited_secs: u64 },

    #[error("Stack {stack} reached {status}: {reason}")]
    StackFailed {
        stack: String,
        status: String,
        reason: String,
    },

    #[error("Template not found at {0}; run create first")]
    MissingTemplate(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl CoreError {
    pub fn hook(hook: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Hook {
            hook: hook.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
