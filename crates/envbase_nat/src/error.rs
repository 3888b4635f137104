//! Error types for the HA-NAT controller.

use thiserror::Error;

/// Result type alias for NAT operations.
pub type NatResult<T> = Result<T, NatError>;

/// Errors raised while taking over private subnet routes.
#[derive(Error, Debug)]
pub enum NatError {
    /// Every failed takeover step ends up here.
    #[error("Route takeover failed during {stage}: {message}")]
    RouteTakeover { stage: String, message: String },

    #[error("Metadata lookup for {path} failed: {message}")]
    Metadata { path: String, message: String },

    #[error("Host command `{command}` failed: {message}")]
    HostCommand { command: String, message: String },

    #[error("Provider error: {0}")]
    Provider(#[from] envbase_provider::ProviderError),
}

impl NatError {
    pub fn takeover(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RouteTakeover {
            stage: stage.into(),
            message: message.into(),
        }
    }

    pub fn metadata(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn host(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HostCommand {
            command: command.into(),
            message: message.into(),
        }
    }
}
