//! The four lifecycle actions.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Init,
    Create,
    Deploy,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Create => "create",
            Self::Deploy => "deploy",
            Self::Delete => "delete",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "init" => Some(Self::Init),
            "create" => Some(Self::Create),
            "deploy" => Some(Self::Deploy),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }

    /// Whether the action talks to the provider.
    pub fn uses_provider(&self) -> bool {
        !matches!(self, Self::Init)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
