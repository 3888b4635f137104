//! Tracing subscriber setup shared by both binaries.

use std::path::Path;

use envbase_config::ConfigTree;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_LEVEL: &str = "info";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub debug: bool,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL.to_string(),
            json: false,
            debug: false,
        }
    }
}

impl LogSettings {
    /// Read the `logging` section when the configuration file is readable.
    pub fn from_config_file(path: &Path) -> Self {
        let Ok(tree) = ConfigTree::load(path) else {
            return Self::default();
        };
        Self::from_config(&tree)
    }

    pub fn from_config(tree: &ConfigTree) -> Self {
        Self {
            level: tree
                .get_non_empty("logging", "level")
                .unwrap_or(DEFAULT_LEVEL)
                .to_string(),
            json: tree.get_str("logging", "format") == Some("json"),
            debug: tree.get_bool("global", "print_debug").unwrap_or(false),
        }
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug |= debug;
        self
    }

    /// `--debug` wins, then `RUST_LOG`, then the configured level.
    pub fn filter(&self) -> EnvFilter {
        if self.debug {
            return EnvFilter::new("debug");
        }
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level))
    }
}

pub fn init(settings: &LogSettings) {
    let registry = tracing_subscriber::registry().with(settings.filter());
    let result = if settings.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .try_init()
    };

    if result.is_err() {
        // Logging already initialized, continue
    }
}
