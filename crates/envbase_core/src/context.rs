//! Explicit per-run state handed to hooks.

use std::path::PathBuf;

use envbase_config::{ConfigTree, ParameterBindings, ResolvedConfig};
use envbase_network::NetworkLayout;
use envbase_template::ComposedTemplates;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_ENVIRONMENT_NAME: &str = "environmentbase";

/// State of one action run.
///
/// `layout` is set once the network is generated, `composed` once templates
/// are composed and `stack_id` once a stack request is accepted.
#[derive(Debug, Clone)]
pub struct EnvironmentContext {
    pub config: ConfigTree,
    pub config_path: PathBuf,
    pub bindings: ParameterBindings,
    pub layout: Option<NetworkLayout>,
    pub composed: Option<ComposedTemplates>,
    pub stack_name: String,
    pub region: String,
    pub stack_id: Option<String>,
}

impl EnvironmentContext {
    pub fn new(config: ConfigTree) -> Self {
        let stack_name = config
            .get_non_empty("global", "environment_name")
            .unwrap_or(DEFAULT_ENVIRONMENT_NAME)
            .to_string();
        let region = config
            .get_non_empty("provider", "region")
            .unwrap_or(DEFAULT_REGION)
            .to_string();
        Self {
            config,
            config_path: PathBuf::new(),
            bindings: ParameterBindings::new(),
            layout: None,
            composed: None,
            stack_name,
            region,
            stack_id: None,
        }
    }

    pub fn from_resolved(resolved: ResolvedConfig) -> Self {
        let ResolvedConfig {
            tree,
            bindings,
            path,
            ..
        } = resolved;
        Self {
            config_path: path,
            bindings,
            ..Self::new(tree)
        }
    }

    pub fn with_bindings(mut self, bindings: ParameterBindings) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn monitor_enabled(&self) -> bool {
        self.config.get_bool("global", "monitor_stack").unwrap_or(false)
    }

    /// Directory holding the configuration file.
    pub fn base_dir(&self) -> PathBuf {
        self.config_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_default()
    }
}
