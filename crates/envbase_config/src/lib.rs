//! # envbase_config
//!
//! Layered configuration for envbase environments.
//!
//! ## Features
//!
//! - Built-in defaults extended by pattern-contributed defaults
//! - File, environment and command-line layers merged key by key
//! - First-run bootstrap of the configuration file and AMI cache
//! - Schema and required-field validation
//! - Deploy parameter bindings derived from configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use envbase_config::{CliOverrides, ConfigResolver, Resolution};
//!
//! let resolver = ConfigResolver::new("config.json")
//!     .unwrap()
//!     .with_process_env()
//!     .with_cli(CliOverrides::new().with_debug(true));
//!
//! match resolver.resolve().unwrap() {
//!     Resolution::Ready(config) => println!("{}", config.tree.to_json_pretty().unwrap()),
//!     Resolution::Bootstrapped(path) => println!("edit {:?} and re-run", path),
//! }
//! ```

pub mod bindings;
pub mod cache;
pub mod error;
pub mod resolver;
pub mod schema;
pub mod tree;

pub use bindings::{Binding, ParameterBindings};
pub use cache::AmiCache;
pub use error::{ConfigError, ConfigResult};
pub use resolver::{
    BootstrapReport, CliOverrides, ConfigHandler, ConfigLayer, ConfigResolver, EnvPrefixRule,
    Resolution, ResolvedConfig, REQUIRED_FIELDS,
};
pub use schema::{ConfigSchema, FieldType};
pub use tree::ConfigTree;
