//! Layered configuration resolution.
//!
//! # Layers
//!
//! 1. **Defaults**: the built-in document plus every registered handler's
//!    factory defaults.
//! 2. **File**: the on-disk configuration file.
//! 3. **Environment**: `<PREFIX><SECTION>_<KEY>` variables for keys that exist
//!    after the file layer.
//! 4. **Cli**: command-line flags and `section.key=value` settings.
//!
//! A missing configuration file is not an error: the resolver writes the merged
//! defaults to that path and reports [`Resolution::Bootstrapped`] so the caller
//! can stop and let the operator fill it in.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bindings::ParameterBindings;
use crate::cache::AmiCache;
use crate::error::{ConfigError, ConfigResult};
use crate::schema::{value_kind, ConfigSchema, FieldType};
use crate::tree::{parse_bool, ConfigTree};

const DEFAULT_CONFIG: &str = include_str!("../data/config.json");

/// Keys that must hold a non-empty value once every layer is applied.
pub const REQUIRED_FIELDS: &[(&str, &str)] =
    &[("template", "ec2_key_default"), ("template", "s3_bucket")];

/// Something that contributes configuration defaults and schema entries.
pub trait ConfigHandler {
    /// Defaults merged into the bootstrap document.
    fn factory_defaults(&self) -> ConfigTree {
        ConfigTree::new()
    }

    /// Keys this handler reads and their types.
    fn config_schema(&self) -> ConfigSchema {
        ConfigSchema::new()
    }
}

/// The layer that last set a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigLayer {
    Defaults,
    File,
    Environment,
    Cli,
}

impl ConfigLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Defaults => "defaults",
            Self::File => "file",
            Self::Environment => "environment",
            Self::Cli => "cli",
        }
    }
}

impl std::fmt::Display for ConfigLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How environment variable names are built from section and key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvPrefixRule {
    prefix: String,
}

impl EnvPrefixRule {
    /// Plain `<SECTION>_<KEY>` names.
    pub fn none() -> Self {
        Self::default()
    }

    /// `<PREFIX><SECTION>_<KEY>` names, e.g. `ENVBASE_` + `TEMPLATE_S3_BUCKET`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().to_uppercase(),
        }
    }

    pub fn variable_name(&self, section: &str, key: &str) -> String {
        format!("{}{}_{}", self.prefix, section, key).to_uppercase()
    }
}

/// Overrides supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Sets `global.print_debug`.
    pub debug: bool,
    /// Sets `global.output`.
    pub template_file: Option<PathBuf>,
    /// Sets `global.environment_name`.
    pub stack_name: Option<String>,
    /// Free-form `(section, key, raw value)` settings.
    pub settings: Vec<(String, String, String)>,
}

impl CliOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_template_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.template_file = Some(path.into());
        self
    }

    pub fn with_stack_name(mut self, name: impl Into<String>) -> Self {
        self.stack_name = Some(name.into());
        self
    }

    pub fn with_setting(
        mut self,
        section: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.settings.push((section.into(), key.into(), value.into()));
        self
    }

    /// Parse a `section.key=value` argument.
    pub fn parse_setting(raw: &str) -> ConfigResult<(String, String, String)> {
        let invalid = |message: &str| ConfigError::InvalidOverride {
            section: String::new(),
            key: raw.to_string(),
            message: message.to_string(),
        };

        let (path, value) = raw
            .split_once('=')
            .ok_or_else(|| invalid("expected section.key=value"))?;
        let (section, key) = path
            .split_once('.')
            .ok_or_else(|| invalid("expected section.key=value"))?;

        if section.trim().is_empty() || key.trim().is_empty() {
            return Err(invalid("section and key must not be empty"));
        }

        Ok((
            section.trim().to_string(),
            key.trim().to_string(),
            value.to_string(),
        ))
    }
}

/// Result of a successful resolution.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub tree: ConfigTree,
    pub bindings: ParameterBindings,
    /// `section.key` -> layer that last set it.
    pub provenance: BTreeMap<String, ConfigLayer>,
    pub path: PathBuf,
}

impl ResolvedConfig {
    pub fn layer_of(&self, section: &str, key: &str) -> Option<ConfigLayer> {
        self.provenance.get(&format!("{}.{}", section, key)).copied()
    }

    /// Directory holding the configuration file.
    pub fn base_dir(&self) -> PathBuf {
        base_dir_of(&self.path)
    }

    /// Path of the AMI cache named by `template.ami_map_file`.
    pub fn ami_cache_path(&self) -> PathBuf {
        let name = self
            .tree
            .get_non_empty("template", "ami_map_file")
            .unwrap_or("ami_cache.json");
        self.base_dir().join(name)
    }

    pub fn ami_cache(&self) -> ConfigResult<AmiCache> {
        AmiCache::load_or_default(&self.ami_cache_path())
    }
}

/// Outcome of [`ConfigResolver::resolve`].
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Configuration is complete and validated.
    Ready(Box<ResolvedConfig>),
    /// The config file did not exist and was written with defaults.
    Bootstrapped(PathBuf),
}

/// Files written by [`ConfigResolver::bootstrap`].
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapReport {
    pub config_path: PathBuf,
    pub ami_cache_path: PathBuf,
    pub wrote_config: bool,
    pub wrote_ami_cache: bool,
}

/// Builds the configuration tree from its layers.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    defaults: ConfigTree,
    schema: ConfigSchema,
    config_path: PathBuf,
    env_rule: EnvPrefixRule,
    env_vars: HashMap<String, String>,
    cli: CliOverrides,
}

impl ConfigResolver {
    /// Resolver for `config_path` seeded with the built-in defaults.
    pub fn new(config_path: impl Into<PathBuf>) -> ConfigResult<Self> {
        Ok(Self {
            defaults: ConfigTree::from_json_str(DEFAULT_CONFIG)?,
            schema: base_schema(),
            config_path: config_path.into(),
            env_rule: EnvPrefixRule::none(),
            env_vars: HashMap::new(),
            cli: CliOverrides::default(),
        })
    }

    /// Replace the built-in defaults with a document on disk.
    pub fn with_defaults_file(mut self, path: &Path) -> ConfigResult<Self> {
        self.defaults = ConfigTree::load(path)?;
        Ok(self)
    }

    /// Merge a handler's defaults and schema.
    pub fn with_handler<H: ConfigHandler + ?Sized>(mut self, handler: &H) -> Self {
        self.defaults.merge(&handler.factory_defaults());
        self.schema.extend(&handler.config_schema());
        self
    }

    pub fn with_env_rule(mut self, rule: EnvPrefixRule) -> Self {
        self.env_rule = rule;
        self
    }

    /// Use an explicit snapshot of environment variables.
    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Snapshot the process environment.
    pub fn with_process_env(self) -> Self {
        self.with_env_vars(std::env::vars())
    }

    pub fn with_cli(mut self, cli: CliOverrides) -> Self {
        self.cli = cli;
        self
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn defaults(&self) -> &ConfigTree {
        &self.defaults
    }

    pub fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    /// Write the defaults document and the AMI cache next to it.
    ///
    /// Existing files are left alone unless `force` is set.
    pub fn bootstrap(&self, force: bool) -> ConfigResult<BootstrapReport> {
        let ami_name = self
            .defaults
            .get_non_empty("template", "ami_map_file")
            .unwrap_or("ami_cache.json")
            .to_string();
        let ami_cache_path = base_dir_of(&self.config_path).join(ami_name);

        let wrote_config = force || !self.config_path.exists();
        if wrote_config {
            info!("Writing configuration defaults to {:?}", self.config_path);
            self.defaults.save(&self.config_path)?;
        } else {
            debug!("Configuration file {:?} already exists", self.config_path);
        }

        let wrote_ami_cache = force || !ami_cache_path.exists();
        if wrote_ami_cache {
            info!("Writing AMI cache to {:?}", ami_cache_path);
            AmiCache::builtin()?.save(&ami_cache_path)?;
        }

        Ok(BootstrapReport {
            config_path: self.config_path.clone(),
            ami_cache_path,
            wrote_config,
            wrote_ami_cache,
        })
    }

    /// Resolve every layer into a validated tree.
    pub fn resolve(&self) -> ConfigResult<Resolution> {
        if !self.config_path.exists() {
            self.bootstrap(false)?;
            warn!(
                "No configuration found; defaults written to {:?}. Fill in the required values and re-run.",
                self.config_path
            );
            return Ok(Resolution::Bootstrapped(self.config_path.clone()));
        }

        info!("Loading configuration from {:?}", self.config_path);

        let mut tree = self.defaults.clone();
        let mut provenance = BTreeMap::new();
        record(&mut provenance, tree_keys(&tree), ConfigLayer::Defaults);

        let file = ConfigTree::load(&self.config_path)?;
        let touched = tree.merge(&file);
        record(&mut provenance, touched, ConfigLayer::File);

        let touched = self.apply_env(&mut tree)?;
        record(&mut provenance, touched, ConfigLayer::Environment);

        let touched = self.apply_cli(&mut tree)?;
        record(&mut provenance, touched, ConfigLayer::Cli);

        self.schema.validate(&tree)?;
        check_required(&tree)?;

        let bindings = deploy_bindings(&tree);
        debug!("Resolved {} deploy parameter bindings", bindings.len());

        Ok(Resolution::Ready(Box::new(ResolvedConfig {
            tree,
            bindings,
            provenance,
            path: self.config_path.clone(),
        })))
    }

    /// Apply every layer without bootstrapping or validating.
    ///
    /// A missing configuration file contributes nothing.
    pub fn preview(&self) -> ConfigResult<ConfigTree> {
        let mut tree = self.defaults.clone();
        if self.config_path.exists() {
            tree.merge(&ConfigTree::load(&self.config_path)?);
        }
        self.apply_env(&mut tree)?;
        self.apply_cli(&mut tree)?;
        Ok(tree)
    }

    fn apply_env(&self, tree: &mut ConfigTree) -> ConfigResult<Vec<(String, String)>> {
        let mut candidates = Vec::new();
        for section in tree.section_names() {
            if let Some(values) = tree.section(section) {
                for key in values.keys() {
                    let name = self.env_rule.variable_name(section, key);
                    if let Some(raw) = self.env_vars.get(&name) {
                        candidates.push((section.to_string(), key.clone(), name, raw.clone()));
                    }
                }
            }
        }

        let mut touched = Vec::new();
        for (section, key, name, raw) in candidates {
            let value = coerce_override(tree.get(&section, &key), &raw).map_err(|message| {
                ConfigError::InvalidOverride {
                    section: section.clone(),
                    key: key.clone(),
                    message: format!("{} (from {})", message, name),
                }
            })?;
            debug!("Environment override {} -> {}.{}", name, section, key);
            tree.set(&section, &key, value);
            touched.push((section, key));
        }
        Ok(touched)
    }

    fn apply_cli(&self, tree: &mut ConfigTree) -> ConfigResult<Vec<(String, String)>> {
        let mut touched = Vec::new();

        if self.cli.debug {
            tree.set("global", "print_debug", Value::Bool(true));
            touched.push(("global".to_string(), "print_debug".to_string()));
        }

        if let Some(path) = &self.cli.template_file {
            tree.set(
                "global",
                "output",
                Value::String(path.to_string_lossy().into_owned()),
            );
            touched.push(("global".to_string(), "output".to_string()));
        }

        if let Some(name) = &self.cli.stack_name {
            tree.set("global", "environment_name", Value::String(name.clone()));
            touched.push(("global".to_string(), "environment_name".to_string()));
        }

        for (section, key, raw) in &self.cli.settings {
            let value = coerce_override(tree.get(section, key), raw).map_err(|message| {
                ConfigError::InvalidOverride {
                    section: section.clone(),
                    key: key.clone(),
                    message,
                }
            })?;
            tree.set(section, key, value);
            touched.push((section.clone(), key.clone()));
        }

        Ok(touched)
    }
}

fn base_schema() -> ConfigSchema {
    ConfigSchema::new()
        .field("global", "environment_name", FieldType::Str)
        .field("global", "output", FieldType::Str)
        .field("global", "print_debug", FieldType::Bool)
        .field("global", "monitor_stack", FieldType::Bool)
        .field("global", "monitor_timeout_seconds", FieldType::Int)
        .field("global", "monitor_poll_interval_seconds", FieldType::Int)
        .field("template", "ec2_key_default", FieldType::Str)
        .field("template", "s3_bucket", FieldType::Str)
        .field("template", "s3_prefix", FieldType::Str)
        .field("template", "upload_templates", FieldType::Bool)
        .field("template", "include_timestamp", FieldType::Bool)
        .field("template", "timeout_in_minutes", FieldType::Int)
        .field("template", "patterns", FieldType::List)
        .field("provider", "region", FieldType::Str)
}

fn base_dir_of(path: &Path) -> PathBuf {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn tree_keys(tree: &ConfigTree) -> Vec<(String, String)> {
    tree.section_names()
        .flat_map(|section| {
            tree.section(section)
                .into_iter()
                .flat_map(|values| values.keys())
                .map(move |key| (section.to_string(), key.clone()))
        })
        .collect()
}

fn record(
    provenance: &mut BTreeMap<String, ConfigLayer>,
    keys: Vec<(String, String)>,
    layer: ConfigLayer,
) {
    for (section, key) in keys {
        provenance.insert(format!("{}.{}", section, key), layer);
    }
}

fn check_required(tree: &ConfigTree) -> ConfigResult<()> {
    for (section, key) in REQUIRED_FIELDS {
        if tree.get_non_empty(section, key).is_none() {
            return Err(ConfigError::MissingRequired {
                section: section.to_string(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

/// `ec2Key` plus every entry of the optional `parameters` section.
fn deploy_bindings(tree: &ConfigTree) -> ParameterBindings {
    let mut bindings = ParameterBindings::new();
    if let Some(key) = tree.get_non_empty("template", "ec2_key_default") {
        bindings.bind_value("ec2Key", key);
    }
    if let Some(parameters) = tree.section("parameters") {
        for (name, value) in parameters {
            bindings.bind_value(name.clone(), value.clone());
        }
    }
    bindings
}

/// Convert a raw override string to the type of the value it replaces.
fn coerce_override(existing: Option<&Value>, raw: &str) -> Result<Value, String> {
    match existing {
        Some(Value::Bool(_)) => parse_bool(raw)
            .map(Value::Bool)
            .ok_or_else(|| format!("'{}' is not a boolean", raw)),
        Some(Value::Number(n)) => {
            let trimmed = raw.trim();
            if n.is_f64() {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| format!("'{}' is not a number", raw))
            } else {
                trimmed
                    .parse::<i64>()
                    .map(Value::from)
                    .map_err(|_| format!("'{}' is not an integer", raw))
            }
        }
        Some(existing @ (Value::Array(_) | Value::Object(_))) => {
            let parsed: Value = serde_json::from_str(raw).map_err(|e| e.to_string())?;
            if value_kind(&parsed) != value_kind(existing) {
                return Err(format!(
                    "expected {}, found {}",
                    value_kind(existing),
                    value_kind(&parsed)
                ));
            }
            Ok(parsed)
        }
        Some(Value::String(_)) => Ok(Value::String(raw.to_string())),
        Some(Value::Null) | None => {
            Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
        }
    }
}
