//! CLI command definitions.
//!
//! Global flags shape configuration resolution and provider selection; each
//! subcommand maps to one lifecycle action.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use envbase_config::{CliOverrides, EnvPrefixRule};
use envbase_core::{
    Action, ActionOutcome, ControllerOptions, EnvironmentController, PatternRegistry,
};
use envbase_provider::{CloudProvider, MockProvider, StackEventSource};
use tracing::{info, warn};

pub mod create;
pub mod delete;
pub mod deploy;
pub mod init;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// envbase - layered infrastructure environments from reusable patterns
#[derive(Parser)]
#[command(name = "envbase")]
#[command(version, about = "envbase - layered infrastructure environments from reusable patterns")]
#[command(long_about = r#"
envbase composes a nested infrastructure template from reusable patterns
(base network, HA NAT, bastion), publishes it, and manages the stack.

ACTIONS:
  init    → Write configuration defaults and the AMI cache
  create  → Generate the network and write (and upload) templates
  deploy  → Create or update the stack from the written template
  delete  → Delete the stack

EXIT CODES:
  0 - Success
  1 - General error
  2 - Configuration error
  3 - Network error
  4 - Template error
  5 - Provider error
  6 - Stack monitoring error
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Configuration file (JSON or YAML)
    #[arg(short = 'c', long, global = true, default_value = DEFAULT_CONFIG_FILE, env = "ENVBASE_CONFIG_FILE")]
    pub config_file: PathBuf,

    /// Enable debug logging and set global.print_debug
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Where the parent template is written (global.output)
    #[arg(long, global = true)]
    pub template_file: Option<PathBuf>,

    /// Stack name (global.environment_name)
    #[arg(long, global = true)]
    pub stack_name: Option<String>,

    /// Override any setting, e.g. --set network.az_count=2
    #[arg(long = "set", value_name = "SECTION.KEY=VALUE", global = true)]
    pub settings: Vec<String>,

    /// Prefix for environment variable overrides
    #[arg(long, global = true)]
    pub env_prefix: Option<String>,

    /// Use the in-memory provider instead of the cloud
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write configuration defaults and the AMI cache
    Init(init::InitArgs),

    /// Generate templates for the configured patterns
    Create(create::CreateArgs),

    /// Create or update the stack
    Deploy(deploy::DeployArgs),

    /// Delete the stack
    Delete(delete::DeleteArgs),
}

impl GlobalArgs {
    pub fn overrides(&self) -> Result<CliOverrides> {
        let mut cli = CliOverrides::new().with_debug(self.debug);
        if let Some(path) = &self.template_file {
            cli = cli.with_template_file(path);
        }
        if let Some(name) = &self.stack_name {
            cli = cli.with_stack_name(name);
        }
        for raw in &self.settings {
            let (section, key, value) = CliOverrides::parse_setting(raw)
                .with_context(|| format!("Invalid --set argument '{}'", raw))?;
            cli = cli.with_setting(section, key, value);
        }
        Ok(cli)
    }

    pub fn options(&self, extra: &[(&str, &str, String)]) -> Result<ControllerOptions> {
        let mut cli = self.overrides()?;
        for (section, key, value) in extra {
            cli = cli.with_setting(*section, *key, value.clone());
        }
        let env_rule = match &self.env_prefix {
            Some(prefix) => EnvPrefixRule::with_prefix(prefix),
            None => EnvPrefixRule::none(),
        };
        Ok(ControllerOptions::new(&self.config_file)
            .with_env_rule(env_rule)
            .with_cli(cli))
    }

    async fn providers(
        &self,
        action: Action,
        region: &str,
    ) -> Result<(Arc<dyn CloudProvider>, Arc<dyn StackEventSource>)> {
        if self.dry_run || !action.uses_provider() {
            if self.dry_run {
                warn!("Dry run: no cloud calls will be made");
            }
            let mock = Arc::new(MockProvider::dry_run(region));
            return Ok((mock.clone(), mock));
        }
        cloud_providers(region).await
    }

    pub async fn run(&self, action: Action, extra: &[(&str, &str, String)]) -> Result<ActionOutcome> {
        let options = self.options(extra)?;
        let region = options
            .region(&PatternRegistry::builtin())
            .context("Failed to read provider.region")?;
        let (provider, events) = self.providers(action, &region).await?;
        let controller = EnvironmentController::new(provider, events, options);
        let outcome = controller
            .run(action)
            .await
            .with_context(|| format!("{} failed", action))?;

        if let ActionOutcome::Halted { config_path } = &outcome {
            println!("Configuration written to {}.", config_path.display());
            println!("Fill in template.ec2_key_default and template.s3_bucket, then re-run.");
        }
        Ok(outcome)
    }
}

#[cfg(feature = "aws")]
async fn cloud_providers(
    region: &str,
) -> Result<(Arc<dyn CloudProvider>, Arc<dyn StackEventSource>)> {
    info!(region, "Using AWS provider");
    let provider = Arc::new(envbase_provider::AwsProvider::from_region(region).await);
    Ok((provider.clone(), provider))
}

#[cfg(not(feature = "aws"))]
async fn cloud_providers(
    region: &str,
) -> Result<(Arc<dyn CloudProvider>, Arc<dyn StackEventSource>)> {
    info!(region, "No cloud provider compiled in");
    anyhow::bail!("envbase was built without the `aws` feature; rebuild with it or pass --dry-run")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&[
            "envbase",
            "create",
            "--config-file",
            "env.yaml",
            "--set",
            "network.az_count=2",
            "--stack-name",
            "staging",
        ]);
        assert!(matches!(cli.command, Commands::Create(_)));
        assert_eq!(cli.global.config_file, PathBuf::from("env.yaml"));

        let overrides = cli.global.overrides().unwrap();
        assert_eq!(overrides.stack_name.as_deref(), Some("staging"));
        assert_eq!(
            overrides.settings,
            vec![("network".to_string(), "az_count".to_string(), "2".to_string())]
        );
    }

    #[test]
    fn test_bad_setting_is_rejected() {
        let cli = parse(&["envbase", "deploy", "--set", "no-dot"]);
        assert!(cli.global.overrides().is_err());
    }

    #[test]
    fn test_region_follows_every_layer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"provider": {"region": "us-west-2"}}"#).unwrap();
        let config = path.to_string_lossy().to_string();
        let registry = PatternRegistry::builtin();

        let cli = parse(&["envbase", "delete", "--config-file", &config]);
        let options = cli.global.options(&[]).unwrap().with_env_vars(Vec::<(String, String)>::new());
        assert_eq!(options.region(&registry).unwrap(), "us-west-2");

        let cli = parse(&["envbase", "delete", "--config-file", &config, "--env-prefix", "envbase_"]);
        let options = cli
            .global
            .options(&[])
            .unwrap()
            .with_env_vars([("ENVBASE_PROVIDER_REGION", "eu-west-1")]);
        assert_eq!(options.region(&registry).unwrap(), "eu-west-1");

        let cli = parse(&[
            "envbase",
            "delete",
            "--config-file",
            &config,
            "--set",
            "provider.region=ap-south-1",
        ]);
        let options = cli
            .global
            .options(&[])
            .unwrap()
            .with_env_vars([("PROVIDER_REGION", "eu-west-1")]);
        assert_eq!(options.region(&registry).unwrap(), "ap-south-1");
    }

    #[test]
    fn test_region_defaults_without_config_file() {
        let cli = parse(&["envbase", "delete", "--config-file", "/nonexistent/config.json"]);
        let options = cli.global.options(&[]).unwrap().with_env_vars(Vec::<(String, String)>::new());
        assert_eq!(
            options.region(&PatternRegistry::builtin()).unwrap(),
            envbase_core::context::DEFAULT_REGION
        );
    }
}
