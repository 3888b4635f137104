//! The stack lifecycle orchestrator.
//!
//! One [`Action`] per run:
//!
//! - **init** writes the configuration and AMI cache bootstrap files.
//! - **create** resolves configuration, generates the network, composes and
//!   publishes templates.
//! - **deploy** submits the published parent template as a stack create or
//!   update and optionally monitors its events.
//! - **delete** requests stack deletion.
//!
//! Every action except init halts with [`ActionOutcome::Halted`] when the
//! configuration file had to be bootstrapped.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use envbase_config::{
    BootstrapReport, CliOverrides, ConfigResolver, EnvPrefixRule, Resolution, ResolvedConfig,
};
use envbase_network::{NetworkSpec, TopologyGenerator};
use envbase_provider::{CloudProvider, ProviderError, StackEventSource, StackRequest};
use envbase_template::{
    check_pattern_order, load_bindings, object_key, validate_template_contents, ComposerSettings,
    PublishReport, PublishSettings, Template, TemplateComposer, TemplatePublisher,
};
use tracing::{debug, info, warn};

use crate::action::Action;
use crate::context::{EnvironmentContext, DEFAULT_REGION};
use crate::error::{CoreError, CoreResult};
use crate::hooks::{LifecycleHooks, NoopHooks};
use crate::monitor::{channel_name, MonitorOutcome, StackMonitor, Termination};
use crate::registry::PatternRegistry;

/// How configuration is resolved for a run.
#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub config_file: PathBuf,
    pub env_rule: EnvPrefixRule,
    /// Explicit environment; `None` reads the process environment.
    pub env_vars: Option<HashMap<String, String>>,
    pub cli: CliOverrides,
    /// Rewrite existing bootstrap files on init.
    pub force: bool,
}

impl ControllerOptions {
    pub fn new(config_file: impl Into<PathBuf>) -> Self {
        Self {
            config_file: config_file.into(),
            env_rule: EnvPrefixRule::none(),
            env_vars: None,
            cli: CliOverrides::new(),
            force: false,
        }
    }

    pub fn with_env_rule(mut self, rule: EnvPrefixRule) -> Self {
        self.env_rule = rule;
        self
    }

    pub fn with_env_vars<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env_vars = Some(
            vars.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        );
        self
    }

    pub fn with_cli(mut self, cli: CliOverrides) -> Self {
        self.cli = cli;
        self
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Resolver seeded with every pattern in `registry`.
    pub fn resolver(&self, registry: &PatternRegistry) -> CoreResult<ConfigResolver> {
        let mut resolver = ConfigResolver::new(&self.config_file)?;
        for pattern in registry.all() {
            resolver = resolver.with_handler(pattern.as_ref());
        }
        resolver = resolver
            .with_env_rule(self.env_rule.clone())
            .with_cli(self.cli.clone());
        Ok(match &self.env_vars {
            Some(vars) => resolver.with_env_vars(vars.clone()),
            None => resolver.with_process_env(),
        })
    }

    /// Region after every configuration layer, without bootstrapping.
    pub fn region(&self, registry: &PatternRegistry) -> CoreResult<String> {
        let tree = self.resolver(registry)?.preview()?;
        Ok(tree
            .get_non_empty("provider", "region")
            .unwrap_or(DEFAULT_REGION)
            .to_string())
    }
}

/// Result of a successful action.
#[derive(Debug, Clone)]
pub enum ActionOutcome {
    Initialized(BootstrapReport),
    /// The configuration file was missing and has been written with defaults.
    Halted { config_path: PathBuf },
    Created(PublishReport),
    Deployed {
        stack_name: String,
        stack_id: String,
        /// The provider reported nothing to update.
        no_updates: bool,
        monitor: Option<MonitorOutcome>,
    },
    Deleted { stack_name: String },
}

/// Drives lifecycle actions against a provider.
pub struct EnvironmentController {
    provider: Arc<dyn CloudProvider>,
    events: Arc<dyn StackEventSource>,
    hooks: Arc<dyn LifecycleHooks>,
    registry: PatternRegistry,
    options: ControllerOptions,
}

impl EnvironmentController {
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        events: Arc<dyn StackEventSource>,
        options: ControllerOptions,
    ) -> Self {
        Self {
            provider,
            events,
            hooks: Arc::new(NoopHooks),
            registry: PatternRegistry::builtin(),
            options,
        }
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_registry(mut self, registry: PatternRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn options(&self) -> &ControllerOptions {
        &self.options
    }

    /// Resolver seeded with every registered pattern's defaults.
    pub fn resolver(&self) -> CoreResult<ConfigResolver> {
        self.options.resolver(&self.registry)
    }

    pub async fn run(&self, action: Action) -> CoreResult<ActionOutcome> {
        info!(action = %action, config = ?self.options.config_file, "Running action");

        let resolver = self.resolver()?;
        if action == Action::Init {
            return self.init(&resolver);
        }

        let resolved = match resolver.resolve()? {
            Resolution::Ready(resolved) => *resolved,
            Resolution::Bootstrapped(config_path) => {
                return Ok(ActionOutcome::Halted { config_path });
            }
        };

        match action {
            Action::Create => self.create(resolved).await,
            Action::Deploy => self.deploy(resolved).await,
            Action::Delete => self.delete(resolved).await,
            Action::Init => self.init(&resolver),
        }
    }

    fn init(&self, resolver: &ConfigResolver) -> CoreResult<ActionOutcome> {
        let report = resolver.bootstrap(self.options.force)?;
        info!(
            config = ?report.config_path,
            wrote_config = report.wrote_config,
            wrote_ami_cache = report.wrote_ami_cache,
            "Init complete"
        );
        Ok(ActionOutcome::Initialized(report))
    }

    async fn create(&self, resolved: ResolvedConfig) -> CoreResult<ActionOutcome> {
        let ami_cache = resolved.ami_cache()?;
        let mut ctx = EnvironmentContext::from_resolved(resolved);

        let patterns = self.registry.configured(&ctx.config)?;
        check_pattern_order(&patterns)?;

        let spec = NetworkSpec::from_config(&ctx.config)?;
        let layout = TopologyGenerator::new(self.provider.clone())
            .generate(&spec, &ctx.region)
            .await?;
        ctx.layout = Some(layout);

        self.hooks.pre_create(&mut ctx).await?;

        let layout = ctx
            .layout
            .as_ref()
            .ok_or_else(|| CoreError::hook("pre_create", "network layout was removed"))?;
        let composer = TemplateComposer::new(ComposerSettings::from_config(&ctx.config)?);
        let composed = composer.compose(&ctx.config, layout, &ami_cache, &patterns, &ctx.bindings)?;
        ctx.bindings = composed.bindings.clone();
        ctx.composed = Some(composed);

        self.hooks.post_create(&mut ctx).await?;

        let composed = ctx
            .composed
            .as_ref()
            .ok_or_else(|| CoreError::hook("post_create", "composed templates were removed"))?;
        let publisher = TemplatePublisher::new(
            self.provider.clone(),
            PublishSettings::from_config(&ctx.config)?,
        );
        let report = publisher.publish(composed).await?;

        info!(
            parent = ?report.parent_path,
            children = report.child_paths.len(),
            uploaded = report.uploaded.len(),
            "Create complete"
        );
        Ok(ActionOutcome::Created(report))
    }

    async fn deploy(&self, resolved: ResolvedConfig) -> CoreResult<ActionOutcome> {
        let mut ctx = EnvironmentContext::from_resolved(resolved);
        self.hooks.pre_deploy(&mut ctx).await?;

        let settings = PublishSettings::from_config(&ctx.config)?;
        let output = settings.output_path.clone();
        if !output.exists() {
            return Err(CoreError::MissingTemplate(output));
        }
        let contents = fs::read_to_string(&output)?;
        if let Err(e) = validate_template_contents(&contents) {
            warn!(path = ?output, "Template failed validation, deploying anyway: {}", e);
        }
        let parent = Template::from_json(&ctx.stack_name, &contents)?;

        // Values resolved for this run override what create recorded.
        let mut bindings = load_bindings(&output)?;
        bindings.extend(&ctx.bindings);
        ctx.bindings = bindings;
        let parameters: BTreeMap<String, String> = ctx
            .bindings
            .literal_parameters()
            .into_iter()
            .filter(|(name, _)| parent.has_parameter(name))
            .collect();
        debug!(parameters = ?parameters.keys().collect::<Vec<_>>(), "Stack parameters");

        let mut request = StackRequest::new(&ctx.stack_name).with_parameters(parameters);
        if settings.upload {
            let composer = ComposerSettings::from_config(&ctx.config)?;
            let timestamp = composer.include_timestamp.then(|| Utc::now().timestamp());
            let key = object_key(&composer.prefix, &composer.environment_name, timestamp);
            let url = TemplatePublisher::new(self.provider.clone(), settings)
                .upload_written(&key)
                .await?;
            request = request.with_template_url(url);
        } else {
            request = request.with_template_body(contents);
        }

        let subscription = if ctx.monitor_enabled() {
            let subscription = self.events.open_channel(&channel_name(&ctx.stack_name)).await?;
            request = request.with_notification_arn(subscription.topic_arn.clone());
            Some(subscription)
        } else {
            None
        };

        let submitted = self.submit(&request).await;
        let (stack_id, no_updates) = match submitted {
            Ok(result) => result,
            Err(e) => {
                if let Some(subscription) = &subscription {
                    self.close_channel(subscription).await;
                }
                return Err(e);
            }
        };
        ctx.stack_id = Some(stack_id.clone());

        let mut monitor = None;
        if let Some(subscription) = &subscription {
            let watched = if no_updates {
                Ok(None)
            } else {
                StackMonitor::from_config(&ctx.config)
                    .watch(self.events.as_ref(), subscription, self.hooks.as_ref(), &ctx)
                    .await
                    .map(Some)
            };
            self.close_channel(subscription).await;
            monitor = watched?;
        }

        if let Some(MonitorOutcome {
            termination: Termination::StackFailed { status, reason },
            ..
        }) = &monitor
        {
            return Err(CoreError::StackFailed {
                stack: ctx.stack_name.clone(),
                status: status.clone(),
                reason: reason.clone(),
            });
        }

        self.hooks.post_deploy(&mut ctx).await?;

        info!(stack = %ctx.stack_name, stack_id = %stack_id, no_updates, "Deploy complete");
        Ok(ActionOutcome::Deployed {
            stack_name: ctx.stack_name,
            stack_id,
            no_updates,
            monitor,
        })
    }

    /// Create the stack, or update it when it already exists.
    async fn submit(&self, request: &StackRequest) -> CoreResult<(String, bool)> {
        match self.provider.describe_stack(&request.stack_name).await? {
            None => {
                info!(stack = %request.stack_name, "Creating stack");
                Ok((self.provider.create_stack(request).await?, false))
            }
            Some(existing) => {
                info!(stack = %request.stack_name, status = %existing.status, "Updating stack");
                match self.provider.update_stack(request).await {
                    Ok(stack_id) => Ok((stack_id, false)),
                    Err(ProviderError::NoUpdates(_)) => {
                        info!(stack = %request.stack_name, "No updates to perform");
                        Ok((existing.stack_id, true))
                    }
                    Err(e) => Err(e.into()),
                }
            }
        }
    }

    async fn close_channel(&self, subscription: &envbase_provider::EventSubscription) {
        if let Err(e) = self.events.close_channel(subscription).await {
            warn!(channel = %subscription.name, "Failed to remove event channel: {}", e);
        }
    }

    async fn delete(&self, resolved: ResolvedConfig) -> CoreResult<ActionOutcome> {
        let mut ctx = EnvironmentContext::from_resolved(resolved);
        self.hooks.pre_delete(&mut ctx).await?;

        info!(stack = %ctx.stack_name, "Deleting stack");
        self.provider.delete_stack(&ctx.stack_name).await?;

        self.hooks.post_delete(&mut ctx).await?;
        Ok(ActionOutcome::Deleted {
            stack_name: ctx.stack_name,
        })
    }
}
