//! Parent/child template composition.
//!
//! Patterns run in configured order. Each child template a pattern registers
//! becomes an `AWS::CloudFormation::Stack` resource `<Name>Stack` in the
//! parent; its parameters are linked by [`ParameterLinker`] and its outputs
//! become bindings for the patterns that follow.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use envbase_config::{AmiCache, ConfigTree, ParameterBindings};
use envbase_network::NetworkLayout;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::document::{Output, Parameter, Resource, Template};
use crate::error::{TemplateError, TemplateResult};
use crate::intrinsic;
use crate::linker::ParameterLinker;
use crate::pattern::{ChildSpec, CompositionContext, Pattern};

pub const REGION_MAP: &str = "RegionMap";
pub const EC2_KEY_PARAMETER: &str = "ec2Key";
pub const REMOTE_ACCESS_PARAMETER: &str = "remoteAccessLocation";
pub const STACK_RESOURCE_TYPE: &str = "AWS::CloudFormation::Stack";

const CIDR_PATTERN: &str = r"(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})/(\d{1,2})";

/// Settings read from the `global` and `template` sections.
#[derive(Debug, Clone, PartialEq)]
pub struct ComposerSettings {
    pub environment_name: String,
    pub description: String,
    pub ec2_key_default: String,
    pub bucket: String,
    pub prefix: String,
    pub include_timestamp: bool,
    pub timeout_in_minutes: u64,
}

impl ComposerSettings {
    pub fn from_config(config: &ConfigTree) -> TemplateResult<Self> {
        let bucket = config
            .get_non_empty("template", "s3_bucket")
            .ok_or_else(|| TemplateError::MissingSetting("template.s3_bucket".to_string()))?;

        Ok(Self {
            environment_name: config
                .get_non_empty("global", "environment_name")
                .unwrap_or("environmentbase")
                .to_string(),
            description: config
                .get_str("template", "description")
                .unwrap_or_default()
                .to_string(),
            ec2_key_default: config
                .get_str("template", "ec2_key_default")
                .unwrap_or_default()
                .to_string(),
            bucket: bucket.to_string(),
            prefix: config
                .get_str("template", "s3_prefix")
                .unwrap_or_default()
                .trim_matches('/')
                .to_string(),
            include_timestamp: config
                .get_bool("template", "include_timestamp")
                .unwrap_or(true),
            timeout_in_minutes: config
                .get_u64("template", "timeout_in_minutes")
                .unwrap_or(60),
        })
    }
}

/// A composed child template and where it will be published.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildTemplate {
    pub pattern: String,
    pub template: Template,
    pub stack_resource: String,
    pub object_key: String,
    pub url: String,
}

/// Output of [`TemplateComposer::compose`].
#[derive(Debug, Clone)]
pub struct ComposedTemplates {
    pub parent: Template,
    pub parent_key: String,
    pub parent_url: String,
    pub children: Vec<ChildTemplate>,
    pub bindings: ParameterBindings,
    pub generated_at: DateTime<Utc>,
    pub timestamp: Option<i64>,
}

impl ComposedTemplates {
    pub fn child(&self, name: &str) -> Option<&ChildTemplate> {
        self.children.iter().find(|c| c.template.name() == name)
    }
}

/// `<prefix>/<name>[.<timestamp>].template`
pub fn object_key(prefix: &str, name: &str, timestamp: Option<i64>) -> String {
    let file = match timestamp {
        Some(ts) => format!("{}.{}.template", name, ts),
        None => format!("{}.template", name),
    };
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        file
    } else {
        format!("{}/{}", prefix, file)
    }
}

pub fn object_url(bucket: &str, key: &str) -> String {
    format!("https://{}.s3.amazonaws.com/{}", bucket, key)
}

/// Reject duplicate names and `requires` entries that are not listed earlier.
pub fn check_pattern_order(patterns: &[Arc<dyn Pattern>]) -> TemplateResult<()> {
    let mut seen: HashSet<&str> = HashSet::new();
    for pattern in patterns {
        for required in pattern.requires() {
            if !seen.contains(required.as_str()) {
                return Err(TemplateError::ForwardReference {
                    pattern: pattern.name().to_string(),
                    requires: required,
                });
            }
        }
        if !seen.insert(pattern.name()) {
            return Err(TemplateError::DuplicatePattern(pattern.name().to_string()));
        }
    }
    Ok(())
}

/// Composes patterns into a parent template and its children.
pub struct TemplateComposer {
    settings: ComposerSettings,
    generated_at: DateTime<Utc>,
}

impl TemplateComposer {
    pub fn new(settings: ComposerSettings) -> Self {
        Self {
            settings,
            generated_at: Utc::now(),
        }
    }

    /// Fix the generation time, and with it the object key timestamp.
    pub fn with_generated_at(mut self, generated_at: DateTime<Utc>) -> Self {
        self.generated_at = generated_at;
        self
    }

    pub fn settings(&self) -> &ComposerSettings {
        &self.settings
    }

    fn timestamp(&self) -> Option<i64> {
        self.settings
            .include_timestamp
            .then(|| self.generated_at.timestamp())
    }

    pub fn compose(
        &self,
        config: &ConfigTree,
        layout: &NetworkLayout,
        ami_cache: &AmiCache,
        patterns: &[Arc<dyn Pattern>],
        bindings: &ParameterBindings,
    ) -> TemplateResult<ComposedTemplates> {
        check_pattern_order(patterns)?;

        let timestamp = self.timestamp();
        let mut parent = Template::new(&self.settings.environment_name);
        if !self.settings.description.is_empty() {
            parent.set_description(&self.settings.description);
        }
        self.add_common_parameters(&mut parent)?;
        if ami_cache.regions().next().is_some() {
            parent.add_mapping(REGION_MAP, ami_cache.to_mapping())?;
        }

        let mut bindings = bindings.clone();
        let mut children = Vec::new();

        for pattern in patterns {
            info!(pattern = pattern.name(), "Composing pattern");
            let mut ctx = CompositionContext::new(config, layout, ami_cache, &mut parent);
            pattern.create(&mut ctx)?;
            let specs = ctx.into_children();

            for spec in specs {
                let child = self.attach_child(&mut parent, &mut bindings, layout, spec, timestamp)?;
                debug!(
                    pattern = pattern.name(),
                    child = child.template.name(),
                    key = %child.object_key,
                    "Attached child template"
                );
                children.push(ChildTemplate {
                    pattern: pattern.name().to_string(),
                    ..child
                });
            }
        }

        let parent_key = object_key(
            &self.settings.prefix,
            &self.settings.environment_name,
            timestamp,
        );
        let parent_url = object_url(&self.settings.bucket, &parent_key);

        info!(
            children = children.len(),
            bindings = bindings.len(),
            "Composition complete"
        );

        Ok(ComposedTemplates {
            parent,
            parent_key,
            parent_url,
            children,
            bindings,
            generated_at: self.generated_at,
            timestamp,
        })
    }

    fn add_common_parameters(&self, parent: &mut Template) -> TemplateResult<()> {
        let mut ec2_key = Parameter::key_pair()
            .with_description("Name of an existing EC2 key pair for SSH access")
            .with_length(1, 255);
        if !self.settings.ec2_key_default.is_empty() {
            ec2_key = ec2_key.with_default(self.settings.ec2_key_default.clone());
        }
        parent.add_parameter(EC2_KEY_PARAMETER, ec2_key)?;

        parent.add_parameter(
            REMOTE_ACCESS_PARAMETER,
            Parameter::string()
                .with_description("CIDR block allowed to reach remote access endpoints")
                .with_default("0.0.0.0/0")
                .with_length(9, 18)
                .with_allowed_pattern(CIDR_PATTERN)
                .with_constraint_description("must be a valid CIDR range of the form x.x.x.x/x"),
        )?;
        Ok(())
    }

    fn attach_child(
        &self,
        parent: &mut Template,
        bindings: &mut ParameterBindings,
        layout: &NetworkLayout,
        spec: ChildSpec,
        timestamp: Option<i64>,
    ) -> TemplateResult<ChildTemplate> {
        let ChildSpec {
            template,
            propagate_outputs,
        } = spec;
        let stack_resource = format!("{}Stack", template.name());
        let key = object_key(&self.settings.prefix, template.name(), timestamp);
        let url = object_url(&self.settings.bucket, &key);

        let mut links = Vec::new();
        {
            let linker = ParameterLinker::new(parent, layout, bindings);
            for (name, definition) in template.parameters() {
                links.push((name.to_string(), definition.clone(), linker.link(name)));
            }
        }

        let mut parameters = Map::new();
        let mut depends_on = Vec::new();
        for (name, definition, link) in links {
            let value = match link {
                Some(link) => {
                    if let Some(stack) = link.depends_on {
                        depends_on.push(stack);
                    }
                    link.value
                }
                None => {
                    debug!(parameter = %name, child = template.name(), "Promoting parameter to parent");
                    parent.add_parameter(&name, definition)?
                }
            };
            parameters.insert(name, value);
        }

        let mut resource = Resource::new(STACK_RESOURCE_TYPE)
            .property("TemplateURL", url.clone())
            .property("Parameters", Value::Object(parameters))
            .property("TimeoutInMinutes", json!(self.settings.timeout_in_minutes));
        for stack in depends_on {
            resource = resource.depends_on(stack);
        }
        parent.add_resource(&stack_resource, resource)?;

        for output in template.output_names() {
            if !bindings.bind_output(output, &stack_resource, output) {
                debug!(output, "Literal binding shadows child output");
            }
            if propagate_outputs {
                parent.add_output(
                    output,
                    Output::new(intrinsic::stack_output(&stack_resource, output)),
                )?;
            }
        }

        Ok(ChildTemplate {
            pattern: String::new(),
            template,
            stack_resource,
            object_key: key,
            url,
        })
    }
}
