//! The pattern extension point.
//!
//! A pattern contributes configuration defaults through [`ConfigHandler`] and,
//! during composition, adds resources to the parent template and/or registers
//! child templates in its [`CompositionContext`].

use envbase_config::{AmiCache, ConfigHandler, ConfigTree};
use envbase_network::NetworkLayout;

use crate::document::Template;
use crate::error::TemplateResult;

/// A reusable piece of infrastructure.
pub trait Pattern: ConfigHandler + Send + Sync {
    /// Name used in `template.patterns` and as the child template name.
    fn name(&self) -> &str;

    /// Patterns that must appear earlier in the pattern list.
    fn requires(&self) -> Vec<String> {
        Vec::new()
    }

    /// Add this pattern's resources.
    fn create(&self, ctx: &mut CompositionContext<'_>) -> TemplateResult<()>;
}

/// A child template registered by a pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildSpec {
    pub template: Template,
    /// Mirror the child's outputs as parent outputs.
    pub propagate_outputs: bool,
}

/// What a pattern sees while it runs.
pub struct CompositionContext<'a> {
    pub config: &'a ConfigTree,
    pub layout: &'a NetworkLayout,
    pub ami_cache: &'a AmiCache,
    parent: &'a mut Template,
    children: Vec<ChildSpec>,
}

impl<'a> CompositionContext<'a> {
    pub fn new(
        config: &'a ConfigTree,
        layout: &'a NetworkLayout,
        ami_cache: &'a AmiCache,
        parent: &'a mut Template,
    ) -> Self {
        Self {
            config,
            layout,
            ami_cache,
            parent,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> &Template {
        self.parent
    }

    pub fn parent_mut(&mut self) -> &mut Template {
        self.parent
    }

    pub fn add_child(&mut self, template: Template) {
        self.children.push(ChildSpec {
            template,
            propagate_outputs: false,
        });
    }

    pub fn add_child_with_outputs(&mut self, template: Template) {
        self.children.push(ChildSpec {
            template,
            propagate_outputs: true,
        });
    }

    pub fn children(&self) -> &[ChildSpec] {
        &self.children
    }

    pub fn into_children(self) -> Vec<ChildSpec> {
        self.children
    }
}
