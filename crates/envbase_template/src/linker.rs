//! Binds child template parameters to values available in the parent.

use envbase_config::{Binding, ParameterBindings};
use envbase_network::NetworkLayout;
use serde_json::Value;
use tracing::debug;

use crate::document::Template;
use crate::intrinsic;

const ZONE_PARAMETER_PREFIX: &str = "availabilityZone";

/// Where a linked value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkSource {
    ParentParameter,
    ParentResource,
    Zone,
    Literal,
    StackOutput,
}

/// A resolved child parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub value: Value,
    pub source: LinkSource,
    /// Stack resource the parent must depend on.
    pub depends_on: Option<String>,
}

impl Link {
    fn new(value: Value, source: LinkSource) -> Self {
        Self {
            value,
            source,
            depends_on: None,
        }
    }
}

/// Resolves child parameter names against the parent, layout and bindings.
pub struct ParameterLinker<'a> {
    parent: &'a Template,
    layout: &'a NetworkLayout,
    bindings: &'a ParameterBindings,
}

impl<'a> ParameterLinker<'a> {
    pub fn new(
        parent: &'a Template,
        layout: &'a NetworkLayout,
        bindings: &'a ParameterBindings,
    ) -> Self {
        Self {
            parent,
            layout,
            bindings,
        }
    }

    /// Resolve `name`. `None` means the caller should promote the
    /// child's parameter definition into the parent.
    pub fn link(&self, name: &str) -> Option<Link> {
        if self.parent.has_parameter(name) {
            return Some(Link::new(intrinsic::reference(name), LinkSource::ParentParameter));
        }
        if self.parent.has_resource(name) {
            return Some(Link::new(intrinsic::reference(name), LinkSource::ParentResource));
        }
        if let Some(zone) = self.zone_for(name) {
            return Some(Link::new(Value::String(zone.to_string()), LinkSource::Zone));
        }

        let link = match self.bindings.get(name)? {
            Binding::Value { value } => Link::new(value.clone(), LinkSource::Literal),
            Binding::StackOutput { stack, output } => Link {
                value: intrinsic::stack_output(stack, output),
                source: LinkSource::StackOutput,
                depends_on: Some(stack.clone()),
            },
        };
        debug!(parameter = name, source = ?link.source, "Linked child parameter");
        Some(link)
    }

    fn zone_for(&self, name: &str) -> Option<&str> {
        let index: usize = name.strip_prefix(ZONE_PARAMETER_PREFIX)?.parse().ok()?;
        self.layout.zones.get(index).map(String::as_str)
    }
}
