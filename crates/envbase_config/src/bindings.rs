//! Deploy parameter bindings.
//!
//! Bindings carry values from configuration and from earlier child stacks'
//! outputs into later consumers. Literal bindings come from configuration and
//! always win over stack output bindings with the same name.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ConfigResult;

/// A single named binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Binding {
    /// A literal value supplied by configuration.
    Value { value: Value },
    /// An output of a previously composed child stack.
    StackOutput { stack: String, output: String },
}

impl Binding {
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Value {
            value: value.into(),
        }
    }

    pub fn stack_output(stack: impl Into<String>, output: impl Into<String>) -> Self {
        Self::StackOutput {
            stack: stack.into(),
            output: output.into(),
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Value { .. })
    }
}

/// Ordered map of parameter name to binding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterBindings {
    entries: BTreeMap<String, Binding>,
}

impl ParameterBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a literal binding, replacing anything already bound to `name`.
    pub fn bind_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.entries.insert(name.into(), Binding::literal(value));
    }

    /// Register a child stack output. Existing literal bindings are kept.
    ///
    /// Returns `false` when a literal binding shadowed the output.
    pub fn bind_output(
        &mut self,
        name: impl Into<String>,
        stack: impl Into<String>,
        output: impl Into<String>,
    ) -> bool {
        let name = name.into();
        if self.entries.get(&name).is_some_and(Binding::is_literal) {
            return false;
        }
        self.entries
            .insert(name, Binding::stack_output(stack, output));
        true
    }

    pub fn get(&self, name: &str) -> Option<&Binding> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Literal bindings rendered as provider stack parameter strings.
    pub fn literal_parameters(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .filter_map(|(name, binding)| match binding {
                Binding::Value { value } => Some((name.clone(), value_to_parameter(value))),
                Binding::StackOutput { .. } => None,
            })
            .collect()
    }

    /// Fold `other` into this set with the same precedence rules as the
    /// individual bind calls.
    pub fn extend(&mut self, other: &ParameterBindings) {
        for (name, binding) in &other.entries {
            match binding {
                Binding::Value { value } => self.bind_value(name.clone(), value.clone()),
                Binding::StackOutput { stack, output } => {
                    self.bind_output(name.clone(), stack.clone(), output.clone());
                }
            }
        }
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Stack parameters are always strings; lists become comma separated.
fn value_to_parameter(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(value_to_parameter)
            .collect::<Vec<_>>()
            .join(","),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literal_shadows_output() {
        let mut bindings = ParameterBindings::new();
        bindings.bind_value("vpcId", "vpc-123");

        assert!(!bindings.bind_output("vpcId", "BaseNetworkStack", "vpcId"));
        assert_eq!(bindings.get("vpcId"), Some(&Binding::literal("vpc-123")));
    }

    #[test]
    fn test_literal_parameters_skip_outputs() {
        let mut bindings = ParameterBindings::new();
        bindings.bind_value("ec2Key", "ops-key");
        bindings.bind_value("zones", json!(["a", "b"]));
        bindings.bind_output("vpcId", "BaseNetworkStack", "vpcId");

        let params = bindings.literal_parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params["ec2Key"], "ops-key");
        assert_eq!(params["zones"], "a,b");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");

        let mut bindings = ParameterBindings::new();
        bindings.bind_value("ec2Key", "ops-key");
        bindings.bind_output("vpcId", "BaseNetworkStack", "vpcId");
        bindings.save(&path).unwrap();

        assert_eq!(ParameterBindings::load(&path).unwrap(), bindings);
    }
}
