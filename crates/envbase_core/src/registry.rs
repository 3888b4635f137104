//! Pattern registry.

use std::sync::Arc;

use envbase_config::ConfigTree;
use envbase_template::{patterns, Pattern, TemplateError};
use serde_json::Value;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Ordered set of known patterns, looked up by name.
#[derive(Default, Clone)]
pub struct PatternRegistry {
    patterns: Vec<Arc<dyn Pattern>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in pattern.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for pattern in patterns::builtin() {
            registry.register(pattern);
        }
        registry
    }

    /// Register a pattern, replacing any pattern with the same name.
    pub fn register(&mut self, pattern: Arc<dyn Pattern>) {
        debug!("Registering pattern: {}", pattern.name());
        match self.patterns.iter().position(|p| p.name() == pattern.name()) {
            Some(index) => self.patterns[index] = pattern,
            None => self.patterns.push(pattern),
        }
    }

    pub fn with_pattern(mut self, pattern: Arc<dyn Pattern>) -> Self {
        self.register(pattern);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Pattern>> {
        self.patterns.iter().find(|p| p.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| p.name() == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.patterns.iter().map(|p| p.name()).collect()
    }

    pub fn all(&self) -> &[Arc<dyn Pattern>] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Look up `names` in order.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> CoreResult<Vec<Arc<dyn Pattern>>> {
        names
            .iter()
            .map(|name| {
                self.get(name.as_ref())
                    .ok_or_else(|| {
                        CoreError::from(TemplateError::UnknownPattern(name.as_ref().to_string()))
                    })
            })
            .collect()
    }

    /// Patterns named by `template.patterns`.
    pub fn configured(&self, config: &ConfigTree) -> CoreResult<Vec<Arc<dyn Pattern>>> {
        let names: Vec<String> = match config.get("template", "patterns") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(list)) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        };
        self.resolve(&names)
    }
}

impl std::fmt::Debug for PatternRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternRegistry")
            .field("patterns", &self.names())
            .finish()
    }
}
