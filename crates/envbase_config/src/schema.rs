//! Lightweight schema checks for configuration sections.
//!
//! Patterns declare the keys they read and the type each key must hold.
//! Validation runs against the fully merged tree.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde_json::Value;

use crate::error::{ConfigError, ConfigResult};
use crate::tree::ConfigTree;

/// Type a configuration value must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
    Bool,
    Str,
    List,
    Map,
    Any,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
            Self::Str => "str",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        }
    }

    /// Whether `value` satisfies this type.
    ///
    /// Integers may be written as numeric strings, matching hand-edited files.
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            Self::Int => match value {
                Value::Number(n) => n.is_i64() || n.is_u64(),
                Value::String(s) => s.trim().parse::<i64>().is_ok(),
                _ => false,
            },
            Self::Float => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Str => value.is_string(),
            Self::List => value.is_array(),
            Self::Map => value.is_object(),
            Self::Any => true,
        }
    }
}

impl FromStr for FieldType {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "int" | "integer" => Ok(Self::Int),
            "float" | "number" => Ok(Self::Float),
            "bool" | "boolean" => Ok(Self::Bool),
            "str" | "string" | "basestring" => Ok(Self::Str),
            "list" | "array" => Ok(Self::List),
            "map" | "dict" | "object" => Ok(Self::Map),
            "any" => Ok(Self::Any),
            other => Err(ConfigError::UnknownSchemaType(other.to_string())),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Section -> key -> expected type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigSchema {
    sections: BTreeMap<String, BTreeMap<String, FieldType>>,
}

impl ConfigSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a key.
    pub fn field(mut self, section: &str, key: &str, field_type: FieldType) -> Self {
        self.sections
            .entry(section.to_string())
            .or_default()
            .insert(key.to_string(), field_type);
        self
    }

    /// Fold another schema into this one. Later declarations win.
    pub fn extend(&mut self, other: &ConfigSchema) {
        for (section, fields) in &other.sections {
            let target = self.sections.entry(section.clone()).or_default();
            for (key, field_type) in fields {
                target.insert(key.clone(), *field_type);
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str, FieldType)> {
        self.sections.iter().flat_map(|(section, fields)| {
            fields
                .iter()
                .map(move |(key, t)| (section.as_str(), key.as_str(), *t))
        })
    }

    /// Check every declared key against the tree.
    pub fn validate(&self, tree: &ConfigTree) -> ConfigResult<()> {
        for (section, fields) in &self.sections {
            let values = tree
                .section(section)
                .ok_or_else(|| ConfigError::MissingSection(section.clone()))?;

            for (key, field_type) in fields {
                let value = values.get(key).ok_or_else(|| ConfigError::MissingKey {
                    section: section.clone(),
                    key: key.clone(),
                })?;

                if !field_type.accepts(value) {
                    return Err(ConfigError::InvalidType {
                        section: section.clone(),
                        key: key.clone(),
                        expected: field_type.to_string(),
                        found: value_kind(value).to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
