//! The configuration tree: named sections of key/value settings.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ConfigError, ConfigResult};

/// A configuration document made of named sections.
///
/// Every section is a JSON object. Merging is always key-by-key: a layer that
/// sets `network.az_count` leaves every other key of `network` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigTree {
    sections: Map<String, Value>,
}

impl ConfigTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from a JSON value, rejecting non-object sections.
    pub fn from_value(value: Value) -> ConfigResult<Self> {
        let Value::Object(sections) = value else {
            return Err(ConfigError::InvalidDocument {
                path: Default::default(),
                message: "configuration root must be an object".to_string(),
            });
        };

        for (name, section) in &sections {
            if !section.is_object() {
                return Err(ConfigError::InvalidDocument {
                    path: Default::default(),
                    message: format!("section '{}' must be an object", name),
                });
            }
        }

        Ok(Self { sections })
    }

    /// Parse a JSON document.
    pub fn from_json_str(contents: &str) -> ConfigResult<Self> {
        Self::from_value(serde_json::from_str(contents)?)
    }

    /// Load a tree from disk. Files ending in `.yaml` or `.yml` are parsed as YAML.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let value: Value = if is_yaml {
            serde_yaml::from_str(&contents)?
        } else {
            serde_json::from_str(&contents)?
        };

        Self::from_value(value).map_err(|e| match e {
            ConfigError::InvalidDocument { message, .. } => ConfigError::InvalidDocument {
                path: path.to_path_buf(),
                message,
            },
            other => other,
        })
    }

    /// Write the tree as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    pub fn to_json_pretty(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(&self.sections)?)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.sections.clone())
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.keys().map(|k| k.as_str())
    }

    pub fn has_section(&self, name: &str) -> bool {
        self.sections.contains_key(name)
    }

    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.sections.get(name).and_then(|s| s.as_object())
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&Value> {
        self.section(section).and_then(|s| s.get(key))
    }

    pub fn get_str(&self, section: &str, key: &str) -> Option<&str> {
        self.get(section, key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Option<bool> {
        match self.get(section, key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => parse_bool(s),
            _ => None,
        }
    }

    /// Read an unsigned integer, accepting numeric strings.
    pub fn get_u64(&self, section: &str, key: &str) -> Option<u64> {
        match self.get(section, key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Read a non-empty string, treating blank values as absent.
    pub fn get_non_empty(&self, section: &str, key: &str) -> Option<&str> {
        self.get_str(section, key).filter(|s| !s.trim().is_empty())
    }

    /// Set a single key, creating the section when needed. Returns the old value.
    pub fn set(&mut self, section: &str, key: &str, value: Value) -> Option<Value> {
        let entry = self
            .sections
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(Map::new()));

        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }

        entry
            .as_object_mut()
            .and_then(|s| s.insert(key.to_string(), value))
    }

    /// Merge another tree on top of this one, key by key.
    ///
    /// Returns the `(section, key)` pairs that `other` set.
    pub fn merge(&mut self, other: &ConfigTree) -> Vec<(String, String)> {
        let mut touched = Vec::new();
        for (section, values) in &other.sections {
            if let Some(values) = values.as_object() {
                if values.is_empty() && !self.has_section(section) {
                    self.sections
                        .insert(section.clone(), Value::Object(Map::new()));
                }
                for (key, value) in values {
                    self.set(section, key, value.clone());
                    touched.push((section.clone(), key.clone()));
                }
            }
        }
        touched
    }

    /// Deserialize one section into a typed struct.
    pub fn section_as<T: DeserializeOwned>(&self, name: &str) -> ConfigResult<T> {
        let section = self
            .sections
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::MissingSection(name.to_string()))?;
        Ok(serde_json::from_value(section)?)
    }
}

/// Parse the boolean spellings accepted in environment and CLI overrides.
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
