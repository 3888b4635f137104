//! Template document model.
//!
//! A [`Template`] holds parameters, mappings, resources and outputs keyed by
//! logical id. Every section is a sorted map, so serialization is
//! deterministic and two compositions of the same inputs produce identical
//! documents.
//!
//! Published documents carry two extra outputs: `dateGenerated` and
//! `templateValidationHash`, the SHA-256 of the compact document without the
//! hash output. [`validate_template_contents`] recomputes it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{TemplateError, TemplateResult};
use crate::intrinsic;

pub const FORMAT_VERSION: &str = "2010-09-09";
pub const DATE_GENERATED_OUTPUT: &str = "dateGenerated";
pub const VALIDATION_HASH_OUTPUT: &str = "templateValidationHash";

/// A template parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Parameter {
    #[serde(rename = "Type")]
    pub param_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint_description: Option<String>,
}

impl Parameter {
    pub fn of_type(param_type: impl Into<String>) -> Self {
        Self {
            param_type: param_type.into(),
            description: None,
            default: None,
            allowed_pattern: None,
            allowed_values: Vec::new(),
            min_length: None,
            max_length: None,
            constraint_description: None,
        }
    }

    pub fn string() -> Self {
        Self::of_type("String")
    }

    pub fn key_pair() -> Self {
        Self::of_type("AWS::EC2::KeyPair::KeyName")
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_allowed_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.allowed_pattern = Some(pattern.into());
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = values;
        self
    }

    pub fn with_length(mut self, min: u32, max: u32) -> Self {
        self.min_length = Some(min);
        self.max_length = Some(max);
        self
    }

    pub fn with_constraint_description(mut self, description: impl Into<String>) -> Self {
        self.constraint_description = Some(description.into());
        self
    }
}

/// A resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(rename = "Properties", default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,
    #[serde(rename = "DependsOn", default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl Resource {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            properties: Map::new(),
            depends_on: Vec::new(),
        }
    }

    pub fn property(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(name.to_string(), value.into());
        self
    }

    pub fn depends_on(mut self, logical_id: impl Into<String>) -> Self {
        let logical_id = logical_id.into();
        if !self.depends_on.contains(&logical_id) {
            self.depends_on.push(logical_id);
        }
        self
    }
}

/// A template output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Output {
    pub value: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Output {
    pub fn new(value: impl Into<Value>) -> Self {
        Self {
            value: value.into(),
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A named template document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Template {
    name: String,
    description: Option<String>,
    parameters: BTreeMap<String, Parameter>,
    mappings: BTreeMap<String, Value>,
    resources: BTreeMap<String, Resource>,
    outputs: BTreeMap<String, Output>,
}

impl Template {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = Some(description.into());
    }

    fn duplicate(&self, id: &str) -> TemplateError {
        TemplateError::DuplicateLogicalId {
            template: self.name.clone(),
            id: id.to_string(),
        }
    }

    /// Add a parameter and return a `Ref` to it.
    ///
    /// Re-adding an identical parameter is allowed.
    pub fn add_parameter(&mut self, name: &str, parameter: Parameter) -> TemplateResult<Value> {
        if self.resources.contains_key(name) {
            return Err(self.duplicate(name));
        }
        match self.parameters.get(name) {
            Some(existing) if existing != &parameter => return Err(self.duplicate(name)),
            Some(_) => {}
            None => {
                self.parameters.insert(name.to_string(), parameter);
            }
        }
        Ok(intrinsic::reference(name))
    }

    /// Add a resource and return a `Ref` to it.
    pub fn add_resource(&mut self, name: &str, resource: Resource) -> TemplateResult<Value> {
        if self.resources.contains_key(name) || self.parameters.contains_key(name) {
            return Err(self.duplicate(name));
        }
        self.resources.insert(name.to_string(), resource);
        Ok(intrinsic::reference(name))
    }

    pub fn add_mapping(&mut self, name: &str, mapping: Value) -> TemplateResult<()> {
        match self.mappings.get(name) {
            Some(existing) if existing != &mapping => Err(self.duplicate(name)),
            _ => {
                self.mappings.insert(name.to_string(), mapping);
                Ok(())
            }
        }
    }

    pub fn add_output(&mut self, name: &str, output: Output) -> TemplateResult<()> {
        if self.outputs.contains_key(name) {
            return Err(self.duplicate(name));
        }
        self.outputs.insert(name.to_string(), output);
        Ok(())
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.get(name)
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, &Parameter)> {
        self.parameters.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_parameter(&self, name: &str) -> bool {
        self.parameters.contains_key(name)
    }

    pub fn resource(&self, name: &str) -> Option<&Resource> {
        self.resources.get(name)
    }

    pub fn resources(&self) -> impl Iterator<Item = (&str, &Resource)> {
        self.resources.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resources.contains_key(name)
    }

    pub fn mapping(&self, name: &str) -> Option<&Value> {
        self.mappings.get(name)
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.keys().map(|k| k.as_str())
    }

    /// Resources of a given type, e.g. `AWS::EC2::Subnet`.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Resource)> {
        self.resources()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    /// Fold another template's sections into this one.
    pub fn merge(&mut self, other: Template) -> TemplateResult<()> {
        for (name, parameter) in other.parameters {
            self.add_parameter(&name, parameter)?;
        }
        for (name, mapping) in other.mappings {
            self.add_mapping(&name, mapping)?;
        }
        for (name, resource) in other.resources {
            self.add_resource(&name, resource)?;
        }
        for (name, output) in other.outputs {
            self.add_output(&name, output)?;
        }
        Ok(())
    }

    /// The document as a JSON value.
    pub fn to_value(&self) -> Value {
        let mut doc = Map::new();
        doc.insert(
            "AWSTemplateFormatVersion".to_string(),
            Value::String(FORMAT_VERSION.to_string()),
        );
        if let Some(description) = &self.description {
            doc.insert("Description".to_string(), Value::String(description.clone()));
        }
        if !self.parameters.is_empty() {
            doc.insert("Parameters".to_string(), to_json_map(&self.parameters));
        }
        if !self.mappings.is_empty() {
            doc.insert("Mappings".to_string(), to_json_map(&self.mappings));
        }
        doc.insert("Resources".to_string(), to_json_map(&self.resources));
        if !self.outputs.is_empty() {
            doc.insert("Outputs".to_string(), to_json_map(&self.outputs));
        }
        Value::Object(doc)
    }

    pub fn to_json(&self) -> TemplateResult<String> {
        Ok(serde_json::to_string_pretty(&self.to_value())?)
    }

    /// Serialize for publishing, adding the generation date and validation hash.
    pub fn to_published_json(&self, generated_at: DateTime<Utc>) -> TemplateResult<String> {
        let mut published = self.clone();
        published.outputs.remove(VALIDATION_HASH_OUTPUT);
        published.outputs.insert(
            DATE_GENERATED_OUTPUT.to_string(),
            Output::new(generated_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        );

        let mut value = published.to_value();
        let hash = compute_validation_hash(&value)?;
        if let Some(outputs) = value.get_mut("Outputs").and_then(Value::as_object_mut) {
            outputs.insert(
                VALIDATION_HASH_OUTPUT.to_string(),
                serde_json::to_value(Output::new(hash))?,
            );
        }

        Ok(serde_json::to_string_pretty(&value)?)
    }

    /// Parse a document back into a template named `name`.
    pub fn from_json(name: impl Into<String>, contents: &str) -> TemplateResult<Self> {
        let value: Value = serde_json::from_str(contents)?;
        let Value::Object(doc) = value else {
            return Err(TemplateError::InvalidTemplate(
                "template root must be an object".to_string(),
            ));
        };

        let mut template = Template::new(name);
        template.description = doc
            .get("Description")
            .and_then(Value::as_str)
            .map(str::to_string);
        template.parameters = section(&doc, "Parameters")?;
        template.mappings = section(&doc, "Mappings")?;
        template.resources = section(&doc, "Resources")?;
        template.outputs = section(&doc, "Outputs")?;
        Ok(template)
    }
}

fn to_json_map<T: Serialize>(entries: &BTreeMap<String, T>) -> Value {
    Value::Object(
        entries
            .iter()
            .filter_map(|(k, v)| serde_json::to_value(v).ok().map(|v| (k.clone(), v)))
            .collect(),
    )
}

fn section<T: serde::de::DeserializeOwned>(
    doc: &Map<String, Value>,
    name: &str,
) -> TemplateResult<BTreeMap<String, T>> {
    match doc.get(name) {
        Some(value) => Ok(serde_json::from_value(value.clone())?),
        None => Ok(BTreeMap::new()),
    }
}

/// SHA-256 (hex) of the compact document with the hash output removed.
pub fn compute_validation_hash(document: &Value) -> TemplateResult<String> {
    let mut stripped = document.clone();
    if let Some(outputs) = stripped.get_mut("Outputs").and_then(Value::as_object_mut) {
        outputs.remove(VALIDATION_HASH_OUTPUT);
    }
    let compact = serde_json::to_string(&stripped)?;
    let digest = Sha256::digest(compact.as_bytes());
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

/// Check a published document against its embedded validation hash.
pub fn validate_template_contents(contents: &str) -> TemplateResult<()> {
    let document: Value = serde_json::from_str(contents)?;
    let expected = document
        .get("Outputs")
        .and_then(|o| o.get(VALIDATION_HASH_OUTPUT))
        .and_then(|o| o.get("Value"))
        .and_then(Value::as_str)
        .ok_or(TemplateError::MissingValidationHash)?
        .to_string();

    let actual = compute_validation_hash(&document)?;
    if actual != expected {
        return Err(TemplateError::ValidationHashMismatch { expected, actual });
    }
    Ok(())
}
