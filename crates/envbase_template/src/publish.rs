//! Writing composed templates to disk and uploading them to the object store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use envbase_config::{ConfigTree, ParameterBindings};
use envbase_provider::CloudProvider;
use serde_json::Value;
use tracing::{debug, info};

use crate::composer::{object_url, ComposedTemplates, STACK_RESOURCE_TYPE};
use crate::document::Template;
use crate::error::{TemplateError, TemplateResult};

/// `<output>.params.json`
pub fn bindings_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".params.json");
    PathBuf::from(name)
}

/// `<dir of output>/<name>.template`
pub fn child_path(output: &Path, name: &str) -> PathBuf {
    let dir = output.parent().unwrap_or_else(|| Path::new(""));
    dir.join(format!("{}.template", name))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublishSettings {
    pub output_path: PathBuf,
    pub upload: bool,
    pub bucket: String,
}

impl PublishSettings {
    pub fn from_config(config: &ConfigTree) -> TemplateResult<Self> {
        let output = config
            .get_non_empty("global", "output")
            .ok_or_else(|| TemplateError::MissingSetting("global.output".to_string()))?;
        Ok(Self {
            output_path: PathBuf::from(output),
            upload: config.get_bool("template", "upload_templates").unwrap_or(true),
            bucket: config
                .get_str("template", "s3_bucket")
                .unwrap_or_default()
                .to_string(),
        })
    }

    pub fn with_output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn with_upload(mut self, upload: bool) -> Self {
        self.upload = upload;
        self
    }
}

/// Files written and objects uploaded by a publish.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishReport {
    pub parent_path: PathBuf,
    pub child_paths: Vec<PathBuf>,
    pub bindings_path: PathBuf,
    /// URLs of uploaded objects, children first.
    pub uploaded: Vec<String>,
}

pub struct TemplatePublisher {
    provider: Arc<dyn CloudProvider>,
    settings: PublishSettings,
}

impl TemplatePublisher {
    pub fn new(provider: Arc<dyn CloudProvider>, settings: PublishSettings) -> Self {
        Self { provider, settings }
    }

    pub fn settings(&self) -> &PublishSettings {
        &self.settings
    }

    /// Write the parent, children and bindings next to each other.
    pub fn write(&self, composed: &ComposedTemplates) -> TemplateResult<PublishReport> {
        let output = &self.settings.output_path;
        if let Some(dir) = output.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let mut child_paths = Vec::new();
        for child in &composed.children {
            let path = child_path(output, child.template.name());
            fs::write(&path, child.template.to_published_json(composed.generated_at)?)?;
            debug!(path = ?path, "Wrote child template");
            child_paths.push(path);
        }

        fs::write(output, composed.parent.to_published_json(composed.generated_at)?)?;

        let params = bindings_path(output);
        composed.bindings.save(&params)?;

        info!(path = ?output, children = child_paths.len(), "Templates written");
        Ok(PublishReport {
            parent_path: output.clone(),
            child_paths,
            bindings_path: params,
            uploaded: Vec::new(),
        })
    }

    /// Write, then upload everything when uploads are enabled.
    pub async fn publish(&self, composed: &ComposedTemplates) -> TemplateResult<PublishReport> {
        let mut report = self.write(composed)?;
        if !self.settings.upload {
            info!("Template upload disabled");
            return Ok(report);
        }

        for (child, path) in composed.children.iter().zip(&report.child_paths) {
            let url = self.upload_file(path, &child.object_key).await?;
            report.uploaded.push(url);
        }
        let url = self.upload_file(&report.parent_path, &composed.parent_key).await?;
        report.uploaded.push(url);

        info!(objects = report.uploaded.len(), bucket = %self.settings.bucket, "Templates uploaded");
        Ok(report)
    }

    /// Upload a previously written parent under `parent_key`, along with
    /// every child it references that exists next to it on disk.
    pub async fn upload_written(&self, parent_key: &str) -> TemplateResult<String> {
        let output = &self.settings.output_path;
        let contents = fs::read_to_string(output)?;
        let parent = Template::from_json("parent", &contents)?;
        let url_prefix = object_url(&self.settings.bucket, "");

        for (name, resource) in parent.resources_of_type(STACK_RESOURCE_TYPE) {
            let Some(url) = resource.properties.get("TemplateURL").and_then(Value::as_str) else {
                continue;
            };
            let Some(key) = url.strip_prefix(&url_prefix) else {
                debug!(resource = name, url, "Child template hosted elsewhere");
                continue;
            };
            let child_name = name.strip_suffix("Stack").unwrap_or(name);
            let path = child_path(output, child_name);
            if path.exists() {
                self.upload_file(&path, key).await?;
            }
        }

        self.upload_file(output, parent_key).await
    }

    async fn upload_file(&self, path: &Path, key: &str) -> TemplateResult<String> {
        let body = fs::read(path)?;
        let url = self
            .provider
            .put_object(&self.settings.bucket, key, body)
            .await?;
        debug!(key, url = %url, "Uploaded template");
        Ok(url)
    }
}

/// Read the bindings written next to `output`, if any.
pub fn load_bindings(output: &Path) -> TemplateResult<ParameterBindings> {
    let path = bindings_path(output);
    if !path.exists() {
        return Ok(ParameterBindings::new());
    }
    Ok(ParameterBindings::load(&path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sidecar_paths() {
        let output = Path::new("out/env.template");
        assert_eq!(bindings_path(output), PathBuf::from("out/env.template.params.json"));
        assert_eq!(child_path(output, "Bastion"), PathBuf::from("out/Bastion.template"));
        assert_eq!(
            child_path(Path::new("env.template"), "Bastion"),
            PathBuf::from("Bastion.template")
        );
    }
}
