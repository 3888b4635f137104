//! Region image cache used to build the `RegionMap` template mapping.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ConfigResult;

const DEFAULT_AMI_CACHE: &str = include_str!("../data/ami_cache.json");

/// Region -> image name -> image id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AmiCache {
    regions: BTreeMap<String, BTreeMap<String, String>>,
}

impl AmiCache {
    /// The cache shipped with the crate.
    pub fn builtin() -> ConfigResult<Self> {
        Ok(serde_json::from_str(DEFAULT_AMI_CACHE)?)
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Read `path` when it exists, otherwise fall back to the built-in cache.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!("AMI cache {:?} not found, using built-in cache", path);
            Self::builtin()
        }
    }

    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn with_image(
        mut self,
        region: impl Into<String>,
        name: impl Into<String>,
        image_id: impl Into<String>,
    ) -> Self {
        self.regions
            .entry(region.into())
            .or_default()
            .insert(name.into(), image_id.into());
        self
    }

    pub fn image(&self, region: &str, name: &str) -> Option<&str> {
        self.regions
            .get(region)
            .and_then(|images| images.get(name))
            .map(|s| s.as_str())
    }

    pub fn regions(&self) -> impl Iterator<Item = &str> {
        self.regions.keys().map(|k| k.as_str())
    }

    /// Render as a template mapping body.
    pub fn to_mapping(&self) -> Value {
        serde_json::to_value(&self.regions).unwrap_or(Value::Null)
    }
}
