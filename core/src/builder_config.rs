//! Builder configuration (`builder.toml`).
//!
//! ```toml
//! description = "Ubuntu bionic base image with buildpacks for Java and Node.js"
//!
//! [[buildpacks]]
//! id = "org.example.java"
//! version = "1.0.0"
//! uri = "https://example.com/java-buildpack.tgz"
//!
//! [[order]]
//! group = [{ id = "org.example.java" }]
//!
//! [stack]
//! id = "io.buildpacks.stacks.bionic"
//! build-image = "cnbs/build:bionic"
//! run-image = "cnbs/run:bionic"
//! run-image-mirrors = ["registry.example.com/cnbs/run:bionic"]
//!
//! [lifecycle]
//! version = "0.3.0"
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{PackError, Result};

/// Declarative builder configuration. Never mutated by assembly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BuilderConfig {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub buildpacks: Vec<BuildpackRef>,

    #[serde(default)]
    pub order: Vec<OrderEntry>,

    #[serde(default)]
    pub stack: StackConfig,

    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

/// Stack section: build image, run image and run image mirrors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StackConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub build_image: String,
    #[serde(default)]
    pub run_image: String,
    #[serde(default)]
    pub run_image_mirrors: Vec<String>,
}

/// A buildpack to download, with optional expected identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildpackRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub uri: String,
}

/// One detection group of the builder order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderEntry {
    #[serde(default)]
    pub group: Vec<GroupBuildpack>,
}

/// A buildpack reference inside an order group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupBuildpack {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

/// Lifecycle section. At most one of `version` and `uri` may be set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
}

impl BuilderConfig {
    /// Read a `builder.toml`, resolving relative URIs against its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            PackError::Config(format!(
                "failed to read builder config {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config: BuilderConfig = toml::from_str(&data).map_err(|e| {
            PackError::Config(format!(
                "failed to parse builder config {}: {}",
                path.display(),
                e
            ))
        })?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        for bp in &mut config.buildpacks {
            bp.uri = absolutize(&bp.uri, base_dir);
        }
        if let Some(uri) = config.lifecycle.uri.as_mut() {
            *uri = absolutize(uri, base_dir);
        }

        Ok(config)
    }

    /// Check the required stack fields. Performs no I/O.
    pub fn validate(&self) -> Result<()> {
        if self.stack.id.is_empty() {
            return Err(PackError::Config("stack.id is required".to_string()));
        }

        if self.stack.build_image.is_empty() {
            return Err(PackError::Config("stack.build-image is required".to_string()));
        }

        if self.stack.run_image.is_empty() {
            return Err(PackError::Config("stack.run-image is required".to_string()));
        }

        Ok(())
    }
}

/// Resolve a relative filesystem path against `base_dir`; URIs pass through.
fn absolutize(uri: &str, base_dir: &Path) -> String {
    if uri.contains("://") || Path::new(uri).is_absolute() {
        return uri.to_string();
    }
    base_dir.join(uri).to_string_lossy().into_owned()
}
