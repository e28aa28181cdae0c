//! Buildpacks and their `buildpack.toml` descriptor.

use a3s_pack_core::error::{PackError, Result};
use serde::{Deserialize, Serialize};

use crate::download::Blob;

const DESCRIPTOR_FILE: &str = "buildpack.toml";

/// Parsed `buildpack.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildpackDescriptor {
    pub buildpack: BuildpackInfo,
    #[serde(default)]
    pub stacks: Vec<BuildpackStack>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<toml::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildpackInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildpackStack {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mixins: Vec<String>,
}

/// A fetched buildpack: its descriptor plus the content it came from.
#[derive(Debug, Clone)]
pub struct Buildpack {
    descriptor: BuildpackDescriptor,
    blob: Blob,
}

impl Buildpack {
    /// Read the descriptor from `blob`.
    pub fn from_blob(blob: Blob) -> Result<Self> {
        let raw = blob
            .read_file(DESCRIPTOR_FILE)
            .map_err(|e| {
                PackError::InvalidBuildpack(format!(
                    "failed to read {}: {}",
                    blob.path().display(),
                    e.root()
                ))
            })?
            .ok_or_else(|| {
                PackError::InvalidBuildpack(format!(
                    "could not find {} in {}",
                    DESCRIPTOR_FILE,
                    blob.path().display()
                ))
            })?;

        let text = String::from_utf8(raw).map_err(|e| {
            PackError::InvalidBuildpack(format!("{} is not UTF-8: {}", DESCRIPTOR_FILE, e))
        })?;
        let descriptor: BuildpackDescriptor = toml::from_str(&text).map_err(|e| {
            PackError::InvalidBuildpack(format!("failed to decode {}: {}", DESCRIPTOR_FILE, e))
        })?;

        if descriptor.buildpack.id.is_empty() {
            return Err(PackError::InvalidBuildpack(
                "buildpack.id is required".to_string(),
            ));
        }
        if descriptor.buildpack.version.is_empty() {
            return Err(PackError::InvalidBuildpack(format!(
                "buildpack '{}' has no version",
                descriptor.buildpack.id
            )));
        }

        Ok(Self { descriptor, blob })
    }

    pub fn descriptor(&self) -> &BuildpackDescriptor {
        &self.descriptor
    }

    pub fn id(&self) -> &str {
        &self.descriptor.buildpack.id
    }

    pub fn version(&self) -> &str {
        &self.descriptor.buildpack.version
    }

    pub fn blob(&self) -> &Blob {
        &self.blob
    }

    /// Directory holding this buildpack inside a builder image.
    pub fn install_dir(&self) -> String {
        format!("/buildpacks/{}/{}", escape_id(self.id()), self.version())
    }

    /// Check the descriptor against the identity expected by the builder config.
    pub fn validate_identity(
        &self,
        uri: &str,
        expected_id: Option<&str>,
        expected_version: Option<&str>,
    ) -> Result<()> {
        if let Some(expected) = expected_id.filter(|id| !id.is_empty()) {
            if self.id() != expected {
                return Err(PackError::IdentityMismatch {
                    uri: uri.to_string(),
                    field: "ID",
                    found: self.id().to_string(),
                    expected: expected.to_string(),
                });
            }
        }

        if let Some(expected) = expected_version.filter(|v| !v.is_empty()) {
            if self.version() != expected {
                return Err(PackError::IdentityMismatch {
                    uri: uri.to_string(),
                    field: "version",
                    found: self.version().to_string(),
                    expected: expected.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Buildpack IDs may contain `/`; they become a single path component.
pub fn escape_id(id: &str) -> String {
    id.replace('/', "_")
}
