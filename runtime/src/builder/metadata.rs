//! JSON label schemas.
//!
//! Labels are the serialization boundary between images and the typed model:
//! builder metadata on builder images, lifecycle metadata on application
//! images. Unknown fields in the lifecycle metadata label are preserved so a
//! rebase only rewrites what it owns.

use a3s_pack_core::error::{PackError, Result};
use serde::{Deserialize, Serialize};

use crate::image::Image;

/// Builder metadata label on builder images.
pub const BUILDER_METADATA_LABEL: &str = "io.buildpacks.builder.metadata";

/// Stack ID label on stack (and builder) images.
pub const STACK_ID_LABEL: &str = "io.buildpacks.stack.id";

/// JSON array of mixins on stack images.
pub const MIXINS_LABEL: &str = "io.buildpacks.stack.mixins";

/// Lifecycle metadata label on application images.
pub const LIFECYCLE_METADATA_LABEL: &str = "io.buildpacks.lifecycle.metadata";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderMetadata {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stack: StackMetadata,
    #[serde(default)]
    pub buildpacks: Vec<BuildpackMetadata>,
    #[serde(default)]
    pub groups: Vec<GroupMetadata>,
    #[serde(default)]
    pub lifecycle: LifecycleMetadata,
    #[serde(default)]
    pub created_by: CreatorMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StackMetadata {
    #[serde(default)]
    pub run_image: RunImageMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunImageMetadata {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub mirrors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildpackMetadata {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub latest: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupMetadata {
    #[serde(default)]
    pub buildpacks: Vec<GroupBuildpackMetadata>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupBuildpackMetadata {
    pub id: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleMetadata {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub api: LifecycleApis,
}

/// Platform and buildpack API versions a lifecycle implements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleApis {
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub buildpack: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreatorMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Lifecycle metadata label of an application image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleMetadataLabel {
    #[serde(default)]
    pub stack: StackMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_image: Option<RunImageLayerMetadata>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The run image an application image currently sits on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunImageLayerMetadata {
    pub top_layer: String,
    pub reference: String,
}

impl LifecycleMetadataLabel {
    /// Read from `image`; an absent or empty label decodes as the default.
    pub fn read(image: &dyn Image) -> Result<Self> {
        match image.label(LIFECYCLE_METADATA_LABEL)? {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).map_err(|e| {
                PackError::OciImage(format!(
                    "failed to decode label '{}' of image '{}': {}",
                    LIFECYCLE_METADATA_LABEL,
                    image.name(),
                    e
                ))
            }),
            _ => Ok(Self::default()),
        }
    }

    pub fn write(&self, image: &mut dyn Image) -> Result<()> {
        image.set_label(LIFECYCLE_METADATA_LABEL, &serde_json::to_string(self)?)
    }
}
