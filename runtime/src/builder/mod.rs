//! Builder images.
//!
//! A [`Builder`] wraps a build image and accumulates buildpacks, a
//! lifecycle, order and stack metadata. Nothing reaches the image until
//! [`Builder::save`], which appends the layers, writes the labels and
//! commits the image in one step.
//!
//! ```text
//! /workspace, /layers          owned by CNB_USER_ID:CNB_GROUP_ID
//! /cnb, /platform              root
//! /buildpacks/<id>/<version>/  one layer per buildpack
//! /buildpacks/order.toml       detection groups
//! /buildpacks/stack.toml       run image + mirrors
//! /lifecycle/                  phase binaries
//! ```

pub mod buildpack;
pub mod lifecycle;
pub mod metadata;
pub mod mixins;

use std::collections::HashMap;

use a3s_pack_core::error::{PackError, Result};
use a3s_pack_core::{OrderEntry, StackConfig};
use serde::Serialize;

use crate::archive::{write_dirs_layer, write_files_layer, Owner};
use crate::image::Image;

pub use buildpack::{escape_id, Buildpack, BuildpackDescriptor};
pub use lifecycle::{
    resolve_lifecycle_uri, uri_from_version, Lifecycle, LifecycleDescriptor,
    DEFAULT_LIFECYCLE_VERSION,
};
pub use metadata::{
    BuilderMetadata, BuildpackMetadata, CreatorMetadata, GroupBuildpackMetadata, GroupMetadata,
    LifecycleApis, LifecycleMetadata, LifecycleMetadataLabel, RunImageLayerMetadata,
    RunImageMetadata, StackMetadata, BUILDER_METADATA_LABEL, LIFECYCLE_METADATA_LABEL,
    MIXINS_LABEL, STACK_ID_LABEL,
};
pub use mixins::{merge_mixins, read_mixins};

const CREATOR_NAME: &str = "A3S Pack";

/// Builder image under construction, or decoded for inspection.
pub struct Builder {
    image: Box<dyn Image>,
    stack_id: String,
    owner: Owner,
    metadata: BuilderMetadata,
    mixins: Vec<String>,
    buildpacks: Vec<Buildpack>,
    lifecycle: Option<Lifecycle>,
    order: Vec<OrderEntry>,
}

#[derive(Serialize)]
struct OrderToml<'a> {
    groups: &'a [GroupMetadata],
}

#[derive(Serialize)]
struct StackToml<'a> {
    #[serde(rename = "run-image")]
    run_image: &'a RunImageMetadata,
}

impl Builder {
    /// Start a builder named `name` on top of `image`.
    ///
    /// The build image must declare a stack ID and the CNB user and group.
    pub fn new(mut image: Box<dyn Image>, name: &str) -> Result<Self> {
        let invalid = |message: String| PackError::InvalidBuilder {
            name: name.to_string(),
            message: format!("invalid build-image: {}", message),
        };

        let stack_id = image
            .label(STACK_ID_LABEL)?
            .filter(|id| !id.is_empty())
            .ok_or_else(|| invalid(format!("image is missing label '{}'", STACK_ID_LABEL)))?;

        let owner = Owner {
            uid: id_from_env(&*image, "CNB_USER_ID").map_err(&invalid)?,
            gid: id_from_env(&*image, "CNB_GROUP_ID").map_err(&invalid)?,
        };

        image.rename(name)?;

        Ok(Self {
            image,
            stack_id,
            owner,
            metadata: BuilderMetadata::default(),
            mixins: Vec::new(),
            buildpacks: Vec::new(),
            lifecycle: None,
            order: Vec::new(),
        })
    }

    /// Decode an existing builder image.
    pub fn get(image: Box<dyn Image>) -> Result<Self> {
        let name = image.name();
        let invalid = |message: String| PackError::InvalidBuilder {
            name: name.clone(),
            message,
        };

        let raw = image
            .label(BUILDER_METADATA_LABEL)?
            .filter(|raw| !raw.trim().is_empty())
            .ok_or_else(|| invalid(format!("missing label '{}'", BUILDER_METADATA_LABEL)))?;
        let metadata: BuilderMetadata = serde_json::from_str(&raw)
            .map_err(|e| invalid(format!("failed to decode builder metadata: {}", e)))?;

        let stack_id = image.label(STACK_ID_LABEL)?.unwrap_or_default();
        let mixins = read_mixins(&*image)?;

        Ok(Self {
            image,
            stack_id,
            owner: Owner::default(),
            metadata,
            mixins,
            buildpacks: Vec::new(),
            lifecycle: None,
            order: Vec::new(),
        })
    }

    pub fn name(&self) -> String {
        self.image.name()
    }

    pub fn stack_id(&self) -> &str {
        &self.stack_id
    }

    pub fn description(&self) -> &str {
        &self.metadata.description
    }

    pub fn run_image(&self) -> &str {
        &self.metadata.stack.run_image.image
    }

    pub fn run_image_mirrors(&self) -> &[String] {
        &self.metadata.stack.run_image.mirrors
    }

    pub fn buildpacks(&self) -> &[BuildpackMetadata] {
        &self.metadata.buildpacks
    }

    pub fn groups(&self) -> &[GroupMetadata] {
        &self.metadata.groups
    }

    pub fn lifecycle_metadata(&self) -> &LifecycleMetadata {
        &self.metadata.lifecycle
    }

    pub fn created_by(&self) -> &CreatorMetadata {
        &self.metadata.created_by
    }

    pub fn mixins(&self) -> &[String] {
        &self.mixins
    }

    pub fn set_description(&mut self, description: &str) {
        self.metadata.description = description.to_string();
    }

    pub fn set_mixins(&mut self, mixins: Vec<String>) {
        self.mixins = mixins;
    }

    pub fn set_lifecycle(&mut self, lifecycle: Lifecycle) {
        let descriptor = lifecycle.descriptor();
        self.metadata.lifecycle = LifecycleMetadata {
            version: descriptor.lifecycle.version.clone(),
            api: descriptor.api.clone(),
        };
        self.lifecycle = Some(lifecycle);
    }

    pub fn add_buildpack(&mut self, buildpack: Buildpack) {
        tracing::debug!(
            builder = %self.name(),
            id = %buildpack.id(),
            version = %buildpack.version(),
            "Adding buildpack"
        );
        self.buildpacks.push(buildpack);
    }

    pub fn set_order(&mut self, order: Vec<OrderEntry>) {
        self.order = order;
    }

    pub fn set_stack(&mut self, stack: &StackConfig) {
        self.metadata.stack.run_image = RunImageMetadata {
            image: stack.run_image.clone(),
            mirrors: stack.run_image_mirrors.clone(),
        };
    }

    /// Write layers and labels, then commit the image. Returns its identifier.
    pub async fn save(mut self) -> Result<String> {
        let buildpacks = dedup_buildpacks(&self.buildpacks);
        self.metadata.buildpacks = buildpack_metadata(&buildpacks);
        self.metadata.groups = resolve_groups(&self.order, &self.metadata.buildpacks)
            .map_err(|message| PackError::InvalidBuilder {
                name: self.name(),
                message,
            })?;
        self.metadata.created_by = CreatorMetadata {
            name: CREATOR_NAME.to_string(),
            version: a3s_pack_core::VERSION.to_string(),
        };

        let tmp = tempfile::tempdir()?;

        let dirs_layer = tmp.path().join("dirs.tar");
        write_dirs_layer(
            &[
                ("/workspace", self.owner),
                ("/layers", self.owner),
                ("/cnb", Owner::default()),
                ("/buildpacks", Owner::default()),
                ("/platform", Owner::default()),
            ],
            &dirs_layer,
        )?;
        self.image.add_layer(&dirs_layer)?;

        for (index, buildpack) in buildpacks.iter().enumerate() {
            let layer = tmp.path().join(format!("buildpack-{}.tar", index));
            buildpack
                .blob()
                .write_layer(&buildpack.install_dir(), &layer)
                .map_err(|e| {
                    e.context(format!(
                        "creating layer for buildpack '{}@{}'",
                        buildpack.id(),
                        buildpack.version()
                    ))
                })?;
            self.image.add_layer(&layer)?;
        }

        if let Some(lifecycle) = &self.lifecycle {
            let layer = tmp.path().join("lifecycle.tar");
            lifecycle
                .blob()
                .write_subtree_layer("lifecycle", "/lifecycle", &layer)
                .map_err(|e| e.context("creating lifecycle layer"))?;
            self.image.add_layer(&layer)?;
        }

        let order_toml = toml::to_string(&OrderToml {
            groups: &self.metadata.groups,
        })?;
        let order_layer = tmp.path().join("order.tar");
        write_files_layer(&[("/buildpacks/order.toml", order_toml.as_bytes())], &order_layer)?;
        self.image.add_layer(&order_layer)?;

        let stack_toml = toml::to_string(&StackToml {
            run_image: &self.metadata.stack.run_image,
        })?;
        let stack_layer = tmp.path().join("stack.tar");
        write_files_layer(&[("/buildpacks/stack.toml", stack_toml.as_bytes())], &stack_layer)?;
        self.image.add_layer(&stack_layer)?;

        let mut mixins = self.mixins.clone();
        mixins.sort();
        self.image
            .set_label(BUILDER_METADATA_LABEL, &serde_json::to_string(&self.metadata)?)?;
        self.image
            .set_label(MIXINS_LABEL, &serde_json::to_string(&mixins)?)?;

        let identifier = self.image.save().await?;
        tracing::info!(builder = %self.name(), identifier = %identifier, "Builder saved");
        Ok(identifier)
    }
}

fn id_from_env(image: &dyn Image, key: &str) -> std::result::Result<u64, String> {
    let value = image
        .env(key)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("image is missing env '{}'", key))?;
    value
        .parse()
        .map_err(|_| format!("env '{}' must be an integer, got '{}'", key, value))
}

/// Keep the last copy of each `id@version`, in first-seen order.
fn dedup_buildpacks(buildpacks: &[Buildpack]) -> Vec<Buildpack> {
    let mut position: HashMap<(String, String), usize> = HashMap::new();
    let mut result: Vec<Buildpack> = Vec::new();
    for bp in buildpacks {
        let key = (bp.id().to_string(), bp.version().to_string());
        match position.get(&key) {
            Some(&index) => result[index] = bp.clone(),
            None => {
                position.insert(key, result.len());
                result.push(bp.clone());
            }
        }
    }
    result
}

/// The last added version of each buildpack ID is its latest.
fn buildpack_metadata(buildpacks: &[Buildpack]) -> Vec<BuildpackMetadata> {
    buildpacks
        .iter()
        .enumerate()
        .map(|(index, bp)| BuildpackMetadata {
            id: bp.id().to_string(),
            version: bp.version().to_string(),
            latest: !buildpacks[index + 1..].iter().any(|later| later.id() == bp.id()),
        })
        .collect()
}

/// Pin every group entry to a version present on the builder.
fn resolve_groups(
    order: &[OrderEntry],
    buildpacks: &[BuildpackMetadata],
) -> std::result::Result<Vec<GroupMetadata>, String> {
    order
        .iter()
        .map(|entry| -> std::result::Result<GroupMetadata, String> {
            let buildpacks = entry
                .group
                .iter()
                .map(|member| -> std::result::Result<GroupBuildpackMetadata, String> {
                    let version = match member.version.as_deref().filter(|v| !v.is_empty()) {
                        Some(version) => buildpacks
                            .iter()
                            .find(|bp| bp.id == member.id && bp.version == version)
                            .map(|bp| bp.version.clone())
                            .ok_or_else(|| {
                                format!(
                                    "buildpack '{}@{}' in order is not on the builder",
                                    member.id, version
                                )
                            })?,
                        None => buildpacks
                            .iter()
                            .find(|bp| bp.id == member.id && bp.latest)
                            .map(|bp| bp.version.clone())
                            .ok_or_else(|| {
                                format!("buildpack '{}' in order is not on the builder", member.id)
                            })?,
                    };
                    Ok(GroupBuildpackMetadata {
                        id: member.id.clone(),
                        version,
                        optional: member.optional,
                    })
                })
                .collect::<std::result::Result<Vec<_>, String>>()?;
            Ok(GroupMetadata { buildpacks })
        })
        .collect()
}
