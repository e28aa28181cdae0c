use a3s_pack_core::error::{Result, ResultExt};

use super::Client;
use crate::builder::{
    Builder, BuildpackMetadata, CreatorMetadata, GroupMetadata, LifecycleMetadata,
};

/// Decoded view of a builder image.
#[derive(Debug, Clone, PartialEq)]
pub struct BuilderInfo {
    pub description: String,
    pub stack: String,
    pub mixins: Vec<String>,
    pub run_image: String,
    pub run_image_mirrors: Vec<String>,
    pub buildpacks: Vec<BuildpackMetadata>,
    pub groups: Vec<GroupMetadata>,
    pub lifecycle: LifecycleMetadata,
    pub created_by: CreatorMetadata,
}

impl From<&Builder> for BuilderInfo {
    fn from(builder: &Builder) -> Self {
        let mut mixins = builder.mixins().to_vec();
        mixins.sort();
        Self {
            description: builder.description().to_string(),
            stack: builder.stack_id().to_string(),
            mixins,
            run_image: builder.run_image().to_string(),
            run_image_mirrors: builder.run_image_mirrors().to_vec(),
            buildpacks: builder.buildpacks().to_vec(),
            groups: builder.groups().to_vec(),
            lifecycle: builder.lifecycle_metadata().clone(),
            created_by: builder.created_by().clone(),
        }
    }
}

impl Client {
    /// Inspect builder `name` in the local store (`daemon`) or the registry.
    ///
    /// Returns `None` when the image does not exist there. Never pulls.
    pub async fn inspect_builder(&self, name: &str, daemon: bool) -> Result<Option<BuilderInfo>> {
        let image = match self.fetcher.fetch(name, daemon, false).await {
            Ok(image) => image,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let builder = Builder::get(image).with_context(|| format!("inspecting builder '{}'", name))?;
        Ok(Some(BuilderInfo::from(&builder)))
    }
}
