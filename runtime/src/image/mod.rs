//! Image source abstractions.
//!
//! An [`ImageFetcher`] resolves a reference to an [`Image`] handle, either
//! from the local image store (the "daemon") or from a remote registry. The
//! handle is an in-memory view: label edits, appended layers and rebases are
//! only committed by [`Image::save`].
//!
//! # Fetch policy
//!
//! ```text
//! daemon  pull   source
//! ------  -----  ------------------------------------------------
//! true    false  local store only
//! true    true   registry pull refreshes the local store entry
//! false   any    registry only, local store untouched
//! ```

mod fetcher;
mod layout;
mod registry;
mod store;

use std::path::PathBuf;

use a3s_pack_core::error::Result;
use async_trait::async_trait;

pub use fetcher::DefaultImageFetcher;
pub use layout::{ImageOrigin, LayoutImage};
pub use registry::{PushResult, RegistryAuth, RegistryPuller, RegistryPusher};
pub use store::{ImageStore, StoredImage};

/// A filesystem layer of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayer {
    /// Uncompressed content digest (`rootfs.diff_ids` entry)
    pub diff_id: String,
    /// Compressed blob digest
    pub digest: String,
    /// Blob media type
    pub media_type: String,
    /// Compressed blob size in bytes
    pub size: u64,
    /// Location of the compressed blob on disk
    pub path: PathBuf,
}

/// Handle to a fetched (or newly created) image.
#[async_trait]
pub trait Image: Send + Sync {
    /// Reference the image was fetched as or will be saved as.
    fn name(&self) -> String;

    /// Change the reference the image will be saved as.
    fn rename(&mut self, name: &str) -> Result<()>;

    /// Label value; `None` when the label is absent.
    fn label(&self, key: &str) -> Result<Option<String>>;

    fn set_label(&mut self, key: &str, value: &str) -> Result<()>;

    /// Value of an environment variable from the image config.
    fn env(&self, key: &str) -> Result<Option<String>>;

    /// Name of the image this image is currently based on.
    fn base(&self) -> String;

    /// Layers, bottom to top.
    fn layers(&self) -> Vec<ImageLayer>;

    /// Diff ID of the topmost layer.
    fn top_layer(&self) -> Result<String>;

    /// Content-addressable reference (`repository@digest`).
    fn identifier(&self) -> Result<String>;

    /// Append an uncompressed tar layer read from `path`.
    fn add_layer(&mut self, path: &std::path::Path) -> Result<()>;

    /// Replace every layer up to and including `base_top_layer` with the
    /// layers of `new_base`.
    fn rebase(&mut self, base_top_layer: &str, new_base: &dyn Image) -> Result<()>;

    /// Persist the image to where it came from; returns its identifier.
    async fn save(&mut self) -> Result<String>;
}

/// Resolves image references to image handles.
#[async_trait]
pub trait ImageFetcher: Send + Sync {
    /// Fetch `reference` from the local store (`daemon`) or the registry,
    /// optionally refreshing the local copy first (`pull`).
    ///
    /// Absent images fail with [`PackError::ImageNotFound`].
    ///
    /// [`PackError::ImageNotFound`]: a3s_pack_core::PackError::ImageNotFound
    async fn fetch(&self, reference: &str, daemon: bool, pull: bool) -> Result<Box<dyn Image>>;
}
