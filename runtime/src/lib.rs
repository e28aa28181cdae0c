//! A3S Pack Runtime - builder assembly and rebase engine.
//!
//! This crate fetches images from the local store or a registry, downloads
//! buildpacks and lifecycles, assembles builder images and rebases
//! application images onto new run images.

#![allow(clippy::result_large_err)]

mod archive;
pub mod builder;
pub mod client;
pub mod download;
pub mod image;
pub mod reference;

#[cfg(test)]
mod testing;

// Re-export common types
pub use builder::{Builder, Buildpack, Lifecycle, DEFAULT_LIFECYCLE_VERSION};
pub use client::{
    resolve_run_image, BuilderInfo, Client, ClientOptions, CreateBuilderOptions, LayerRebaser,
    RebaseOptions, Rebaser,
};
pub use download::{ArtifactSource, Blob, Downloader, HttpDownloader};
pub use image::{
    DefaultImageFetcher, Image, ImageFetcher, ImageLayer, ImageOrigin, ImageStore, LayoutImage,
    RegistryAuth, StoredImage,
};
pub use reference::ImageReference;

/// A3S Pack Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
