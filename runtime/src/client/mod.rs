//! Entry point for builder assembly, builder inspection and rebase.
//!
//! A [`Client`] owns its collaborators behind trait objects: an
//! [`ImageFetcher`] for images, a [`Downloader`] for buildpacks and
//! lifecycles, and a [`Rebaser`] for base layer swaps. Each operation runs
//! strictly in order and persists only at its final save.

mod create_builder;
mod inspect_builder;
mod rebase;
mod run_image;

use std::sync::Arc;

use crate::builder::DEFAULT_LIFECYCLE_VERSION;
use crate::download::Downloader;
use crate::image::ImageFetcher;

pub use create_builder::CreateBuilderOptions;
pub use inspect_builder::BuilderInfo;
pub use rebase::{LayerRebaser, RebaseOptions, Rebaser};
pub use run_image::resolve_run_image;

/// Tunables that would otherwise be ambient defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Lifecycle version used when a builder config declares none
    pub default_lifecycle_version: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            default_lifecycle_version: DEFAULT_LIFECYCLE_VERSION.to_string(),
        }
    }
}

pub struct Client {
    fetcher: Arc<dyn ImageFetcher>,
    downloader: Arc<dyn Downloader>,
    rebaser: Arc<dyn Rebaser>,
    options: ClientOptions,
}

impl Client {
    pub fn new(fetcher: Arc<dyn ImageFetcher>, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            fetcher,
            downloader,
            rebaser: Arc::new(LayerRebaser),
            options: ClientOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ClientOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_rebaser(mut self, rebaser: Arc<dyn Rebaser>) -> Self {
        self.rebaser = rebaser;
        self
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }
}
