//! Default image fetcher over the local store and registries.
//!
//! Daemon fetches resolve against the [`ImageStore`], optionally refreshed
//! from the registry first. Non-daemon fetches always go to the registry and
//! never touch the store.

use std::sync::Arc;

use a3s_pack_core::error::{PackError, Result};
use async_trait::async_trait;

use super::layout::{ImageOrigin, LayoutImage};
use super::registry::{RegistryAuth, RegistryPuller, RegistryPusher};
use super::store::ImageStore;
use super::{Image, ImageFetcher};
use crate::reference::ImageReference;

/// Fetches images from the local store or a remote registry.
pub struct DefaultImageFetcher {
    store: Arc<ImageStore>,
    puller: RegistryPuller,
    pusher: Arc<RegistryPusher>,
}

impl DefaultImageFetcher {
    pub fn new(store: Arc<ImageStore>, auth: RegistryAuth) -> Self {
        Self {
            store,
            puller: RegistryPuller::new(auth.clone()),
            pusher: Arc::new(RegistryPusher::new(auth)),
        }
    }

    /// Open the store entry for `reference`.
    async fn from_store(&self, reference: &ImageReference) -> Result<LayoutImage> {
        let full_ref = reference.full_reference();
        let stored = self
            .store
            .get(&full_ref)
            .await
            .ok_or(PackError::ImageNotFound(full_ref))?;

        tracing::debug!(
            reference = %stored.reference,
            digest = %stored.digest,
            "Using local image"
        );
        LayoutImage::open(
            &stored.reference,
            &stored.path,
            ImageOrigin::Local(self.store.clone()),
        )
    }

    /// Pull `reference` and record it in the local store.
    async fn refresh_store(&self, reference: &ImageReference) -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let digest = self.puller.pull(reference, tmp.path()).await?;
        self.store
            .put(&reference.full_reference(), &digest, tmp.path())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ImageFetcher for DefaultImageFetcher {
    async fn fetch(&self, reference: &str, daemon: bool, pull: bool) -> Result<Box<dyn Image>> {
        let parsed = ImageReference::parse(reference)?;

        if daemon {
            if pull {
                tracing::info!(reference = %parsed, "Pulling image");
                self.refresh_store(&parsed).await?;
            }
            return Ok(Box::new(self.from_store(&parsed).await?));
        }

        let pulled = tempfile::tempdir()?;
        self.puller.pull(&parsed, pulled.path()).await?;
        let image = LayoutImage::open_pulled(
            &parsed.full_reference(),
            pulled,
            ImageOrigin::Remote(self.pusher.clone()),
        )?;
        Ok(Box::new(image))
    }
}
