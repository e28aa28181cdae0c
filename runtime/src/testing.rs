//! In-memory fakes for images, the image fetcher and the downloader.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use a3s_pack_core::error::{PackError, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::download::{Blob, Downloader};
use crate::image::{Image, ImageFetcher, ImageLayer};

#[derive(Debug, Default)]
struct FakeImageState {
    name: String,
    labels: HashMap<String, String>,
    env: HashMap<String, String>,
    base: String,
    layers: Vec<ImageLayer>,
    added_layers: Vec<PathBuf>,
    digest: String,
    save_count: usize,
    rebased_on: Option<(String, String)>,
}

/// Image double. Clones share state, so a test keeps a clone to inspect
/// what code did through the boxed trait object.
#[derive(Debug, Clone)]
pub struct FakeImage {
    state: Arc<Mutex<FakeImageState>>,
}

impl FakeImage {
    pub fn new(name: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeImageState {
                name: name.to_string(),
                digest: format!("sha256:{}", name.replace(['/', ':', '.'], "-")),
                ..Default::default()
            })),
        }
    }

    /// Replace the layers with ones carrying the given diff IDs.
    pub fn with_layers(self, diff_ids: &[&str]) -> Self {
        self.state.lock().layers = diff_ids.iter().map(|id| fake_layer(id)).collect();
        self
    }

    pub fn with_digest(self, digest: &str) -> Self {
        self.state.lock().digest = digest.to_string();
        self
    }

    pub fn set_label_value(&self, key: &str, value: &str) {
        self.state
            .lock()
            .labels
            .insert(key.to_string(), value.to_string());
    }

    pub fn set_env_value(&self, key: &str, value: &str) {
        self.state.lock().env.insert(key.to_string(), value.to_string());
    }

    pub fn set_base(&self, base: &str) {
        self.state.lock().base = base.to_string();
    }

    pub fn label_value(&self, key: &str) -> Option<String> {
        self.state.lock().labels.get(key).cloned()
    }

    pub fn current_name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn save_count(&self) -> usize {
        self.state.lock().save_count
    }

    pub fn added_layers(&self) -> Vec<PathBuf> {
        self.state.lock().added_layers.clone()
    }

    pub fn layer_ids(&self) -> Vec<String> {
        self.state
            .lock()
            .layers
            .iter()
            .map(|l| l.diff_id.clone())
            .collect()
    }

    /// `(base top layer, new base name)` of the last rebase.
    pub fn rebased_on(&self) -> Option<(String, String)> {
        self.state.lock().rebased_on.clone()
    }

    /// Whether both handles share state.
    pub fn same_as(&self, other: &FakeImage) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

fn fake_layer(diff_id: &str) -> ImageLayer {
    ImageLayer {
        diff_id: diff_id.to_string(),
        digest: diff_id.to_string(),
        media_type: "application/vnd.oci.image.layer.v1.tar+gzip".to_string(),
        size: 0,
        path: PathBuf::new(),
    }
}

#[async_trait]
impl Image for FakeImage {
    fn name(&self) -> String {
        self.current_name()
    }

    fn rename(&mut self, name: &str) -> Result<()> {
        self.state.lock().name = name.to_string();
        Ok(())
    }

    fn label(&self, key: &str) -> Result<Option<String>> {
        Ok(self.label_value(key))
    }

    fn set_label(&mut self, key: &str, value: &str) -> Result<()> {
        self.set_label_value(key, value);
        Ok(())
    }

    fn env(&self, key: &str) -> Result<Option<String>> {
        Ok(self.state.lock().env.get(key).cloned())
    }

    fn base(&self) -> String {
        self.state.lock().base.clone()
    }

    fn layers(&self) -> Vec<ImageLayer> {
        self.state.lock().layers.clone()
    }

    fn top_layer(&self) -> Result<String> {
        let state = self.state.lock();
        state
            .layers
            .last()
            .map(|l| l.diff_id.clone())
            .ok_or_else(|| PackError::OciImage(format!("Image {} has no layers", state.name)))
    }

    fn identifier(&self) -> Result<String> {
        let state = self.state.lock();
        Ok(format!("{}@{}", state.name, state.digest))
    }

    fn add_layer(&mut self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        let diff_id = format!("sha256:added-{}", state.added_layers.len());
        state.layers.push(fake_layer(&diff_id));
        state.added_layers.push(path.to_path_buf());
        Ok(())
    }

    fn rebase(&mut self, base_top_layer: &str, new_base: &dyn Image) -> Result<()> {
        let new_layers = new_base.layers();
        let new_base_name = new_base.name();

        let mut state = self.state.lock();
        let position = state
            .layers
            .iter()
            .position(|l| l.diff_id == base_top_layer)
            .ok_or_else(|| {
                PackError::OciImage(format!("Base top layer {} not found", base_top_layer))
            })?;

        let mut layers = new_layers;
        layers.extend(state.layers.drain(position + 1..));
        state.layers = layers;
        state.base = new_base_name.clone();
        state.rebased_on = Some((base_top_layer.to_string(), new_base_name));
        Ok(())
    }

    async fn save(&mut self) -> Result<String> {
        self.state.lock().save_count += 1;
        self.identifier()
    }
}

/// One recorded [`ImageFetcher::fetch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub reference: String,
    pub daemon: bool,
    pub pull: bool,
}

/// Image fetcher over separate "daemon" and "registry" maps.
///
/// A daemon fetch with `pull` replaces the local entry with the registry
/// one when the registry has it. References marked with
/// [`FakeImageFetcher::fail`] return a registry error from either side.
#[derive(Default)]
pub struct FakeImageFetcher {
    local: Mutex<HashMap<String, FakeImage>>,
    remote: Mutex<HashMap<String, FakeImage>>,
    failures: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<FetchCall>>,
}

impl FakeImageFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local(&self, image: &FakeImage) {
        self.local.lock().insert(image.current_name(), image.clone());
    }

    pub fn add_remote(&self, image: &FakeImage) {
        self.remote.lock().insert(image.current_name(), image.clone());
    }

    pub fn fail(&self, reference: &str, message: &str) {
        self.failures
            .lock()
            .insert(reference.to_string(), message.to_string());
    }

    pub fn local(&self, reference: &str) -> Option<FakeImage> {
        self.local.lock().get(reference).cloned()
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().clone()
    }

    /// Calls for one reference.
    pub fn calls_for(&self, reference: &str) -> Vec<FetchCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.reference == reference)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ImageFetcher for FakeImageFetcher {
    async fn fetch(&self, reference: &str, daemon: bool, pull: bool) -> Result<Box<dyn Image>> {
        self.calls.lock().push(FetchCall {
            reference: reference.to_string(),
            daemon,
            pull,
        });

        if let Some(message) = self.failures.lock().get(reference).cloned() {
            return Err(PackError::Registry {
                registry: reference.to_string(),
                message,
            });
        }

        let not_found = || PackError::ImageNotFound(reference.to_string());

        if !daemon {
            let image = self.remote.lock().get(reference).cloned().ok_or_else(not_found)?;
            return Ok(Box::new(image));
        }

        if pull {
            if let Some(remote) = self.remote.lock().get(reference).cloned() {
                self.local.lock().insert(reference.to_string(), remote);
            }
        }

        let image = self.local.lock().get(reference).cloned().ok_or_else(not_found)?;
        Ok(Box::new(image))
    }
}

/// Downloader serving registered on-disk blobs.
#[derive(Default)]
pub struct FakeDownloader {
    blobs: Mutex<HashMap<String, PathBuf>>,
    calls: AtomicUsize,
}

impl FakeDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, uri: &str, path: impl Into<PathBuf>) {
        self.blobs.lock().insert(uri.to_string(), path.into());
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn download(&self, uri: &str) -> Result<Blob> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.blobs
            .lock()
            .get(uri)
            .map(Blob::new)
            .ok_or_else(|| PackError::Download {
                uri: uri.to_string(),
                message: "no such blob".to_string(),
            })
    }
}
