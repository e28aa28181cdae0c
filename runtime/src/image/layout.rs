//! In-memory image handle over an OCI image layout.
//!
//! A [`LayoutImage`] is opened from a layout directory (a local store entry
//! or a freshly pulled registry image). Changes are held in memory and in a
//! private scratch directory until [`Image::save`] writes a new layout and
//! commits it to the store or pushes it to the registry.
//!
//! ```text
//! <layout>/
//! ├── oci-layout
//! ├── index.json            → manifest descriptor
//! └── blobs/sha256/
//!     ├── <manifest>        → config + layer descriptors, base annotations
//!     ├── <config>          → labels, env, rootfs.diff_ids
//!     └── <layers>          (tar+gzip)
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_pack_core::error::{PackError, Result};
use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use super::registry::RegistryPusher;
use super::store::ImageStore;
use super::{Image, ImageLayer};
use crate::reference::ImageReference;

const MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
const CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
const LAYER_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";

/// Standard OCI annotations recording the base image.
const BASE_NAME_ANNOTATION: &str = "org.opencontainers.image.base.name";
const BASE_DIGEST_ANNOTATION: &str = "org.opencontainers.image.base.digest";

/// Where a layout image is committed on save.
#[derive(Clone)]
pub enum ImageOrigin {
    /// Local image store ("daemon")
    Local(Arc<ImageStore>),
    /// Remote registry
    Remote(Arc<RegistryPusher>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Descriptor {
    media_type: String,
    digest: String,
    size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    media_type: Option<String>,
    config: Descriptor,
    layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Index {
    manifests: Vec<Descriptor>,
}

/// Image configuration blob. Unknown fields are carried through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    config: ContainerConfig,
    #[serde(default)]
    rootfs: RootFs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    history: Vec<serde_json::Value>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    env: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    labels: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RootFs {
    #[serde(rename = "type")]
    typ: String,
    #[serde(default)]
    diff_ids: Vec<String>,
}

impl Default for RootFs {
    fn default() -> Self {
        Self {
            typ: "layers".to_string(),
            diff_ids: Vec::new(),
        }
    }
}

/// Image loaded from an OCI image layout.
pub struct LayoutImage {
    name: String,
    reference: ImageReference,
    origin: ImageOrigin,
    config: ConfigFile,
    layers: Vec<ImageLayer>,
    annotations: BTreeMap<String, String>,
    manifest_digest: Option<String>,
    /// Holds new layer blobs and, for registry images, the pulled layout
    scratch: TempDir,
    _pulled: Option<TempDir>,
}

impl LayoutImage {
    /// Open the layout at `root_dir` as image `name`.
    pub fn open(name: &str, root_dir: &Path, origin: ImageOrigin) -> Result<Self> {
        Self::open_inner(name, root_dir, origin, None)
    }

    /// Open a layout living in a temporary directory owned by the image.
    pub(crate) fn open_pulled(name: &str, pulled: TempDir, origin: ImageOrigin) -> Result<Self> {
        let root_dir = pulled.path().to_path_buf();
        Self::open_inner(name, &root_dir, origin, Some(pulled))
    }

    fn open_inner(
        name: &str,
        root_dir: &Path,
        origin: ImageOrigin,
        pulled: Option<TempDir>,
    ) -> Result<Self> {
        let reference = ImageReference::parse(name)?;

        if !root_dir.join("oci-layout").exists() {
            return Err(PackError::OciImage(format!(
                "Not a valid OCI layout: missing oci-layout file in {}",
                root_dir.display()
            )));
        }

        let index: Index = read_json(&root_dir.join("index.json"))?;
        let manifest_desc = index.manifests.first().ok_or_else(|| {
            PackError::OciImage(format!("No manifests in index.json of {}", name))
        })?;

        let manifest: Manifest = read_json(&blob_path(root_dir, &manifest_desc.digest))?;
        let config: ConfigFile = read_json(&blob_path(root_dir, &manifest.config.digest))?;

        if config.rootfs.diff_ids.len() != manifest.layers.len() {
            return Err(PackError::OciImage(format!(
                "Image {} has {} layers but {} diff IDs",
                name,
                manifest.layers.len(),
                config.rootfs.diff_ids.len()
            )));
        }

        let layers = manifest
            .layers
            .iter()
            .zip(&config.rootfs.diff_ids)
            .map(|(desc, diff_id)| ImageLayer {
                diff_id: diff_id.clone(),
                digest: desc.digest.clone(),
                media_type: desc.media_type.clone(),
                size: desc.size,
                path: blob_path(root_dir, &desc.digest),
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            reference,
            origin,
            config,
            layers,
            annotations: manifest.annotations,
            manifest_digest: Some(manifest_desc.digest.clone()),
            scratch: tempfile::tempdir()?,
            _pulled: pulled,
        })
    }

    /// Write this image as a complete OCI layout into `dir`.
    ///
    /// Returns the manifest digest.
    pub fn write_layout(&self, dir: &Path) -> Result<String> {
        let blobs_dir = dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs_dir)?;

        for layer in &self.layers {
            let target = blob_path(dir, &layer.digest);
            if !target.exists() {
                std::fs::copy(&layer.path, &target).map_err(|e| {
                    PackError::OciImage(format!(
                        "Failed to copy layer {} of {}: {}",
                        layer.digest, self.name, e
                    ))
                })?;
            }
        }

        let config_json = serde_json::to_vec(&self.config)?;
        let config_desc = write_blob(dir, CONFIG_MEDIA_TYPE, &config_json)?;

        let manifest = Manifest {
            schema_version: 2,
            media_type: Some(MANIFEST_MEDIA_TYPE.to_string()),
            config: config_desc,
            layers: self
                .layers
                .iter()
                .map(|l| Descriptor {
                    media_type: l.media_type.clone(),
                    digest: l.digest.clone(),
                    size: l.size,
                })
                .collect(),
            annotations: self.annotations.clone(),
        };
        let manifest_json = serde_json::to_vec(&manifest)?;
        let manifest_desc = write_blob(dir, MANIFEST_MEDIA_TYPE, &manifest_json)?;

        std::fs::write(dir.join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#)?;
        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": MANIFEST_MEDIA_TYPE,
                "digest": manifest_desc.digest,
                "size": manifest_desc.size,
            }]
        });
        std::fs::write(dir.join("index.json"), serde_json::to_string_pretty(&index)?)?;

        Ok(manifest_desc.digest)
    }

    /// Copy a foreign layer blob into scratch space so it outlives its source image.
    fn adopt_layer(&self, layer: &ImageLayer) -> Result<ImageLayer> {
        let target = self.scratch.path().join(hex_of(&layer.digest));
        if !target.exists() {
            std::fs::copy(&layer.path, &target).map_err(|e| {
                PackError::OciImage(format!("Failed to copy layer {}: {}", layer.digest, e))
            })?;
        }
        Ok(ImageLayer {
            path: target,
            ..layer.clone()
        })
    }
}

#[async_trait]
impl Image for LayoutImage {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn rename(&mut self, name: &str) -> Result<()> {
        self.reference = ImageReference::parse(name)?;
        self.name = name.to_string();
        Ok(())
    }

    fn label(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .config
            .config
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key).cloned()))
    }

    fn set_label(&mut self, key: &str, value: &str) -> Result<()> {
        self.config
            .config
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn env(&self, key: &str) -> Result<Option<String>> {
        let prefix = format!("{}=", key);
        Ok(self.config.config.env.as_ref().and_then(|env| {
            env.iter()
                .find_map(|entry| entry.strip_prefix(&prefix).map(str::to_string))
        }))
    }

    fn base(&self) -> String {
        self.annotations
            .get(BASE_NAME_ANNOTATION)
            .cloned()
            .unwrap_or_default()
    }

    fn layers(&self) -> Vec<ImageLayer> {
        self.layers.clone()
    }

    fn top_layer(&self) -> Result<String> {
        self.layers
            .last()
            .map(|l| l.diff_id.clone())
            .ok_or_else(|| PackError::OciImage(format!("Image {} has no layers", self.name)))
    }

    fn identifier(&self) -> Result<String> {
        self.manifest_digest
            .as_ref()
            .map(|digest| self.reference.with_digest(digest))
            .ok_or_else(|| {
                PackError::OciImage(format!("Image {} has no digest until saved", self.name))
            })
    }

    fn add_layer(&mut self, path: &Path) -> Result<()> {
        let layer = compress_layer(path, self.scratch.path())?;
        tracing::debug!(
            image = %self.name,
            diff_id = %layer.diff_id,
            size = layer.size,
            "Adding layer"
        );
        self.config.rootfs.diff_ids.push(layer.diff_id.clone());
        if !self.config.history.is_empty() {
            self.config.history.push(serde_json::json!({ "created_by": "a3s-pack" }));
        }
        self.layers.push(layer);
        Ok(())
    }

    fn rebase(&mut self, base_top_layer: &str, new_base: &dyn Image) -> Result<()> {
        let position = self
            .layers
            .iter()
            .position(|l| l.diff_id == base_top_layer)
            .ok_or_else(|| {
                PackError::OciImage(format!(
                    "Base top layer {} not found in image {}",
                    base_top_layer, self.name
                ))
            })?;

        let mut layers = new_base
            .layers()
            .iter()
            .map(|l| self.adopt_layer(l))
            .collect::<Result<Vec<_>>>()?;
        layers.extend(self.layers.drain(position + 1..));

        self.config.rootfs.diff_ids = layers.iter().map(|l| l.diff_id.clone()).collect();
        // History no longer lines up with the layers
        self.config.history.clear();
        self.layers = layers;

        self.annotations
            .insert(BASE_NAME_ANNOTATION.to_string(), new_base.name());
        match new_base.identifier() {
            Ok(identifier) => {
                if let Some((_, digest)) = identifier.rsplit_once('@') {
                    self.annotations
                        .insert(BASE_DIGEST_ANNOTATION.to_string(), digest.to_string());
                }
            }
            Err(_) => {
                self.annotations.remove(BASE_DIGEST_ANNOTATION);
            }
        }
        Ok(())
    }

    async fn save(&mut self) -> Result<String> {
        let out = tempfile::tempdir()?;
        let digest = self.write_layout(out.path())?;

        let digest = match &self.origin {
            ImageOrigin::Local(store) => {
                store
                    .put(&self.reference.full_reference(), &digest, out.path())
                    .await?;
                digest
            }
            ImageOrigin::Remote(pusher) => {
                let pushed = pusher.push(&self.reference, out.path()).await?;
                digest_from_manifest_url(&pushed.manifest_url).unwrap_or(digest)
            }
        };

        self.manifest_digest = Some(digest);
        let identifier = self.identifier()?;
        tracing::info!(image = %self.name, identifier = %identifier, "Saved image");
        Ok(identifier)
    }
}

fn hex_of(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

fn blob_path(root_dir: &Path, digest: &str) -> PathBuf {
    root_dir.join("blobs").join("sha256").join(hex_of(digest))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read(path).map_err(|e| {
        PackError::OciImage(format!("Failed to read {}: {}", path.display(), e))
    })?;
    serde_json::from_slice(&content).map_err(|e| {
        PackError::OciImage(format!("Failed to parse {}: {}", path.display(), e))
    })
}

fn write_blob(dir: &Path, media_type: &str, data: &[u8]) -> Result<Descriptor> {
    let digest = format!("sha256:{}", hex::encode(Sha256::digest(data)));
    std::fs::write(blob_path(dir, &digest), data)?;
    Ok(Descriptor {
        media_type: media_type.to_string(),
        digest,
        size: data.len() as u64,
    })
}

/// Gzip an uncompressed tar into `scratch`, computing diff ID and digest.
fn compress_layer(tar_path: &Path, scratch: &Path) -> Result<ImageLayer> {
    let mut diff_hasher = Sha256::new();
    std::io::copy(&mut BufReader::new(File::open(tar_path)?), &mut diff_hasher)?;
    let diff_id = format!("sha256:{}", hex::encode(diff_hasher.finalize()));

    let staging = scratch.join(format!("{}.tmp", hex_of(&diff_id)));
    {
        let mut encoder = GzEncoder::new(BufWriter::new(File::create(&staging)?), Compression::default());
        std::io::copy(&mut BufReader::new(File::open(tar_path)?), &mut encoder)?;
        encoder.finish()?.flush()?;
    }

    let mut digest_hasher = Sha256::new();
    let size = std::io::copy(&mut BufReader::new(File::open(&staging)?), &mut digest_hasher)?;
    let digest = format!("sha256:{}", hex::encode(digest_hasher.finalize()));

    let path = scratch.join(hex_of(&digest));
    std::fs::rename(&staging, &path)?;

    Ok(ImageLayer {
        diff_id,
        digest,
        media_type: LAYER_MEDIA_TYPE.to_string(),
        size,
        path,
    })
}

/// Extract `sha256:...` from a `.../manifests/sha256:...` location.
fn digest_from_manifest_url(url: &str) -> Option<String> {
    url.rsplit_once("/manifests/")
        .map(|(_, digest)| digest)
        .filter(|digest| digest.starts_with("sha256:"))
        .map(str::to_string)
}
