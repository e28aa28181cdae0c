//! Local image store backing daemon fetches.
//!
//! Images are kept on disk as OCI image layouts under `sha256/<digest>/`,
//! indexed by normalized reference in a persistent `index.json`. Several
//! references may share one layout; a layout is deleted once no reference
//! points at it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_pack_core::error::{PackError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Metadata for a stored image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredImage {
    /// Normalized reference (e.g., "docker.io/cnbs/run:bionic")
    pub reference: String,
    /// Manifest digest (e.g., "sha256:abc123...")
    pub digest: String,
    /// Total size in bytes
    pub size_bytes: u64,
    /// When the image was written to the store
    pub stored_at: DateTime<Utc>,
    /// Path to the OCI image layout on disk
    pub path: PathBuf,
}

/// Persistent index stored as JSON on disk.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreIndex {
    images: Vec<StoredImage>,
}

/// Disk-based image store with an in-memory index.
pub struct ImageStore {
    /// Root directory for image storage
    store_dir: PathBuf,
    /// reference → StoredImage
    index: Arc<RwLock<HashMap<String, StoredImage>>>,
}

impl ImageStore {
    /// Open (or create) an image store rooted at `store_dir`.
    pub fn new(store_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(store_dir).map_err(|e| {
            PackError::OciImage(format!(
                "Failed to create image store directory {}: {}",
                store_dir.display(),
                e
            ))
        })?;

        let index = load_index(store_dir)?;
        Ok(Self {
            store_dir: store_dir.to_path_buf(),
            index: Arc::new(RwLock::new(index)),
        })
    }

    /// Get a stored image by normalized reference.
    pub async fn get(&self, reference: &str) -> Option<StoredImage> {
        self.index.read().await.get(reference).cloned()
    }

    /// Store the OCI layout in `source_dir` under `reference`.
    ///
    /// Replaces any previous entry for `reference`.
    pub async fn put(&self, reference: &str, digest: &str, source_dir: &Path) -> Result<StoredImage> {
        let digest_hex = digest.strip_prefix("sha256:").unwrap_or(digest);
        let target_dir = self.store_dir.join("sha256").join(digest_hex);

        if !target_dir.exists() {
            copy_dir_recursive(source_dir, &target_dir).map_err(|e| {
                PackError::OciImage(format!("Failed to copy image to store: {}", e))
            })?;
        }

        let stored = StoredImage {
            reference: reference.to_string(),
            digest: digest.to_string(),
            size_bytes: dir_size(&target_dir),
            stored_at: Utc::now(),
            path: target_dir,
        };

        let replaced = {
            let mut index = self.index.write().await;
            index.insert(reference.to_string(), stored.clone())
        };
        if let Some(old) = replaced {
            self.remove_layout_if_unused(&old).await?;
        }

        self.save_index().await?;
        Ok(stored)
    }

    /// Remove an image by reference.
    pub async fn remove(&self, reference: &str) -> Result<()> {
        let removed = self.index.write().await.remove(reference);
        match removed {
            Some(image) => {
                self.remove_layout_if_unused(&image).await?;
                self.save_index().await
            }
            None => Err(PackError::ImageNotFound(reference.to_string())),
        }
    }

    /// List all stored images.
    pub async fn list(&self) -> Vec<StoredImage> {
        self.index.read().await.values().cloned().collect()
    }

    /// Get the store directory path.
    pub fn store_dir(&self) -> &Path {
        &self.store_dir
    }

    async fn remove_layout_if_unused(&self, image: &StoredImage) -> Result<()> {
        let still_used = self
            .index
            .read()
            .await
            .values()
            .any(|img| img.path == image.path);

        if !still_used && image.path.exists() {
            std::fs::remove_dir_all(&image.path).map_err(|e| {
                PackError::OciImage(format!(
                    "Failed to remove image directory {}: {}",
                    image.path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    async fn save_index(&self) -> Result<()> {
        let store_index = StoreIndex {
            images: self.index.read().await.values().cloned().collect(),
        };

        let data = serde_json::to_string_pretty(&store_index)?;
        let index_path = self.store_dir.join("index.json");

        tokio::fs::write(&index_path, data).await.map_err(|e| {
            PackError::OciImage(format!(
                "Failed to write image store index {}: {}",
                index_path.display(),
                e
            ))
        })
    }
}

/// Load the reference index, dropping entries whose layout is gone.
fn load_index(store_dir: &Path) -> Result<HashMap<String, StoredImage>> {
    let index_path = store_dir.join("index.json");
    if !index_path.exists() {
        return Ok(HashMap::new());
    }

    let data = std::fs::read_to_string(&index_path).map_err(|e| {
        PackError::OciImage(format!(
            "Failed to read image store index {}: {}",
            index_path.display(),
            e
        ))
    })?;

    let store_index: StoreIndex = serde_json::from_str(&data).map_err(|e| {
        PackError::OciImage(format!("Failed to parse image store index: {}", e))
    })?;

    Ok(store_index
        .images
        .into_iter()
        .filter(|image| image.path.exists())
        .map(|image| (image.reference.clone(), image))
        .collect())
}

/// Recursively copy a directory.
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        if src_path.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

fn dir_size(path: &Path) -> u64 {
    let mut total = 0;
    if let Ok(entries) = std::fs::read_dir(path) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                total += dir_size(&path);
            } else if let Ok(meta) = path.metadata() {
                total += meta.len();
            }
        }
    }
    total
}
