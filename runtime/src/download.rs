//! Artifact sources and downloads.
//!
//! Buildpacks and lifecycles are addressed by URI. A URI is classified once
//! into an [`ArtifactSource`]; a [`Downloader`] turns it into a [`Blob`] on
//! local disk. Remote archives are cached under a directory keyed by the
//! sha256 of their URI.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use a3s_pack_core::error::{PackError, Result};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};

use crate::archive::{append_dir, append_parent_dirs, layer_path, normalize, Owner};

/// Where an artifact lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Directory or archive on the local filesystem
    LocalPath(PathBuf),
    /// Archive served over HTTP(S)
    RemoteArchive(String),
}

impl ArtifactSource {
    /// Classify `uri` by scheme.
    ///
    /// Bare paths and `file://` URIs are local; `http://` and `https://` are
    /// remote archives. Every other scheme is rejected.
    pub fn parse(uri: &str) -> Result<Self> {
        let Some((scheme, rest)) = uri.split_once("://") else {
            return Ok(ArtifactSource::LocalPath(PathBuf::from(uri)));
        };

        match scheme.to_ascii_lowercase().as_str() {
            "file" => Ok(ArtifactSource::LocalPath(PathBuf::from(rest))),
            "http" | "https" => Ok(ArtifactSource::RemoteArchive(uri.to_string())),
            "docker" | "oci" => Err(PackError::UnsupportedBuildpackSource {
                uri: uri.to_string(),
                reason: "buildpacks from image registries are not supported".to_string(),
            }),
            other => Err(PackError::UnsupportedBuildpackSource {
                uri: uri.to_string(),
                reason: format!("unsupported scheme '{}'", other),
            }),
        }
    }
}

/// Downloaded (or local) artifact content: a directory or a tar archive,
/// optionally gzip-compressed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    path: PathBuf,
}

impl Blob {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contents of the file at `name` (relative to the artifact root).
    pub fn read_file(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let wanted = normalize(Path::new(name));

        if self.path.is_dir() {
            let file = self.path.join(&wanted);
            if !file.is_file() {
                return Ok(None);
            }
            return Ok(Some(std::fs::read(file)?));
        }

        let mut archive = self.open_archive()?;
        for entry in archive.entries()? {
            let mut entry = entry?;
            if normalize(&entry.path()?) == wanted && entry.header().entry_type().is_file() {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                return Ok(Some(data));
            }
        }
        Ok(None)
    }

    /// Relative paths of every entry, directories included.
    pub fn entries(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();

        if self.path.is_dir() {
            collect_paths(&self.path, &self.path, &mut paths)?;
        } else {
            let mut archive = self.open_archive()?;
            for entry in archive.entries()? {
                let path = normalize(&entry?.path()?);
                if !path.as_os_str().is_empty() {
                    paths.push(path);
                }
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Write the artifact as an uncompressed tar at `out`, with every entry
    /// placed under the absolute directory `target`.
    pub fn write_layer(&self, target: &str, out: &Path) -> Result<()> {
        self.write_subtree_layer("", target, out)
    }

    /// Like [`Blob::write_layer`], but only for entries below `subdir`,
    /// re-rooted so that `subdir` itself maps to `target`.
    pub fn write_subtree_layer(&self, subdir: &str, target: &str, out: &Path) -> Result<()> {
        let root = layer_path(target);
        let subdir = normalize(Path::new(subdir));
        let mut builder = tar::Builder::new(File::create(out)?);
        append_parent_dirs(&mut builder, &root)?;
        append_dir(&mut builder, &root, Owner::default())?;

        if self.path.is_dir() {
            append_tree(&mut builder, &self.path.join(&subdir), &root)?;
        } else {
            let mut archive = self.open_archive()?;
            for entry in archive.entries()? {
                let mut entry = entry?;
                let path = normalize(&entry.path()?);
                let relative = match path.strip_prefix(&subdir) {
                    Ok(relative) if !relative.as_os_str().is_empty() => relative.to_path_buf(),
                    _ => continue,
                };
                let mut header = entry.header().clone();
                reset_ownership(&mut header);
                builder.append_data(&mut header, root.join(relative), &mut entry)?;
            }
        }

        builder.into_inner()?.sync_all()?;
        Ok(())
    }

    fn open_archive(&self) -> Result<tar::Archive<Box<dyn Read>>> {
        let mut file = File::open(&self.path).map_err(|e| {
            PackError::Other(format!("Failed to open {}: {}", self.path.display(), e))
        })?;

        let mut magic = [0u8; 2];
        let gzipped = file.read(&mut magic)? == 2 && magic == [0x1f, 0x8b];
        drop(file);

        let reader = BufReader::new(File::open(&self.path)?);
        let reader: Box<dyn Read> = if gzipped {
            Box::new(GzDecoder::new(reader))
        } else {
            Box::new(reader)
        };
        Ok(tar::Archive::new(reader))
    }
}

/// Append the contents of directory `src` below `dest`, in name order.
fn append_tree(builder: &mut tar::Builder<File>, src: &Path, dest: &Path) -> Result<()> {
    let mut children = std::fs::read_dir(src)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<Vec<_>>>()?;
    children.sort();

    for path in children {
        let Some(name) = path.file_name() else {
            continue;
        };
        let target = dest.join(name);
        let metadata = std::fs::symlink_metadata(&path)?;

        if metadata.is_dir() {
            append_dir(builder, &target, Owner::default())?;
            append_tree(builder, &path, &target)?;
            continue;
        }

        let mut header = tar::Header::new_gnu();
        header.set_metadata_in_mode(&metadata, tar::HeaderMode::Deterministic);
        reset_ownership(&mut header);
        if metadata.file_type().is_symlink() {
            builder.append_link(&mut header, &target, std::fs::read_link(&path)?)?;
        } else {
            builder.append_data(&mut header, &target, File::open(&path)?)?;
        }
    }
    Ok(())
}

/// Root ownership and a zero mtime, whatever the source recorded.
fn reset_ownership(header: &mut tar::Header) {
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
}

fn collect_paths(root: &Path, current: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(current)? {
        let path = entry?.path();
        if let Ok(relative) = path.strip_prefix(root) {
            paths.push(relative.to_path_buf());
        }
        if path.is_dir() {
            collect_paths(root, &path, paths)?;
        }
    }
    Ok(())
}

/// Fetches artifact content by URI.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch the content at `uri`; transport failures surface as
    /// [`PackError::Download`].
    async fn download(&self, uri: &str) -> Result<Blob>;
}

/// Downloads remote archives over HTTP(S) into a local cache.
pub struct HttpDownloader {
    http: reqwest::Client,
    cache_dir: PathBuf,
}

impl HttpDownloader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            cache_dir: cache_dir.into(),
        }
    }

    fn cache_path(&self, uri: &str) -> PathBuf {
        self.cache_dir.join(hex::encode(Sha256::digest(uri.as_bytes())))
    }

    async fn fetch_remote(&self, uri: &str) -> Result<Blob> {
        let cache_path = self.cache_path(uri);
        if cache_path.exists() {
            tracing::debug!(uri = %uri, path = %cache_path.display(), "Using cached download");
            return Ok(Blob::new(cache_path));
        }

        tracing::info!(uri = %uri, "Downloading");
        let download_error = |message: String| PackError::Download {
            uri: uri.to_string(),
            message,
        };

        let response = self
            .http
            .get(uri)
            .send()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        if !response.status().is_success() {
            return Err(download_error(format!("HTTP status {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| download_error(e.to_string()))?;

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        let partial = cache_path.with_extension("partial");
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &cache_path).await?;

        Ok(Blob::new(cache_path))
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, uri: &str) -> Result<Blob> {
        match ArtifactSource::parse(uri)? {
            ArtifactSource::LocalPath(path) => {
                if !path.exists() {
                    return Err(PackError::Download {
                        uri: uri.to_string(),
                        message: format!("{} does not exist", path.display()),
                    });
                }
                Ok(Blob::new(path))
            }
            ArtifactSource::RemoteArchive(url) => self.fetch_remote(&url).await,
        }
    }
}
