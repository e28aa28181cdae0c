//! Lifecycle executor artifacts.
//!
//! A lifecycle archive carries `lifecycle.toml` and the phase binaries under
//! `lifecycle/`. Its download URI is either configured directly or derived
//! from a semantic version.

use a3s_pack_core::error::{PackError, Result};
use a3s_pack_core::LifecycleConfig;
use serde::{Deserialize, Serialize};

use super::metadata::LifecycleApis;
use crate::download::Blob;

/// Lifecycle version used when the builder config names none.
pub const DEFAULT_LIFECYCLE_VERSION: &str = "0.3.0";

const DESCRIPTOR_FILE: &str = "lifecycle.toml";

/// Binaries every lifecycle archive must contain.
pub const LIFECYCLE_BINARIES: &[&str] = &[
    "detector", "analyzer", "restorer", "builder", "exporter", "cacher", "launcher",
];

/// Parsed `lifecycle.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleDescriptor {
    #[serde(default)]
    pub api: LifecycleApis,
    #[serde(default)]
    pub lifecycle: LifecycleInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleInfo {
    #[serde(default)]
    pub version: String,
}

/// A fetched and validated lifecycle.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    descriptor: LifecycleDescriptor,
    blob: Blob,
}

impl Lifecycle {
    pub fn from_blob(blob: Blob) -> Result<Self> {
        let unreadable = |e: PackError| {
            PackError::InvalidLifecycle(format!(
                "failed to read {}: {}",
                blob.path().display(),
                e.root()
            ))
        };
        let raw = blob.read_file(DESCRIPTOR_FILE).map_err(unreadable)?.ok_or_else(|| {
            PackError::InvalidLifecycle(format!(
                "could not find {} in {}",
                DESCRIPTOR_FILE,
                blob.path().display()
            ))
        })?;
        let text = String::from_utf8(raw).map_err(|e| {
            PackError::InvalidLifecycle(format!("{} is not UTF-8: {}", DESCRIPTOR_FILE, e))
        })?;
        let descriptor: LifecycleDescriptor = toml::from_str(&text).map_err(|e| {
            PackError::InvalidLifecycle(format!("failed to decode {}: {}", DESCRIPTOR_FILE, e))
        })?;

        let entries = blob.entries().map_err(unreadable)?;
        for binary in LIFECYCLE_BINARIES {
            let path = std::path::Path::new("lifecycle").join(binary);
            if !entries.contains(&path) {
                return Err(PackError::InvalidLifecycle(format!(
                    "missing required binary '{}'",
                    path.display()
                )));
            }
        }

        Ok(Self { descriptor, blob })
    }

    pub fn descriptor(&self) -> &LifecycleDescriptor {
        &self.descriptor
    }

    pub fn blob(&self) -> &Blob {
        &self.blob
    }
}

/// Download URI for a lifecycle config.
///
/// `version` and `uri` are mutually exclusive; with neither set,
/// `default_version` is used.
pub fn resolve_lifecycle_uri(config: &LifecycleConfig, default_version: &str) -> Result<String> {
    let version = config.version.as_deref().filter(|v| !v.is_empty());
    let uri = config.uri.as_deref().filter(|u| !u.is_empty());

    match (version, uri) {
        (Some(_), Some(_)) => Err(PackError::Config(
            "'lifecycle' can only declare 'version' or 'uri', not both".to_string(),
        )),
        (Some(version), None) => {
            let version = semver::Version::parse(version).map_err(|e| {
                PackError::Config(format!("'lifecycle.version' must be a valid semver: {}", e))
            })?;
            Ok(uri_from_version(&version))
        }
        (None, Some(uri)) => Ok(uri.to_string()),
        (None, None) => Ok(uri_from_version(&semver::Version::parse(default_version)?)),
    }
}

/// Release archive URI of a lifecycle version.
pub fn uri_from_version(version: &semver::Version) -> String {
    format!(
        "https://github.com/buildpack/lifecycle/releases/download/v{v}/lifecycle-v{v}+linux.x86-64.tgz",
        v = version
    )
}
