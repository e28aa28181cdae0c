//! Image reference parsing.
//!
//! Parses references like `registry.example.com/cnbs/run:bionic` into
//! registry, repository, tag and digest, and exposes the registry domain used
//! for run image mirror selection.

use a3s_pack_core::error::{PackError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Aliases of the default public registry.
const DEFAULT_REGISTRY_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "gcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/ubuntu", "cnbs/run")
    pub repository: String,
    /// Tag (e.g., "latest", "bionic")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `ubuntu` → docker.io/library/ubuntu:latest
    /// - `cnbs/run:bionic` → docker.io/cnbs/run:bionic
    /// - `gcr.io/org/image:tag` → gcr.io/org/image:tag
    /// - `localhost:5000/image@sha256:abc...` → localhost:5000/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(PackError::OciImage("Empty image reference".to_string()));
        }

        let (name_tag, digest) = match reference.rsplit_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(PackError::OciImage(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        if name.is_empty() || tag.is_some_and(str::is_empty) {
            return Err(PackError::OciImage(format!(
                "Invalid image reference '{}'",
                reference
            )));
        }

        let (registry, repository) = split_registry_repository(name)?;

        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Registry domain; empty for the default public registry.
    pub fn domain(&self) -> &str {
        if DEFAULT_REGISTRY_ALIASES.contains(&self.registry.as_str()) {
            ""
        } else {
            &self.registry
        }
    }

    /// `registry/repository`, without tag or digest.
    pub fn context(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// `registry/repository@digest` for a manifest digest.
    pub fn with_digest(&self, digest: &str) -> String {
        format!("{}@{}", self.context(), digest)
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.context();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ImageReference {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Registry domain of a reference string; empty for the default registry.
pub fn domain_of(reference: &str) -> Result<String> {
    Ok(ImageReference::parse(reference)?.domain().to_string())
}

/// Split `name[:tag]`. A colon in the first path component is a registry
/// port, not a tag.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_component_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    match name_tag[last_component_start..].rfind(':') {
        Some(colon) => {
            let colon = last_component_start + colon;
            let after = &name_tag[colon + 1..];
            // `host:5000` with no path is a registry, not `name:tag`
            if last_component_start == 0
                && !after.is_empty()
                && after.chars().all(|c| c.is_ascii_digit())
                && name_tag[..colon].contains('.')
            {
                (name_tag, None)
            } else {
                (&name_tag[..colon], Some(after))
            }
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(name: &str) -> Result<(String, String)> {
    // The first component is a registry if it looks like a hostname
    if let Some((first, rest)) = name.split_once('/') {
        if first.contains('.') || first.contains(':') || first == "localhost" {
            if rest.is_empty() {
                return Err(PackError::OciImage(format!(
                    "Empty repository in reference '{}'",
                    name
                )));
            }
            return Ok((first.to_string(), rest.to_string()));
        }
    }

    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}
