//! OCI registry client for pulling and pushing images.
//!
//! Uses the `oci-distribution` crate to talk to container registries
//! (Docker Hub, GCR, private registries). Images move between the registry
//! and OCI image layouts on disk.

use std::path::Path;

use a3s_pack_core::error::{PackError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol, Config, ImageLayer, PushResponse};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::{ImageIndexEntry, OciImageManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference};

use crate::reference::ImageReference;

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Read `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`, falling back to anonymous.
    pub fn from_env() -> Self {
        match (
            std::env::var("REGISTRY_USERNAME").ok(),
            std::env::var("REGISTRY_PASSWORD").ok(),
        ) {
            (Some(username), Some(password)) => Self::basic(username, password),
            _ => Self::anonymous(),
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// Pulls images from container registries into OCI image layouts.
pub struct RegistryPuller {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryPuller {
    pub fn new(auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::HttpsExcept(vec!["localhost".to_string()]),
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        };

        Self {
            client: Client::new(config),
            auth,
        }
    }

    /// Pull an image and write it as an OCI image layout to `target_dir`.
    ///
    /// Returns the manifest digest. Unknown images fail with
    /// [`PackError::ImageNotFound`].
    pub async fn pull(&self, reference: &ImageReference, target_dir: &Path) -> Result<String> {
        let oci_ref = to_oci_reference(reference)?;

        tracing::debug!(
            reference = %reference,
            target = %target_dir.display(),
            "Pulling image from registry"
        );

        let blobs_dir = target_dir.join("blobs").join("sha256");
        std::fs::create_dir_all(&blobs_dir).map_err(|e| registry_error(reference, "create blobs directory", e))?;

        let auth = self.auth.to_oci_auth();
        let (manifest, manifest_digest) = self
            .client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| map_oci_error(reference, "pull manifest", e))?;

        let manifest_json = serde_json::to_vec(&manifest)?;
        std::fs::write(blobs_dir.join(hex_of(&manifest_digest)), &manifest_json)
            .map_err(|e| registry_error(reference, "write manifest", e))?;

        let mut config_data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &manifest.config, &mut config_data)
            .await
            .map_err(|e| map_oci_error(reference, "pull config blob", e))?;
        std::fs::write(blobs_dir.join(hex_of(&manifest.config.digest)), &config_data)
            .map_err(|e| registry_error(reference, "write config blob", e))?;

        for layer in &manifest.layers {
            tracing::debug!(digest = %layer.digest, size = layer.size, "Pulling layer");

            let mut layer_data: Vec<u8> = Vec::new();
            self.client
                .pull_blob(&oci_ref, layer, &mut layer_data)
                .await
                .map_err(|e| map_oci_error(reference, &format!("pull layer {}", layer.digest), e))?;
            std::fs::write(blobs_dir.join(hex_of(&layer.digest)), &layer_data)
                .map_err(|e| registry_error(reference, "write layer blob", e))?;
        }

        std::fs::write(
            target_dir.join("oci-layout"),
            r#"{"imageLayoutVersion":"1.0.0"}"#,
        )
        .map_err(|e| registry_error(reference, "write oci-layout", e))?;

        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [{
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": manifest_digest,
                "size": manifest_json.len()
            }]
        });
        std::fs::write(target_dir.join("index.json"), serde_json::to_string_pretty(&index)?)
            .map_err(|e| registry_error(reference, "write index.json", e))?;

        tracing::info!(reference = %reference, digest = %manifest_digest, "Image pulled");
        Ok(manifest_digest)
    }
}

/// Result of a successful image push.
#[derive(Debug, Clone)]
pub struct PushResult {
    /// URL of the pushed config blob.
    pub config_url: String,
    /// URL of the pushed manifest.
    pub manifest_url: String,
}

/// Pushes OCI image layouts to container registries.
pub struct RegistryPusher {
    client: Client,
    auth: RegistryAuth,
}

impl RegistryPusher {
    pub fn new(auth: RegistryAuth) -> Self {
        let config = ClientConfig {
            protocol: ClientProtocol::HttpsExcept(vec!["localhost".to_string()]),
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
        }
    }

    /// Push the OCI layout in `image_dir` to `reference`.
    pub async fn push(&self, reference: &ImageReference, image_dir: &Path) -> Result<PushResult> {
        let oci_ref = to_oci_reference(reference)?;

        tracing::info!(
            reference = %reference,
            source = %image_dir.display(),
            "Pushing image to registry"
        );

        let index: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(image_dir.join("index.json"))?)?;
        let manifest_digest = index["manifests"][0]["digest"]
            .as_str()
            .ok_or_else(|| PackError::OciImage("No manifest digest in index.json".to_string()))?;

        let blobs_dir = image_dir.join("blobs").join("sha256");
        let manifest: OciImageManifest =
            serde_json::from_slice(&std::fs::read(blobs_dir.join(hex_of(manifest_digest)))?)?;

        let config_data = std::fs::read(blobs_dir.join(hex_of(&manifest.config.digest)))?;
        let config = Config::new(config_data, manifest.config.media_type.clone(), None);

        let mut layers = Vec::with_capacity(manifest.layers.len());
        for layer_desc in &manifest.layers {
            let layer_data = std::fs::read(blobs_dir.join(hex_of(&layer_desc.digest))).map_err(|e| {
                PackError::OciImage(format!(
                    "Failed to read layer blob {}: {}",
                    layer_desc.digest, e
                ))
            })?;
            layers.push(ImageLayer::new(layer_data, layer_desc.media_type.clone(), None));
        }

        let auth = self.auth.to_oci_auth();
        let response: PushResponse = self
            .client
            .push(&oci_ref, &layers, config, &auth, Some(manifest))
            .await
            .map_err(|e| map_oci_error(reference, "push image", e))?;

        tracing::info!(
            reference = %reference,
            manifest_url = %response.manifest_url,
            "Image pushed"
        );

        Ok(PushResult {
            config_url: response.config_url,
            manifest_url: response.manifest_url,
        })
    }
}

fn hex_of(digest: &str) -> &str {
    digest.strip_prefix("sha256:").unwrap_or(digest)
}

fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = reference.full_reference();
    ref_str.parse::<Reference>().map_err(|e| {
        PackError::OciImage(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

fn registry_error(reference: &ImageReference, action: &str, err: impl std::fmt::Display) -> PackError {
    PackError::Registry {
        registry: reference.registry.clone(),
        message: format!("Failed to {}: {}", action, err),
    }
}

/// Map registry errors, separating "image does not exist" from other failures.
fn map_oci_error(reference: &ImageReference, action: &str, err: OciDistributionError) -> PackError {
    let not_found = match &err {
        OciDistributionError::ImageManifestNotFoundError(_) => true,
        OciDistributionError::ServerError { code, .. } => *code == 404,
        OciDistributionError::RegistryError { envelope, .. } => envelope.errors.iter().any(|e| {
            matches!(e.code, OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown)
        }),
        _ => false,
    };

    if not_found {
        PackError::ImageNotFound(reference.full_reference())
    } else {
        registry_error(reference, action, err)
    }
}

/// Select the linux image matching the host architecture from an index.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}
