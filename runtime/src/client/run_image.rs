//! Run image selection for rebase.

use std::collections::HashMap;

use a3s_pack_core::error::{PackError, Result};

use crate::reference::domain_of;

/// Pick the run image for an application image.
///
/// An explicit `override_image` always wins. Otherwise the first candidate
/// on the same registry as `repo_name` is chosen, trying configured mirrors
/// of `label_run_image`, then the label mirrors, then `label_run_image`
/// itself. Without a domain match the label run image is the fallback.
pub fn resolve_run_image(
    repo_name: &str,
    label_run_image: &str,
    label_mirrors: &[String],
    override_image: Option<&str>,
    additional_mirrors: &HashMap<String, Vec<String>>,
) -> Result<String> {
    if let Some(image) = override_image.filter(|image| !image.is_empty()) {
        return Ok(image.to_string());
    }

    let repo_domain = domain_of(repo_name)?;

    let configured = if label_run_image.is_empty() {
        None
    } else {
        additional_mirrors.get(label_run_image)
    };

    let candidates = configured
        .into_iter()
        .flatten()
        .chain(label_mirrors)
        .map(String::as_str)
        .chain(Some(label_run_image).filter(|image| !image.is_empty()));

    for candidate in candidates {
        match domain_of(candidate) {
            Ok(domain) if domain == repo_domain => return Ok(candidate.to_string()),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(candidate = %candidate, error = %e, "Skipping invalid run image");
            }
        }
    }

    if label_run_image.is_empty() {
        return Err(PackError::MissingRunImage);
    }
    Ok(label_run_image.to_string())
}
