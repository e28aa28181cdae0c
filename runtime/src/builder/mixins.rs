//! Stack mixin reconciliation.

use std::collections::BTreeSet;

use a3s_pack_core::error::{PackError, Result};

use super::metadata::MIXINS_LABEL;
use crate::image::Image;

/// Union of build and run image mixins, without duplicates.
///
/// Mixin content is opaque; no requirement checks happen here.
pub fn merge_mixins(build: &[String], run: &[String]) -> Vec<String> {
    build
        .iter()
        .chain(run)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Mixins declared by `image`; an absent, empty or `null` label means none.
pub fn read_mixins(image: &dyn Image) -> Result<Vec<String>> {
    match image.label(MIXINS_LABEL)? {
        Some(raw) if !raw.trim().is_empty() => {
            let mixins: Option<Vec<String>> = serde_json::from_str(&raw).map_err(|e| {
                PackError::OciImage(format!(
                    "failed to decode label '{}' of image '{}': {}",
                    MIXINS_LABEL,
                    image.name(),
                    e
                ))
            })?;
            Ok(mixins.unwrap_or_default())
        }
        _ => Ok(Vec::new()),
    }
}
