//! Tar layer construction helpers.
//!
//! Layers are written as uncompressed tars with relative entry paths and a
//! zero mtime; [`crate::image::Image::add_layer`] compresses them.

use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use a3s_pack_core::error::Result;

/// Ownership applied to entries of a generated layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Owner {
    pub uid: u64,
    pub gid: u64,
}

/// Strip `./`, `..` and leading `/` so archive paths compare equal to plain ones.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| matches!(c, Component::Normal(_)))
        .collect()
}

/// Relative in-archive path for an absolute image path.
pub(crate) fn layer_path(path: &str) -> PathBuf {
    normalize(Path::new(path))
}

/// Append a directory entry.
pub(crate) fn append_dir<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    owner: Owner,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_mtime(0);
    header.set_uid(owner.uid);
    header.set_gid(owner.gid);
    builder.append_data(&mut header, path, std::io::empty())?;
    Ok(())
}

/// Append root-owned entries for every proper ancestor of `path`.
pub(crate) fn append_parent_dirs<W: Write>(builder: &mut tar::Builder<W>, path: &Path) -> Result<()> {
    let mut current = PathBuf::new();
    let components: Vec<_> = path.components().collect();
    for component in components.iter().take(components.len().saturating_sub(1)) {
        current.push(component);
        append_dir(builder, &current, Owner::default())?;
    }
    Ok(())
}

/// Write a tar at `out` holding in-memory files at absolute image paths.
pub(crate) fn write_files_layer(files: &[(&str, &[u8])], out: &Path) -> Result<()> {
    let mut builder = tar::Builder::new(File::create(out)?);
    for (path, data) in files {
        let path = layer_path(path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            append_parent_dirs(&mut builder, parent)?;
            append_dir(&mut builder, parent, Owner::default())?;
        }

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        builder.append_data(&mut header, &path, *data)?;
    }
    builder.into_inner()?.sync_all()?;
    Ok(())
}

/// Write a tar at `out` holding empty directories with the given owners.
pub(crate) fn write_dirs_layer(dirs: &[(&str, Owner)], out: &Path) -> Result<()> {
    let mut builder = tar::Builder::new(File::create(out)?);
    for (path, owner) in dirs {
        let path = layer_path(path);
        append_parent_dirs(&mut builder, &path)?;
        append_dir(&mut builder, &path, *owner)?;
    }
    builder.into_inner()?.sync_all()?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn entry_paths(layer: &Path) -> Vec<String> {
    let mut archive = tar::Archive::new(File::open(layer).unwrap());
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
        .collect()
}
