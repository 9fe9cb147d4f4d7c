//! Zip/tarball handling for plugin, theme and core packages.

use std::fs::{self, File};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use nix::unistd::{chown, Group, User};
use walkdir::WalkDir;

use crate::utils::errors::{AppError, Result};

/// Extract every entry of a zip into `dest`, overwriting existing files.
pub fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| AppError::Archive(format!("Failed to read zip {}: {}", archive_path.display(), e)))?;

    log::debug!("Extracting {} zip entries into {}", archive.len(), dest.display());
    archive
        .extract(dest)
        .map_err(|e| AppError::Archive(format!("Failed to extract {}: {}", archive_path.display(), e)))
}

pub fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(|e| AppError::Archive(format!("Failed to extract {}: {}", archive_path.display(), e)))
}

/// Pack `src_dir` into a gzipped tarball at `dest`, with the directory's own
/// name as the top-level entry. Symlinks are stored as links.
pub fn create_tar_gz(src_dir: &Path, dest: &Path) -> Result<()> {
    let top = src_dir
        .file_name()
        .ok_or_else(|| AppError::Archive(format!("Cannot archive {}", src_dir.display())))?;

    let encoder = GzEncoder::new(File::create(dest)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder
        .append_dir_all(top, src_dir)
        .map_err(|e| AppError::Archive(format!("Failed to archive {}: {}", src_dir.display(), e)))?;

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(())
}

/// `chown -R owner:group root`, without following symlinks.
pub fn chown_recursive(root: &Path, owner: Option<&str>, group: Option<&str>) -> Result<()> {
    let uid = match owner {
        Some(name) => Some(
            User::from_name(name)
                .map_err(|e| AppError::Internal(format!("Failed to look up user {}: {}", name, e)))?
                .ok_or_else(|| AppError::Parse(format!("Unknown user '{}'", name)))?
                .uid,
        ),
        None => None,
    };
    let gid = match group {
        Some(name) => Some(
            Group::from_name(name)
                .map_err(|e| AppError::Internal(format!("Failed to look up group {}: {}", name, e)))?
                .ok_or_else(|| AppError::Parse(format!("Unknown group '{}'", name)))?
                .gid,
        ),
        None => None,
    };

    if uid.is_none() && gid.is_none() {
        return Ok(());
    }

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if entry.path_is_symlink() {
            continue;
        }
        chown(entry.path(), uid, gid).map_err(|e| {
            AppError::Permission(format!("chown {} failed: {}", entry.path().display(), e))
        })?;
    }
    Ok(())
}

/// Remove a file or directory tree if it exists.
pub fn remove_path(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path)?,
        Ok(_) => fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}
