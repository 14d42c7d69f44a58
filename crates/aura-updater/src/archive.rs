//! Release archive extraction.
//!
//! Handles the two payload formats releases ship (`.zip`, `.tar.gz`) and
//! normalizes the common single-root-folder wrapping, where an archive
//! wraps all contents in a version-named directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tar::Archive;
use zip::ZipArchive;

use crate::error::UpdateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

pub fn detect_kind(file_name: &str) -> Option<ArchiveKind> {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".zip") {
        Some(ArchiveKind::Zip)
    } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
        Some(ArchiveKind::TarGz)
    } else {
        None
    }
}

/// Extract `archive_path` into `dest`, overwriting scratch contents.
pub fn extract(archive_path: &Path, dest: &Path) -> Result<(), UpdateError> {
    if !archive_path.exists() {
        return Err(UpdateError::Extraction(format!(
            "archive does not exist: {}",
            archive_path.display()
        )));
    }

    let file_name = archive_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let kind = detect_kind(file_name).ok_or_else(|| {
        UpdateError::Extraction(format!("unknown archive type: {file_name}"))
    })?;

    std::fs::create_dir_all(dest)
        .map_err(|e| UpdateError::Extraction(format!("cannot create scratch dir: {e}")))?;

    match kind {
        ArchiveKind::Zip => extract_zip(archive_path, dest),
        ArchiveKind::TarGz => extract_tar_gz(archive_path, dest),
    }
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<(), UpdateError> {
    let file = File::open(archive_path)
        .map_err(|e| UpdateError::Extraction(format!("cannot open archive: {e}")))?;
    let mut zip = ZipArchive::new(file)
        .map_err(|e| UpdateError::Extraction(format!("corrupt zip archive: {e}")))?;
    zip.extract(dest)
        .map_err(|e| UpdateError::Extraction(format!("zip extraction failed: {e}")))
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<(), UpdateError> {
    let file = File::open(archive_path)
        .map_err(|e| UpdateError::Extraction(format!("cannot open archive: {e}")))?;
    let mut tar = Archive::new(GzDecoder::new(file));
    tar.unpack(dest)
        .map_err(|e| UpdateError::Extraction(format!("tar extraction failed: {e}")))
}

/// The directory the new files actually live in. If extraction produced
/// exactly one top-level directory, that directory is the source root;
/// otherwise the extraction dir itself is.
pub fn effective_root(extract_dir: &Path) -> Result<PathBuf, UpdateError> {
    let entries: Vec<_> = std::fs::read_dir(extract_dir)
        .map_err(|e| UpdateError::Extraction(format!("cannot read scratch dir: {e}")))?
        .filter_map(|e| e.ok())
        .collect();

    if entries.len() == 1 && entries[0].path().is_dir() {
        Ok(entries[0].path())
    } else {
        Ok(extract_dir.to_path_buf())
    }
}
