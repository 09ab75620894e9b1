//! Durable bundle directory layer for opbundle.
//!
//! This crate owns everything that persists between invocations: the
//! `BundleLayout` directory structure, atomic file writes, and the bundle
//! metadata document (`metadata/annotations.yaml`) with its probe and
//! overwrite guard.

pub mod layout;
pub mod metadata;

pub use layout::BundleLayout;
pub use metadata::{
    find_metadata, AnnotationsFile, BundleMetadata, FoundMetadata, CHANNELS_LABEL,
    DEFAULT_CHANNEL_LABEL, MANIFESTS_LABEL, MEDIATYPE_LABEL, METADATA_LABEL, PACKAGE_LABEL,
    TEST_CONFIG_LABEL, TEST_MEDIATYPE_LABEL,
};

use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("bundle I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),
    #[error("bundle metadata not found under {}", .0.display())]
    MetadataNotFound(PathBuf),
    #[error("invalid bundle metadata at {}: {reason}", path.display())]
    InvalidMetadata { path: PathBuf, reason: String },
}

impl StoreError {
    /// The probe's soft outcome: no metadata on disk, as opposed to
    /// metadata that exists but cannot be read.
    pub fn is_metadata_not_found(&self) -> bool {
        matches!(self, StoreError::MetadataNotFound(_))
    }
}

/// Fsync a directory to ensure that a preceding `rename()` is durable.
///
/// On Linux with ext4 `data=ordered` (the default), renames are usually
/// durable without an explicit dir fsync, but POSIX does not guarantee this.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write a file atomically: temp file in the destination directory, fsync,
/// rename over the target, fsync the directory.
pub fn write_atomic(dest: &Path, content: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut tmp = NamedTempFile::new_in(&dir)?;
    tmp.write_all(content)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(&dir)?;
    Ok(())
}
