use crate::StoreError;
use opbundle_schema::CSV_FILE_SUFFIX;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout of an on-disk bundle.
///
/// A bundle root holds a manifests area (descriptor plus one file per
/// object) and a metadata area (annotations document, optional scorecard
/// configuration under a fixed sub-directory). Sub-directories are created
/// lazily on [`initialize`](Self::initialize).
#[derive(Debug, Clone)]
pub struct BundleLayout {
    root: PathBuf,
}

impl BundleLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn manifests_dir(&self) -> PathBuf {
        self.root.join("manifests")
    }

    #[inline]
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join("metadata")
    }

    #[inline]
    pub fn annotations_file(&self) -> PathBuf {
        self.metadata_dir().join("annotations.yaml")
    }

    #[inline]
    pub fn scorecard_dir(&self) -> PathBuf {
        self.root.join("tests").join("scorecard")
    }

    #[inline]
    pub fn scorecard_config_file(&self) -> PathBuf {
        self.scorecard_dir().join("config.yaml")
    }

    /// Descriptor path for a package inside the manifests area.
    #[inline]
    pub fn csv_file(&self, package: &str) -> PathBuf {
        self.manifests_dir()
            .join(format!("{package}.{CSV_FILE_SUFFIX}"))
    }

    /// The bundle image Dockerfile, written as a sibling of the root so a
    /// `bundle/` directory gets a `bundle.Dockerfile` next to it.
    pub fn dockerfile_path(&self) -> PathBuf {
        let name = self
            .root
            .file_name()
            .map_or_else(|| "bundle".to_owned(), |n| n.to_string_lossy().into_owned());
        self.root
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{name}.Dockerfile"))
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.manifests_dir())?;
        fs::create_dir_all(self.metadata_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths_are_correct() {
        let layout = BundleLayout::new("/tmp/bundle");
        assert_eq!(layout.manifests_dir(), PathBuf::from("/tmp/bundle/manifests"));
        assert_eq!(layout.metadata_dir(), PathBuf::from("/tmp/bundle/metadata"));
        assert_eq!(
            layout.annotations_file(),
            PathBuf::from("/tmp/bundle/metadata/annotations.yaml")
        );
        assert_eq!(
            layout.scorecard_config_file(),
            PathBuf::from("/tmp/bundle/tests/scorecard/config.yaml")
        );
        assert_eq!(
            layout.csv_file("memcached-operator"),
            PathBuf::from(
                "/tmp/bundle/manifests/memcached-operator.clusterserviceversion.yaml"
            )
        );
        assert_eq!(
            layout.dockerfile_path(),
            PathBuf::from("/tmp/bundle.Dockerfile")
        );
    }

    #[test]
    fn initialize_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BundleLayout::new(dir.path().join("bundle"));
        layout.initialize().unwrap();
        assert!(layout.manifests_dir().is_dir());
        assert!(layout.metadata_dir().is_dir());
    }

    #[test]
    fn initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BundleLayout::new(dir.path().join("bundle"));
        layout.initialize().unwrap();
        layout.initialize().unwrap();
        assert!(layout.manifests_dir().is_dir());
    }
}
