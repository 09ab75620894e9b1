use crate::layout::BundleLayout;
use crate::{write_atomic, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const MEDIATYPE_LABEL: &str = "operators.operatorframework.io.bundle.mediatype.v1";
pub const MANIFESTS_LABEL: &str = "operators.operatorframework.io.bundle.manifests.v1";
pub const METADATA_LABEL: &str = "operators.operatorframework.io.bundle.metadata.v1";
pub const PACKAGE_LABEL: &str = "operators.operatorframework.io.bundle.package.v1";
pub const CHANNELS_LABEL: &str = "operators.operatorframework.io.bundle.channels.v1";
pub const DEFAULT_CHANNEL_LABEL: &str = "operators.operatorframework.io.bundle.channel.default.v1";
pub const TEST_MEDIATYPE_LABEL: &str = "operators.operatorframework.io.test.mediatype.v1";
pub const TEST_CONFIG_LABEL: &str = "operators.operatorframework.io.test.config.v1";

const REGISTRY_V1_TYPE: &str = "registry+v1";
const SCORECARD_V1_TYPE: &str = "scorecard+v1";
const MANIFESTS_VALUE: &str = "manifests/";
const METADATA_VALUE: &str = "metadata/";
const SCORECARD_VALUE: &str = "tests/scorecard/";

/// On-disk shape of `metadata/annotations.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationsFile {
    pub annotations: BTreeMap<String, String>,
}

/// Result of a successful metadata probe.
#[derive(Debug, Clone)]
pub struct FoundMetadata {
    pub path: PathBuf,
    pub channels: Vec<String>,
    pub default_channel: Option<String>,
    pub annotations: BTreeMap<String, String>,
}

/// Probe a bundle root for existing metadata.
///
/// A missing annotations file is the soft `MetadataNotFound` outcome;
/// a file that exists but cannot be parsed, or parses without the channels
/// annotation, is a hard `InvalidMetadata` error.
pub fn find_metadata(root: &Path) -> Result<FoundMetadata, StoreError> {
    let candidate = BundleLayout::new(root).annotations_file();
    let path = if candidate.is_file() {
        candidate
    } else {
        scan_for_annotations(root)?.ok_or_else(|| StoreError::MetadataNotFound(root.to_path_buf()))?
    };

    let content = fs::read_to_string(&path)?;
    let file: AnnotationsFile =
        serde_yaml::from_str(&content).map_err(|e| StoreError::InvalidMetadata {
            path: path.clone(),
            reason: e.to_string(),
        })?;

    let Some(channels_raw) = file.annotations.get(CHANNELS_LABEL) else {
        return Err(StoreError::InvalidMetadata {
            path,
            reason: format!("missing annotation '{CHANNELS_LABEL}'"),
        });
    };
    let channels: Vec<String> = channels_raw
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_owned)
        .collect();
    let default_channel = file
        .annotations
        .get(DEFAULT_CHANNEL_LABEL)
        .filter(|c| !c.is_empty())
        .cloned();

    debug!("found bundle metadata at {}", path.display());
    Ok(FoundMetadata {
        path,
        channels,
        default_channel,
        annotations: file.annotations,
    })
}

/// Look one directory level below the root for an annotations.yaml, for
/// bundles whose metadata area uses a non-default directory name.
fn scan_for_annotations(root: &Path) -> Result<Option<PathBuf>, StoreError> {
    if !root.is_dir() {
        return Ok(None);
    }
    let mut subdirs: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            subdirs.push(entry.path());
        }
    }
    subdirs.sort();
    for subdir in subdirs {
        let candidate = subdir.join("annotations.yaml");
        if candidate.is_file() {
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Bundle-level metadata generator.
///
/// Writes `metadata/annotations.yaml` and the bundle Dockerfile, guarded by
/// the probe: existing metadata is left alone unless overwrite is requested.
#[derive(Debug, Clone)]
pub struct BundleMetadata {
    pub bundle_dir: PathBuf,
    pub package_name: String,
    pub channels: Vec<String>,
    pub default_channel: Option<String>,
    pub other_labels: BTreeMap<String, String>,
    pub scorecard_config_present: bool,
}

impl BundleMetadata {
    pub fn annotations(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(MEDIATYPE_LABEL.to_owned(), REGISTRY_V1_TYPE.to_owned());
        labels.insert(MANIFESTS_LABEL.to_owned(), MANIFESTS_VALUE.to_owned());
        labels.insert(METADATA_LABEL.to_owned(), METADATA_VALUE.to_owned());
        labels.insert(PACKAGE_LABEL.to_owned(), self.package_name.clone());
        // An empty channel list is accepted and serialized as-is.
        labels.insert(CHANNELS_LABEL.to_owned(), self.channels.join(","));
        if let Some(ref default) = self.default_channel {
            labels.insert(DEFAULT_CHANNEL_LABEL.to_owned(), default.clone());
        }
        if self.scorecard_config_present {
            labels.insert(TEST_MEDIATYPE_LABEL.to_owned(), SCORECARD_V1_TYPE.to_owned());
            labels.insert(TEST_CONFIG_LABEL.to_owned(), SCORECARD_VALUE.to_owned());
        }
        for (k, v) in &self.other_labels {
            labels.insert(k.clone(), v.clone());
        }
        labels
    }

    /// Generate metadata, honoring the overwrite guard.
    ///
    /// Returns `true` when files were written, `false` for the guarded
    /// no-op (metadata already present and overwrite not requested).
    pub fn generate(&self, overwrite: bool) -> Result<bool, StoreError> {
        match find_metadata(&self.bundle_dir) {
            Ok(found) if !overwrite => {
                info!(
                    "bundle metadata already present at {}; skipping (pass overwrite to regenerate)",
                    found.path.display()
                );
                return Ok(false);
            }
            Ok(_) => {}
            Err(e) if e.is_metadata_not_found() => {}
            Err(e) => return Err(e),
        }

        self.write()?;
        Ok(true)
    }

    /// Write the annotations document and Dockerfile unconditionally.
    ///
    /// Callers that probe a different root than they write to (regenerating
    /// into a fresh output directory from an existing bundle) run their own
    /// guard and then call this directly.
    pub fn write(&self) -> Result<(), StoreError> {
        let layout = BundleLayout::new(&self.bundle_dir);
        fs::create_dir_all(layout.metadata_dir())?;

        let file = AnnotationsFile {
            annotations: self.annotations(),
        };
        let content = serde_yaml::to_string(&file)?;
        write_atomic(&layout.annotations_file(), content.as_bytes())?;

        write_atomic(
            &layout.dockerfile_path(),
            self.dockerfile_contents().as_bytes(),
        )?;

        info!(
            "bundle metadata written to {}",
            layout.metadata_dir().display()
        );
        Ok(())
    }

    fn dockerfile_contents(&self) -> String {
        let mut out = String::from("FROM scratch\n\n");
        for (k, v) in self.annotations() {
            out.push_str(&format!("LABEL {k}={v}\n"));
        }
        out.push('\n');
        out.push_str("COPY manifests /manifests/\n");
        out.push_str("COPY metadata /metadata/\n");
        if self.scorecard_config_present {
            out.push_str("COPY tests/scorecard /tests/scorecard/\n");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(bundle_dir: &Path) -> BundleMetadata {
        BundleMetadata {
            bundle_dir: bundle_dir.to_path_buf(),
            package_name: "memcached-operator".to_owned(),
            channels: vec!["alpha".to_owned(), "stable".to_owned()],
            default_channel: Some("stable".to_owned()),
            other_labels: BTreeMap::new(),
            scorecard_config_present: false,
        }
    }

    #[test]
    fn generate_writes_annotations_and_dockerfile() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle");
        let meta = sample(&bundle);
        assert!(meta.generate(false).unwrap());

        let layout = BundleLayout::new(&bundle);
        let content = fs::read_to_string(layout.annotations_file()).unwrap();
        assert!(content.contains("operators.operatorframework.io.bundle.package.v1: memcached-operator"));
        assert!(content.contains("operators.operatorframework.io.bundle.channels.v1: alpha,stable"));

        let dockerfile = fs::read_to_string(layout.dockerfile_path()).unwrap();
        assert!(dockerfile.starts_with("FROM scratch"));
        assert!(dockerfile.contains("LABEL operators.operatorframework.io.bundle.mediatype.v1=registry+v1"));
        assert!(dockerfile.contains("COPY manifests /manifests/"));
        assert!(!dockerfile.contains("tests/scorecard"));
    }

    #[test]
    fn existing_metadata_without_overwrite_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle");
        let meta = sample(&bundle);
        assert!(meta.generate(false).unwrap());

        let layout = BundleLayout::new(&bundle);
        let before = fs::read_to_string(layout.annotations_file()).unwrap();

        let mut changed = sample(&bundle);
        changed.channels = vec!["beta".to_owned()];
        assert!(!changed.generate(false).unwrap());
        let after = fs::read_to_string(layout.annotations_file()).unwrap();
        assert_eq!(before, after, "guarded run must not touch existing metadata");
    }

    #[test]
    fn overwrite_replaces_existing_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle");
        sample(&bundle).generate(false).unwrap();

        let mut changed = sample(&bundle);
        changed.channels = vec!["beta".to_owned()];
        assert!(changed.generate(true).unwrap());

        let content = fs::read_to_string(BundleLayout::new(&bundle).annotations_file()).unwrap();
        assert!(content.contains("channels.v1: beta"));
    }

    #[test]
    fn malformed_existing_metadata_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle");
        let layout = BundleLayout::new(&bundle);
        fs::create_dir_all(layout.metadata_dir()).unwrap();
        fs::write(layout.annotations_file(), "annotations: [not a map").unwrap();

        let err = sample(&bundle).generate(false).unwrap_err();
        assert!(!err.is_metadata_not_found());
    }

    #[test]
    fn probe_distinguishes_absent_from_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_metadata(&dir.path().join("missing")).unwrap_err();
        assert!(err.is_metadata_not_found());

        let bundle = dir.path().join("bundle");
        let layout = BundleLayout::new(&bundle);
        fs::create_dir_all(layout.metadata_dir()).unwrap();
        fs::write(layout.annotations_file(), "annotations: {}").unwrap();
        let err = find_metadata(&bundle).unwrap_err();
        assert!(matches!(err, StoreError::InvalidMetadata { .. }));
    }

    #[test]
    fn probe_parses_channels_and_default() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle");
        sample(&bundle).generate(false).unwrap();

        let found = find_metadata(&bundle).unwrap();
        assert_eq!(found.channels, vec!["alpha", "stable"]);
        assert_eq!(found.default_channel.as_deref(), Some("stable"));
    }

    #[test]
    fn probe_accepts_empty_channel_list() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle");
        let mut meta = sample(&bundle);
        meta.channels = Vec::new();
        meta.default_channel = None;
        meta.generate(false).unwrap();

        let found = find_metadata(&bundle).unwrap();
        assert!(found.channels.is_empty());
        assert_eq!(found.default_channel, None);
    }

    #[test]
    fn probe_scans_nonstandard_metadata_dir() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle");
        let custom = bundle.join("custom-metadata");
        fs::create_dir_all(&custom).unwrap();
        fs::write(
            custom.join("annotations.yaml"),
            format!("annotations:\n  {CHANNELS_LABEL}: alpha\n"),
        )
        .unwrap();

        let found = find_metadata(&bundle).unwrap();
        assert_eq!(found.channels, vec!["alpha"]);
    }

    #[test]
    fn scorecard_labels_present_when_config_shipped() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("bundle");
        let mut meta = sample(&bundle);
        meta.scorecard_config_present = true;
        meta.generate(false).unwrap();

        let found = find_metadata(&bundle).unwrap();
        assert_eq!(
            found.annotations.get(TEST_CONFIG_LABEL).map(String::as_str),
            Some("tests/scorecard/")
        );
        let dockerfile =
            fs::read_to_string(BundleLayout::new(&bundle).dockerfile_path()).unwrap();
        assert!(dockerfile.contains("COPY tests/scorecard /tests/scorecard/"));
    }
}
