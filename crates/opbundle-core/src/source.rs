use crate::CoreError;
use std::path::{Path, PathBuf};

/// Default bundle root when no output directory is given.
pub const DEFAULT_ROOT_DIR: &str = "bundle";

/// Where manifests come from. Resolved exactly once, before any I/O, so a
/// misconfiguration is reported before collection starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    /// A piped stream (stdin in the CLI).
    Stream,
    /// A single directory scanned recursively.
    Dir(PathBuf),
    /// The legacy deploy/CRDs directory pair, merged into one set.
    LegacyPair {
        deploy_dir: PathBuf,
        crds_dir: PathBuf,
    },
}

impl InputSource {
    /// Arbitrate the three mutually exclusive sources.
    ///
    /// Exactly one of piped input, the input directory, or the legacy
    /// directory flags must be in play. A single legacy directory is
    /// reinterpreted as the general input-directory case.
    pub fn resolve(
        piped: bool,
        input_dir: Option<&Path>,
        deploy_dir: Option<&Path>,
        crds_dir: Option<&Path>,
    ) -> Result<Self, CoreError> {
        let is_input_dir = input_dir.is_some();
        let is_legacy = deploy_dir.is_some() || crds_dir.is_some();

        if !(piped || is_input_dir || is_legacy) {
            return Err(CoreError::Config(
                "one of piped input, an input directory, or a deploy directory \
                 (optionally with a CRDs directory) must be provided"
                    .to_owned(),
            ));
        }
        if piped && (is_input_dir || is_legacy) {
            return Err(CoreError::Config(
                "no directory flags may be set when reading piped input".to_owned(),
            ));
        }
        if is_input_dir && is_legacy {
            return Err(CoreError::Config(
                "an input directory cannot be combined with deploy/CRDs directories".to_owned(),
            ));
        }

        if piped {
            return Ok(InputSource::Stream);
        }
        if let Some(dir) = input_dir {
            return Ok(InputSource::Dir(dir.to_path_buf()));
        }
        match (deploy_dir, crds_dir) {
            (Some(deploy), Some(crds)) => Ok(InputSource::LegacyPair {
                deploy_dir: deploy.to_path_buf(),
                crds_dir: crds.to_path_buf(),
            }),
            (Some(dir), None) | (None, Some(dir)) => Ok(InputSource::Dir(dir.to_path_buf())),
            (None, None) => unreachable!("is_legacy checked above"),
        }
    }
}

/// Where the assembled bundle goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSink {
    /// A single multiplexed stream (stdout in the CLI). Never touches the
    /// filesystem.
    Stream,
    /// A bundle root directory.
    Directory(PathBuf),
}

impl OutputSink {
    pub fn resolve(stdout: bool, output_dir: Option<&Path>) -> Result<Self, CoreError> {
        if stdout {
            if output_dir.is_some() {
                return Err(CoreError::Config(
                    "an output directory cannot be set when writing to stdout".to_owned(),
                ));
            }
            return Ok(OutputSink::Stream);
        }
        Ok(OutputSink::Directory(
            output_dir.map_or_else(|| PathBuf::from(DEFAULT_ROOT_DIR), Path::to_path_buf),
        ))
    }
}
