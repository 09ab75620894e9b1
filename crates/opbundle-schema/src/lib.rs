//! Document model and parsing for opbundle.
//!
//! This crate defines the schema layer: generic Kubernetes manifest documents
//! (`Document`) with multi-document YAML parsing, the typed
//! `ClusterServiceVersion` descriptor, image pull-spec references
//! (`ImageReference`), the embedded scorecard configuration, and semantic
//! version validation.

pub mod csv;
pub mod document;
pub mod image;
pub mod scorecard;
pub mod version;

pub use csv::{
    parse_csv_file, parse_csv_str, ClusterServiceVersion, CrdDescription, CsvSpec,
    CustomResourceDefinitions, DeploymentSpec, InstallMode, InstallStrategy, ObjectMeta,
    PermissionSpec, RelatedImage, StrategyDetails, WebhookDescription, CREATED_AT_ANNOTATION,
    CSV_API_VERSION, CSV_FILE_SUFFIX, CSV_KIND,
};
pub use document::{parse_documents_reader, parse_documents_str, Document};
pub use image::ImageReference;
pub use scorecard::{ScorecardConfig, SCORECARD_API_GROUP};
pub use version::validate_version;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read manifest: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("failed to parse manifest {}: {source}", path.display())]
    ParseAt {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("invalid image reference '{0}'")]
    InvalidImageReference(String),
    #[error("invalid semantic version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },
}
