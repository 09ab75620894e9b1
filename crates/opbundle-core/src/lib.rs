//! Bundle assembly pipeline for opbundle.
//!
//! This crate ties together schema parsing, the durable bundle directory,
//! and digest resolution into the `Pipeline`: input-source arbitration,
//! manifest collection, base template resolution, descriptor synthesis with
//! idempotent regeneration, bundle writing, image pinning, and metadata
//! generation.

pub mod base;
pub mod collector;
pub mod pinner;
pub mod pipeline;
pub mod related;
pub mod scorecard;
pub mod source;
pub mod synth;
pub mod writer;

pub use base::{base_csv_path, load_base, BaseOutcome};
pub use collector::ManifestSet;
pub use pinner::{pin_images, PinReport};
pub use pipeline::{BundleConfig, ManifestsReport, Pipeline};
pub use related::find_related_images;
pub use scorecard::write_scorecard_config;
pub use source::{InputSource, OutputSink, DEFAULT_ROOT_DIR};
pub use synth::CsvGenerator;
pub use writer::{object_file_name, write_objects_to_dir, write_objects_to_stream};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("schema error: {0}")]
    Schema(#[from] opbundle_schema::SchemaError),
    #[error("store error: {0}")]
    Store(#[from] opbundle_store::StoreError),
    #[error("registry error: {0}")]
    Registry(#[from] opbundle_registry::RegistryError),
    #[error("merge error: {0}")]
    Merge(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
