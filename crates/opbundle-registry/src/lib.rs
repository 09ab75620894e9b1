//! Image digest resolution for opbundle.
//!
//! This crate provides the pinning capability: a `DigestResolver` trait
//! turning tag-qualified image references into digest-qualified ones, an
//! HTTP implementation speaking the registry v2 API, and a deterministic
//! map-backed implementation for tests and air-gapped use.

pub mod fixed;
pub mod http;

pub use fixed::FixedResolver;
pub use http::HttpResolver;

use opbundle_schema::ImageReference;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("failed to resolve '{reference}': {reason}")]
    Resolution { reference: String, reason: String },
    #[error("no digest known for '{0}'")]
    UnknownReference(String),
    #[error("unsupported resolver kind '{0}'")]
    UnknownResolverKind(String),
    #[error("invalid resolver option: {0}")]
    InvalidOption(String),
}

/// Capability to resolve a tag-qualified reference to its content digest.
///
/// Implementations must be idempotent: a reference that is already
/// digest-qualified passes through unchanged.
pub trait DigestResolver {
    fn resolve(&self, reference: &ImageReference) -> Result<ImageReference, RegistryError>;
}

/// Build a resolver from a string option map.
///
/// `kind` selects the implementation (`registry`, the default, or `fixed`).
/// The registry resolver honors `insecure=true` for plain-HTTP endpoints;
/// the fixed resolver takes its table from `pin.<reference>=<digest>`
/// entries.
pub fn resolver_from_options(
    options: &BTreeMap<String, String>,
) -> Result<Box<dyn DigestResolver>, RegistryError> {
    let kind = options.get("kind").map_or("registry", String::as_str);
    match kind {
        "registry" => {
            let insecure = match options.get("insecure").map(String::as_str) {
                None | Some("false") => false,
                Some("true") => true,
                Some(other) => {
                    return Err(RegistryError::InvalidOption(format!(
                        "insecure={other} (expected true or false)"
                    )))
                }
            };
            Ok(Box::new(HttpResolver::new(insecure)))
        }
        "fixed" => {
            let mut pins = BTreeMap::new();
            for (key, value) in options {
                if let Some(reference) = key.strip_prefix("pin.") {
                    pins.insert(reference.to_owned(), value.clone());
                }
            }
            Ok(Box::new(FixedResolver::new(pins)))
        }
        other => Err(RegistryError::UnknownResolverKind(other.to_owned())),
    }
}
