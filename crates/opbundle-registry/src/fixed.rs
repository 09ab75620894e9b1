use crate::{DigestResolver, RegistryError};
use opbundle_schema::ImageReference;
use std::collections::BTreeMap;

/// Map-backed resolver with a fixed reference -> digest table.
///
/// Deterministic by construction, so it doubles as the test resolver and as
/// an offline resolver for air-gapped pipelines.
#[derive(Debug, Default)]
pub struct FixedResolver {
    pins: BTreeMap<String, String>,
}

impl FixedResolver {
    pub fn new(pins: BTreeMap<String, String>) -> Self {
        Self { pins }
    }
}

impl DigestResolver for FixedResolver {
    fn resolve(&self, reference: &ImageReference) -> Result<ImageReference, RegistryError> {
        if reference.is_pinned() {
            return Ok(reference.clone());
        }
        match self.pins.get(&reference.to_string()) {
            Some(digest) => Ok(reference.pinned(digest)),
            None => Err(RegistryError::UnknownReference(reference.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> FixedResolver {
        let mut pins = BTreeMap::new();
        pins.insert(
            "quay.io/example/app:v1".to_owned(),
            "sha256:1111".to_owned(),
        );
        FixedResolver::new(pins)
    }

    #[test]
    fn resolves_known_reference() {
        let reference: ImageReference = "quay.io/example/app:v1".parse().unwrap();
        let pinned = resolver().resolve(&reference).unwrap();
        assert_eq!(pinned.to_string(), "quay.io/example/app@sha256:1111");
    }

    #[test]
    fn pinned_reference_passes_through() {
        let reference: ImageReference = "quay.io/example/app@sha256:9999".parse().unwrap();
        let out = resolver().resolve(&reference).unwrap();
        assert_eq!(out, reference);
    }

    #[test]
    fn unknown_reference_fails() {
        let reference: ImageReference = "quay.io/example/other:v2".parse().unwrap();
        assert!(matches!(
            resolver().resolve(&reference),
            Err(RegistryError::UnknownReference(_))
        ));
    }
}
