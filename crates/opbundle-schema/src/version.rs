use crate::SchemaError;

/// Validate a bundle version string as strict semver.
pub fn validate_version(version: &str) -> Result<(), SchemaError> {
    semver::Version::parse(version)
        .map(|_| ())
        .map_err(|e| SchemaError::InvalidVersion {
            version: version.to_owned(),
            reason: e.to_string(),
        })
}
