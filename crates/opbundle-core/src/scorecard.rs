use crate::CoreError;
use opbundle_schema::ScorecardConfig;
use opbundle_store::{write_atomic, BundleLayout};
use std::fs;
use tracing::debug;

/// Persist the embedded test-harness configuration to its fixed sub-path
/// under the bundle root, creating parent directories as needed.
///
/// An absent or empty configuration is a silent no-op. Returns whether a
/// file was written.
pub fn write_scorecard_config(
    layout: &BundleLayout,
    config: Option<&ScorecardConfig>,
) -> Result<bool, CoreError> {
    let Some(config) = config else {
        return Ok(false);
    };
    if config.is_empty() {
        return Ok(false);
    }

    fs::create_dir_all(layout.scorecard_dir())?;
    let path = layout.scorecard_config_file();
    write_atomic(&path, config.to_yaml()?.as_bytes())?;
    debug!("wrote scorecard config to {}", path.display());
    Ok(true)
}
