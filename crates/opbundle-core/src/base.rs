use crate::CoreError;
use opbundle_schema::{parse_csv_file, ClusterServiceVersion, CSV_FILE_SUFFIX};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Outcome of base template resolution.
///
/// Absence and unreadability are deliberately distinct: a missing base means
/// the pipeline proceeds with an empty seed, while a base that exists but
/// does not parse is a hard error.
#[derive(Debug)]
pub enum BaseOutcome {
    Found(Box<ClusterServiceVersion>),
    NotFound,
}

/// Deterministic base template path for a package.
pub fn base_csv_path(template_root: &Path, package: &str) -> PathBuf {
    template_root
        .join("bases")
        .join(format!("{package}.{CSV_FILE_SUFFIX}"))
}

pub fn load_base(path: &Path) -> Result<BaseOutcome, CoreError> {
    if !path.is_file() {
        debug!("no base template at {}", path.display());
        return Ok(BaseOutcome::NotFound);
    }
    let csv = parse_csv_file(path)?;
    debug!("loaded base template from {}", path.display());
    Ok(BaseOutcome::Found(Box::new(csv)))
}
