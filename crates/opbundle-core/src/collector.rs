use crate::CoreError;
use opbundle_schema::{
    parse_documents_str, ClusterServiceVersion, Document, ScorecardConfig, SchemaError,
    CSV_KIND, SCORECARD_API_GROUP,
};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// The collected manifest set, partitioned by role.
///
/// Collection order is preserved within each partition so repeated runs over
/// the same inputs write the same bytes.
#[derive(Debug, Default)]
pub struct ManifestSet {
    /// Descriptor candidates. After base resolution at most one may remain.
    pub csvs: Vec<ClusterServiceVersion>,
    pub crds: Vec<Document>,
    /// Roles, bindings, service accounts, deployments, webhooks, services.
    pub others: Vec<Document>,
    pub scorecard: Option<ScorecardConfig>,
}

impl ManifestSet {
    pub fn from_reader(reader: impl Read) -> Result<Self, CoreError> {
        let mut set = ManifestSet::default();
        let docs = opbundle_schema::parse_documents_reader(reader)?;
        for doc in docs {
            set.absorb(doc)?;
        }
        Ok(set)
    }

    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, CoreError> {
        let mut set = ManifestSet::default();
        set.absorb_dir(dir.as_ref())?;
        Ok(set)
    }

    /// Merge two roots into one set, in argument order.
    pub fn from_dir_pair(
        first: impl AsRef<Path>,
        second: impl AsRef<Path>,
    ) -> Result<Self, CoreError> {
        let mut set = ManifestSet::default();
        set.absorb_dir(first.as_ref())?;
        set.absorb_dir(second.as_ref())?;
        Ok(set)
    }

    fn absorb_dir(&mut self, dir: &Path) -> Result<(), CoreError> {
        for path in yaml_files_under(dir)? {
            let content = fs::read_to_string(&path)?;
            let docs = match parse_documents_str(&content) {
                Ok(docs) => docs,
                Err(SchemaError::Parse(source)) => {
                    return Err(SchemaError::ParseAt { path, source }.into())
                }
                Err(e) => return Err(e.into()),
            };
            debug!("collected {} document(s) from {}", docs.len(), path.display());
            for doc in docs {
                self.absorb(doc)?;
            }
        }
        Ok(())
    }

    fn absorb(&mut self, doc: Document) -> Result<(), CoreError> {
        match doc.kind() {
            "" => {
                debug!("skipping document without a kind");
            }
            CSV_KIND => {
                self.csvs.push(ClusterServiceVersion::from_document(&doc)?);
            }
            "CustomResourceDefinition" => {
                self.crds.push(doc);
            }
            "Configuration" if doc.api_version().starts_with(SCORECARD_API_GROUP) => {
                if self.scorecard.is_some() {
                    warn!("multiple scorecard configurations collected; keeping the last");
                }
                self.scorecard = Some(ScorecardConfig::from_document(&doc)?);
            }
            _ => self.others.push(doc),
        }
        Ok(())
    }

    /// Plain-object documents of one kind, in collection order.
    pub fn documents_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Document> {
        self.others.iter().filter(move |d| d.kind() == kind)
    }
}

/// All `.yaml`/`.yml` files under a root, depth-first with sorted entries.
pub(crate) fn yaml_files_under(dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
    fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), CoreError> {
        let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|e| e.path())
            .collect();
        entries.sort();
        for path in entries {
            if path.is_dir() {
                walk(&path, out)?;
            } else if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml" | "yml")
            ) {
                out.push(path);
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    walk(dir, &mut files)?;
    Ok(files)
}
