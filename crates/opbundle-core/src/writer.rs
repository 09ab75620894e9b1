use crate::CoreError;
use opbundle_schema::Document;
use opbundle_store::write_atomic;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Deterministic file name for an object: lowercase kind and API version
/// keyed by the object name, e.g.
/// `memcached-operator-controller-manager_v1_deployment.yaml`.
pub fn object_file_name(doc: &Document) -> String {
    format!(
        "{}_{}_{}.yaml",
        doc.name(),
        doc.version(),
        doc.kind().to_lowercase()
    )
}

/// Write one file per object into the manifests directory, creating it as
/// needed. Returns the paths written, in declaration order.
pub fn write_objects_to_dir(
    dir: &Path,
    docs: &[&Document],
) -> Result<Vec<PathBuf>, CoreError> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(docs.len());
    for doc in docs {
        let path = dir.join(object_file_name(doc));
        write_atomic(&path, doc.to_yaml()?.as_bytes())?;
        debug!("wrote {}", path.display());
        written.push(path);
    }
    Ok(written)
}

/// Multiplex objects onto one stream, `---` delimited, in declaration
/// order. Never touches the filesystem.
pub fn write_objects_to_stream(
    out: &mut dyn Write,
    docs: &[&Document],
) -> Result<(), CoreError> {
    for doc in docs {
        write_yaml_document(out, &doc.to_yaml()?)?;
    }
    Ok(())
}

pub(crate) fn write_yaml_document(out: &mut dyn Write, rendered: &str) -> Result<(), CoreError> {
    out.write_all(b"---\n")?;
    out.write_all(rendered.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opbundle_schema::parse_documents_str;

    fn docs() -> Vec<Document> {
        parse_documents_str(
            r"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: operator-controller-manager
spec:
  replicas: 1
---
apiVersion: v1
kind: ServiceAccount
metadata:
  name: operator-sa
",
        )
        .unwrap()
    }

    #[test]
    fn object_file_names_are_deterministic() {
        let docs = docs();
        assert_eq!(
            object_file_name(&docs[0]),
            "operator-controller-manager_v1_deployment.yaml"
        );
        assert_eq!(object_file_name(&docs[1]), "operator-sa_v1_serviceaccount.yaml");
    }

    #[test]
    fn directory_mode_writes_one_file_per_object() {
        let dir = tempfile::tempdir().unwrap();
        let manifests = dir.path().join("bundle").join("manifests");
        let docs = docs();
        let refs: Vec<&Document> = docs.iter().collect();
        let written = write_objects_to_dir(&manifests, &refs).unwrap();
        assert_eq!(written.len(), 2);
        assert!(manifests
            .join("operator-controller-manager_v1_deployment.yaml")
            .is_file());
        let content =
            fs::read_to_string(manifests.join("operator-sa_v1_serviceaccount.yaml")).unwrap();
        assert!(content.contains("kind: ServiceAccount"));
    }

    #[test]
    fn stream_mode_delimits_in_declaration_order() {
        let docs = docs();
        let refs: Vec<&Document> = docs.iter().collect();
        let mut out = Vec::new();
        write_objects_to_stream(&mut out, &refs).unwrap();
        let text = String::from_utf8(out).unwrap();
        let deployment = text.find("kind: Deployment").unwrap();
        let account = text.find("kind: ServiceAccount").unwrap();
        assert!(deployment < account);
        assert_eq!(text.matches("---\n").count(), 2);
    }
}
