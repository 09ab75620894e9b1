use crate::SchemaError;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::io::Read;

/// A single parsed Kubernetes manifest document.
///
/// Documents are kept as raw YAML values so that fields this tool does not
/// model pass through writes unchanged. Accessors extract the identifying
/// fields every stage dispatches on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(pub Value);

impl Document {
    pub fn api_version(&self) -> &str {
        str_at(&self.0, &["apiVersion"])
    }

    pub fn kind(&self) -> &str {
        str_at(&self.0, &["kind"])
    }

    pub fn name(&self) -> &str {
        str_at(&self.0, &["metadata", "name"])
    }

    /// Version component of the apiVersion, e.g. `v1` for `apps/v1`.
    pub fn version(&self) -> &str {
        let api_version = self.api_version();
        api_version
            .rsplit_once('/')
            .map_or(api_version, |(_, v)| v)
    }

    /// Walk a mapping path, returning `None` as soon as a key is missing.
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let mut current = &self.0;
        for key in path {
            current = current.get(key)?;
        }
        Some(current)
    }

    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(&self.0)?)
    }
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> &'a str {
    let mut current = value;
    for key in path {
        match current.get(key) {
            Some(next) => current = next,
            None => return "",
        }
    }
    current.as_str().unwrap_or("")
}

/// Parse a (possibly multi-document) YAML stream.
///
/// Empty documents (stray `---` separators, comment-only blocks) are skipped;
/// any malformed document fails the whole parse.
pub fn parse_documents_str(input: &str) -> Result<Vec<Document>, SchemaError> {
    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_str(input) {
        let value = Value::deserialize(de)?;
        if value.is_null() {
            continue;
        }
        docs.push(Document(value));
    }
    Ok(docs)
}

pub fn parse_documents_reader(mut reader: impl Read) -> Result<Vec<Document>, SchemaError> {
    let mut input = String::new();
    reader.read_to_string(&mut input)?;
    parse_documents_str(&input)
}
