use crate::csv::ObjectMeta;
use crate::document::Document;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;

/// API group marking a document as embedded test-harness configuration.
pub const SCORECARD_API_GROUP: &str = "scorecard.operatorframework.io";

/// Embedded test-harness configuration carried alongside the manifests.
///
/// Stages and test selectors are not interpreted here, only persisted. A
/// configuration with an empty `metadata.name` counts as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScorecardConfig {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ScorecardConfig {
    pub fn is_empty(&self) -> bool {
        self.metadata.name.is_empty()
    }

    pub fn from_document(doc: &Document) -> Result<Self, SchemaError> {
        Ok(serde_yaml::from_value(doc.0.clone())?)
    }

    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(self)?)
    }
}
