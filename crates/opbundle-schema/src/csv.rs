use crate::document::Document;
use crate::SchemaError;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

pub const CSV_API_VERSION: &str = "operators.coreos.com/v1alpha1";
pub const CSV_KIND: &str = "ClusterServiceVersion";

/// File suffix for descriptor files, both in bundles and base template dirs.
pub const CSV_FILE_SUFFIX: &str = "clusterserviceversion.yaml";

/// The one annotation the idempotency comparison ignores.
pub const CREATED_AT_ANNOTATION: &str = "createdAt";

/// Typed ClusterServiceVersion descriptor.
///
/// Only fields the synthesizer reads or owns are modeled; everything else
/// rides along in `extra` maps so hand-authored content in a base template
/// survives regeneration byte-for-byte.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersion {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: CsvSpec,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub icon: Vec<Icon>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub maturity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub min_kube_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub replaces: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install_modes: Vec<InstallMode>,
    #[serde(default, skip_serializing_if = "InstallStrategy::is_empty")]
    pub install: InstallStrategy,
    #[serde(
        default,
        rename = "customresourcedefinitions",
        skip_serializing_if = "CustomResourceDefinitions::is_empty"
    )]
    pub customresourcedefinitions: CustomResourceDefinitions,
    #[serde(
        default,
        rename = "webhookdefinitions",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub webhookdefinitions: Vec<WebhookDescription>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_images: Vec<RelatedImage>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Icon {
    #[serde(default)]
    pub base64data: String,
    #[serde(default)]
    pub mediatype: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Link {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Maintainer {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallMode {
    #[serde(rename = "type")]
    pub mode: String,
    pub supported: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallStrategy {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub strategy: String,
    #[serde(default, skip_serializing_if = "StrategyDetails::is_empty")]
    pub spec: StrategyDetails,
}

impl InstallStrategy {
    pub fn is_empty(&self) -> bool {
        self.strategy.is_empty() && self.spec.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDetails {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deployments: Vec<DeploymentSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<PermissionSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cluster_permissions: Vec<PermissionSpec>,
}

impl StrategyDetails {
    pub fn is_empty(&self) -> bool {
        self.deployments.is_empty()
            && self.permissions.is_empty()
            && self.cluster_permissions.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeploymentSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<Value>,
    #[serde(default)]
    pub spec: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionSpec {
    #[serde(default)]
    pub service_account_name: String,
    #[serde(default)]
    pub rules: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomResourceDefinitions {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owned: Vec<CrdDescription>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<CrdDescription>,
}

impl CustomResourceDefinitions {
    pub fn is_empty(&self) -> bool {
        self.owned.is_empty() && self.required.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrdDescription {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

/// A named image reference declared by the descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedImage {
    pub name: String,
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookDescription {
    #[serde(rename = "type")]
    pub admission_type: String,
    #[serde(default)]
    pub generate_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub deployment_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_port: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub side_effects: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admission_review_versions: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_path: Option<String>,
}

impl ClusterServiceVersion {
    pub fn from_document(doc: &Document) -> Result<Self, SchemaError> {
        Ok(serde_yaml::from_value(doc.0.clone())?)
    }

    pub fn to_yaml(&self) -> Result<String, SchemaError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// The descriptor as a raw value, for field-level comparison.
    pub fn to_value(&self) -> Result<Value, SchemaError> {
        Ok(serde_yaml::to_value(self)?)
    }
}

pub fn parse_csv_str(input: &str) -> Result<ClusterServiceVersion, SchemaError> {
    Ok(serde_yaml::from_str(input)?)
}

pub fn parse_csv_file(path: impl AsRef<Path>) -> Result<ClusterServiceVersion, SchemaError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|source| SchemaError::ParseAt {
        path: path.to_path_buf(),
        source,
    })
}
