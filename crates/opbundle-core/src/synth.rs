use crate::collector::ManifestSet;
use crate::CoreError;
use chrono::{SecondsFormat, Utc};
use opbundle_schema::{
    ClusterServiceVersion, CrdDescription, DeploymentSpec, Document, InstallStrategy,
    PermissionSpec, RelatedImage, SchemaError, StrategyDetails, WebhookDescription,
    CREATED_AT_ANNOTATION, CSV_API_VERSION, CSV_KIND,
};
use opbundle_store::{write_atomic, BundleLayout};
use serde_yaml::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use tracing::{debug, info};

/// Descriptor synthesizer.
///
/// Merges the collected manifest set, the optional seed, and the related
/// image list into the final ClusterServiceVersion. Derived fields (owned
/// CRDs, install strategy, webhooks, version, related images) always replace
/// prior values; hand-authored metadata from the seed is never touched.
pub struct CsvGenerator<'a> {
    pub package: &'a str,
    pub version: Option<&'a str>,
    pub annotations: &'a BTreeMap<String, String>,
    pub extra_service_accounts: &'a [String],
    pub related_images: &'a [RelatedImage],
}

impl CsvGenerator<'_> {
    pub fn synthesize(&self, set: &ManifestSet) -> Result<ClusterServiceVersion, CoreError> {
        let mut csv = match set.csvs.len() {
            0 => ClusterServiceVersion::default(),
            1 => set.csvs[0].clone(),
            n => {
                return Err(CoreError::Merge(format!(
                    "{n} descriptor candidates found after base resolution; at most one may be provided"
                )))
            }
        };
        let seed_owned = csv.spec.customresourcedefinitions.owned.clone();

        csv.api_version = CSV_API_VERSION.to_owned();
        csv.kind = CSV_KIND.to_owned();

        let version = match self.version {
            Some(v) if !v.is_empty() => v.to_owned(),
            _ if !csv.spec.version.is_empty() => csv.spec.version.clone(),
            _ => {
                return Err(CoreError::Merge(
                    "a bundle version is required: none was given and the seed descriptor \
                     declares none"
                        .to_owned(),
                ))
            }
        };
        csv.metadata.name = format!("{}.v{version}", self.package);
        csv.spec.version = version;
        if csv.spec.display_name.is_empty() {
            csv.spec.display_name = display_name_from_package(self.package);
        }

        for (key, value) in self.annotations {
            csv.metadata.annotations.insert(key.clone(), value.clone());
        }
        csv.metadata.annotations.insert(
            CREATED_AT_ANNOTATION.to_owned(),
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        csv.spec.customresourcedefinitions.owned = derive_owned_crds(set, &seed_owned);
        csv.spec.install = derive_install(set, self.extra_service_accounts);
        csv.spec.webhookdefinitions = derive_webhooks(set);
        csv.spec.related_images = self.related_images.to_vec();

        Ok(csv)
    }

    /// Write the descriptor into the bundle's manifests area.
    ///
    /// With `ignore_created_at_only` set and a previously written descriptor
    /// on disk, the old and new documents are compared with the `createdAt`
    /// annotation cleared on both sides; when that is the only difference
    /// the existing file is kept byte-for-byte and nothing is written.
    /// Returns whether the descriptor was (re)written.
    pub fn write_to_dir(
        &self,
        csv: &ClusterServiceVersion,
        layout: &BundleLayout,
        ignore_created_at_only: bool,
    ) -> Result<bool, CoreError> {
        let path = layout.csv_file(self.package);

        if ignore_created_at_only && path.is_file() {
            let existing_text = fs::read_to_string(&path)?;
            let mut existing: Value =
                serde_yaml::from_str(&existing_text).map_err(|source| SchemaError::ParseAt {
                    path: path.clone(),
                    source,
                })?;
            let mut fresh = csv.to_value()?;
            clear_created_at(&mut existing);
            clear_created_at(&mut fresh);
            if existing == fresh {
                info!(
                    "descriptor unchanged except {CREATED_AT_ANNOTATION}; keeping {}",
                    path.display()
                );
                return Ok(false);
            }
            debug!("descriptor content changed; rewriting {}", path.display());
        }

        fs::create_dir_all(layout.manifests_dir())?;
        write_atomic(&path, csv.to_yaml()?.as_bytes())?;
        Ok(true)
    }
}

/// Remove the volatile timestamp annotation, dropping the annotations map
/// entirely when that leaves it empty so both sides normalize the same way.
fn clear_created_at(value: &mut Value) {
    let Some(metadata) = value.get_mut("metadata").and_then(Value::as_mapping_mut) else {
        return;
    };
    let annotations_key = Value::from("annotations");
    if let Some(annotations) = metadata
        .get_mut(&annotations_key)
        .and_then(Value::as_mapping_mut)
    {
        annotations.remove(CREATED_AT_ANNOTATION);
        if annotations.is_empty() {
            metadata.remove(&annotations_key);
        }
    }
}

fn display_name_from_package(package: &str) -> String {
    package
        .split(['-', '_', '.'])
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn derive_owned_crds(set: &ManifestSet, seed_owned: &[CrdDescription]) -> Vec<CrdDescription> {
    let mut owned: Vec<CrdDescription> = set
        .crds
        .iter()
        .map(|crd| {
            let mut description = CrdDescription {
                name: crd.name().to_owned(),
                version: crd_storage_version(crd),
                kind: crd
                    .get(&["spec", "names", "kind"])
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_owned(),
                ..CrdDescription::default()
            };
            // Display names and descriptions are hand-authored; carry them
            // over from a matching seed entry.
            if let Some(prior) = seed_owned.iter().find(|p| p.name == description.name) {
                description.display_name = prior.display_name.clone();
                description.description = prior.description.clone();
            }
            description
        })
        .collect();
    owned.sort_by(|a, b| a.name.cmp(&b.name));
    owned
}

fn crd_storage_version(crd: &Document) -> String {
    if let Some(versions) = crd.get(&["spec", "versions"]).and_then(Value::as_sequence) {
        let storage = versions
            .iter()
            .find(|v| v.get("storage").and_then(Value::as_bool) == Some(true))
            .or_else(|| versions.first());
        if let Some(name) = storage.and_then(|v| v.get("name")).and_then(Value::as_str) {
            return name.to_owned();
        }
    }
    // apiextensions v1beta1 single-version form
    crd.get(&["spec", "version"])
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_owned()
}

fn derive_install(set: &ManifestSet, extra_service_accounts: &[String]) -> InstallStrategy {
    let deployments: Vec<DeploymentSpec> = set
        .documents_of_kind("Deployment")
        .map(|doc| DeploymentSpec {
            name: doc.name().to_owned(),
            label: doc
                .get(&["metadata", "labels"])
                .filter(|labels| labels.as_mapping().is_some_and(|m| !m.is_empty()))
                .cloned(),
            spec: doc.get(&["spec"]).cloned().unwrap_or(Value::Null),
        })
        .collect();

    let mut accounts: BTreeSet<String> = set
        .documents_of_kind("Deployment")
        .filter_map(|doc| {
            doc.get(&["spec", "template", "spec", "serviceAccountName"])
                .and_then(Value::as_str)
                .map(str::to_owned)
        })
        .collect();
    accounts.extend(extra_service_accounts.iter().cloned());

    InstallStrategy {
        strategy: "deployment".to_owned(),
        spec: StrategyDetails {
            deployments,
            permissions: bind_rules(set, &accounts, "RoleBinding", "Role"),
            cluster_permissions: bind_rules(set, &accounts, "ClusterRoleBinding", "ClusterRole"),
        },
    }
}

/// Join bindings to their roles: every ServiceAccount subject belonging to
/// the operator contributes the bound role's rules.
fn bind_rules(
    set: &ManifestSet,
    accounts: &BTreeSet<String>,
    binding_kind: &str,
    role_kind: &str,
) -> Vec<PermissionSpec> {
    let mut specs: Vec<PermissionSpec> = Vec::new();
    for binding in set.documents_of_kind(binding_kind) {
        if binding.get(&["roleRef", "kind"]).and_then(Value::as_str) != Some(role_kind) {
            continue;
        }
        let Some(role_name) = binding.get(&["roleRef", "name"]).and_then(Value::as_str) else {
            continue;
        };
        let Some(subjects) = binding.get(&["subjects"]).and_then(Value::as_sequence) else {
            continue;
        };
        for subject in subjects {
            if subject.get("kind").and_then(Value::as_str) != Some("ServiceAccount") {
                continue;
            }
            let Some(account) = subject.get("name").and_then(Value::as_str) else {
                continue;
            };
            if !accounts.contains(account) {
                continue;
            }
            let Some(role) = set
                .documents_of_kind(role_kind)
                .find(|r| r.name() == role_name)
            else {
                continue;
            };
            specs.push(PermissionSpec {
                service_account_name: account.to_owned(),
                rules: role
                    .get(&["rules"])
                    .cloned()
                    .unwrap_or_else(|| Value::Sequence(Vec::new())),
            });
        }
    }
    specs.sort_by(|a, b| a.service_account_name.cmp(&b.service_account_name));
    specs
}

fn derive_webhooks(set: &ManifestSet) -> Vec<WebhookDescription> {
    let deployment_names: Vec<String> = set
        .documents_of_kind("Deployment")
        .map(|d| d.name().to_owned())
        .collect();

    let mut hooks = Vec::new();
    for (kind, admission_type) in [
        ("ValidatingWebhookConfiguration", "ValidatingAdmissionWebhook"),
        ("MutatingWebhookConfiguration", "MutatingAdmissionWebhook"),
    ] {
        for doc in set.documents_of_kind(kind) {
            let Some(entries) = doc.get(&["webhooks"]).and_then(Value::as_sequence) else {
                continue;
            };
            for hook in entries {
                let service = hook
                    .get("clientConfig")
                    .and_then(|config| config.get("service"));
                let service_name = service
                    .and_then(|s| s.get("name"))
                    .and_then(Value::as_str);
                hooks.push(WebhookDescription {
                    admission_type: admission_type.to_owned(),
                    generate_name: hook
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_owned(),
                    deployment_name: deployment_for_service(service_name, &deployment_names),
                    container_port: Some(443),
                    target_port: service.and_then(|s| s.get("port")).cloned(),
                    failure_policy: hook.get("failurePolicy").cloned(),
                    side_effects: hook.get("sideEffects").cloned(),
                    admission_review_versions: hook.get("admissionReviewVersions").cloned(),
                    rules: hook.get("rules").cloned(),
                    webhook_path: service
                        .and_then(|s| s.get("path"))
                        .and_then(Value::as_str)
                        .map(str::to_owned),
                });
            }
        }
    }
    hooks
}

/// Best-effort mapping of a webhook service to its backing deployment:
/// strip the conventional service suffixes, then prefix-match against the
/// collected deployment names.
fn deployment_for_service(service_name: Option<&str>, deployment_names: &[String]) -> String {
    if let Some(service) = service_name {
        let stripped = service
            .strip_suffix("-webhook-service")
            .or_else(|| service.strip_suffix("-service"))
            .unwrap_or(service);
        if let Some(name) = deployment_names
            .iter()
            .find(|n| n.as_str() == stripped || n.starts_with(stripped))
        {
            return name.clone();
        }
    }
    deployment_names.first().cloned().unwrap_or_default()
}
