use crate::collector::yaml_files_under;
use crate::related::RELATED_IMAGE_PREFIX;
use crate::CoreError;
use opbundle_registry::DigestResolver;
use opbundle_schema::{parse_documents_str, Document, ImageReference, SchemaError, CSV_KIND};
use opbundle_store::write_atomic;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Default)]
pub struct PinReport {
    pub files_rewritten: usize,
    pub references_pinned: usize,
}

/// Replace every tag-qualified pull spec under the manifests directory with
/// its digest-qualified form, rewriting files in place.
///
/// References are resolved one at a time with no retry; the first failure
/// aborts the pass. Files rewritten before the failure stay rewritten, so
/// re-running the pass alone is the recovery path.
pub fn pin_images(
    manifests_dir: &Path,
    resolver: &dyn DigestResolver,
) -> Result<PinReport, CoreError> {
    let mut report = PinReport::default();
    let mut cache: BTreeMap<String, String> = BTreeMap::new();

    for path in yaml_files_under(manifests_dir)? {
        let content = fs::read_to_string(&path)?;
        let mut docs = match parse_documents_str(&content) {
            Ok(docs) => docs,
            Err(SchemaError::Parse(source)) => {
                return Err(SchemaError::ParseAt {
                    path: path.clone(),
                    source,
                }
                .into())
            }
            Err(e) => return Err(e.into()),
        };

        let mut changed = false;
        for doc in &mut docs {
            changed |= pin_document(doc, resolver, &mut cache, &mut report.references_pinned)?;
        }
        if changed {
            write_atomic(&path, render_documents(&docs)?.as_bytes())?;
            report.files_rewritten += 1;
            debug!("rewrote {}", path.display());
        }
    }
    Ok(report)
}

fn render_documents(docs: &[Document]) -> Result<String, CoreError> {
    let mut out = String::new();
    for (i, doc) in docs.iter().enumerate() {
        if i > 0 {
            out.push_str("---\n");
        }
        out.push_str(&doc.to_yaml()?);
    }
    Ok(out)
}

/// Pin the known pull-spec locations of one document. Kinds without image
/// fields pass through untouched.
fn pin_document(
    doc: &mut Document,
    resolver: &dyn DigestResolver,
    cache: &mut BTreeMap<String, String>,
    pinned_count: &mut usize,
) -> Result<bool, CoreError> {
    let kind = doc.kind().to_owned();
    let mut changed = false;
    match kind.as_str() {
        CSV_KIND => {
            if let Some(images) =
                value_at_mut(&mut doc.0, &["spec", "relatedImages"]).and_then(Value::as_sequence_mut)
            {
                for entry in images {
                    changed |= pin_field(entry, "image", resolver, cache, pinned_count)?;
                }
            }
            if let Some(deployments) =
                value_at_mut(&mut doc.0, &["spec", "install", "spec", "deployments"])
                    .and_then(Value::as_sequence_mut)
            {
                for deployment in deployments {
                    if let Some(pod_spec) = value_at_mut(deployment, &["spec", "template", "spec"])
                    {
                        changed |= pin_pod_spec(pod_spec, resolver, cache, pinned_count)?;
                    }
                }
            }
        }
        "Deployment" => {
            if let Some(pod_spec) = value_at_mut(&mut doc.0, &["spec", "template", "spec"]) {
                changed |= pin_pod_spec(pod_spec, resolver, cache, pinned_count)?;
            }
        }
        _ => {}
    }
    Ok(changed)
}

fn pin_pod_spec(
    pod_spec: &mut Value,
    resolver: &dyn DigestResolver,
    cache: &mut BTreeMap<String, String>,
    pinned_count: &mut usize,
) -> Result<bool, CoreError> {
    let mut changed = false;
    for key in ["containers", "initContainers"] {
        let Some(containers) = pod_spec.get_mut(key).and_then(Value::as_sequence_mut) else {
            continue;
        };
        for container in containers {
            changed |= pin_field(container, "image", resolver, cache, pinned_count)?;
            let Some(env) = container.get_mut("env").and_then(Value::as_sequence_mut) else {
                continue;
            };
            for entry in env {
                let is_related = entry
                    .get("name")
                    .and_then(Value::as_str)
                    .is_some_and(|n| n.starts_with(RELATED_IMAGE_PREFIX));
                if is_related {
                    changed |= pin_field(entry, "value", resolver, cache, pinned_count)?;
                }
            }
        }
    }
    Ok(changed)
}

fn pin_field(
    map: &mut Value,
    key: &str,
    resolver: &dyn DigestResolver,
    cache: &mut BTreeMap<String, String>,
    pinned_count: &mut usize,
) -> Result<bool, CoreError> {
    let Some(field) = map.get_mut(key) else {
        return Ok(false);
    };
    let Some(current) = field.as_str().map(str::to_owned) else {
        return Ok(false);
    };
    if current.is_empty() {
        return Ok(false);
    }

    let pinned = match cache.get(&current) {
        Some(pinned) => pinned.clone(),
        None => {
            let reference: ImageReference = current.parse().map_err(CoreError::Schema)?;
            let resolved = if reference.is_pinned() {
                reference
            } else {
                resolver.resolve(&reference)?
            };
            let pinned = resolved.to_string();
            cache.insert(current.clone(), pinned.clone());
            pinned
        }
    };

    if pinned == current {
        return Ok(false);
    }
    info!("pinned {current} -> {pinned}");
    *field = Value::from(pinned);
    *pinned_count += 1;
    Ok(true)
}

fn value_at_mut<'a>(value: &'a mut Value, path: &[&str]) -> Option<&'a mut Value> {
    let mut current = value;
    for key in path {
        current = current.get_mut(key)?;
    }
    Some(current)
}
