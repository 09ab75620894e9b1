use crate::collector::ManifestSet;
use crate::CoreError;
use opbundle_schema::RelatedImage;
use serde_yaml::Value;

/// Env var prefix marking an image reference the descriptor must declare.
pub const RELATED_IMAGE_PREFIX: &str = "RELATED_IMAGE_";

/// Discover related images from the deployments in the set.
///
/// Each `RELATED_IMAGE_<NAME>` env var contributes one `(name, reference)`
/// pair; the declared name is the suffix lowercased with `_` mapped to `-`.
/// Exact duplicates collapse; the same name with different references is a
/// merge error.
pub fn find_related_images(set: &ManifestSet) -> Result<Vec<RelatedImage>, CoreError> {
    let mut images: Vec<RelatedImage> = Vec::new();
    for deployment in set.documents_of_kind("Deployment") {
        let Some(pod_spec) = deployment.get(&["spec", "template", "spec"]) else {
            continue;
        };
        for container in pod_containers(pod_spec) {
            let Some(env) = container.get("env").and_then(Value::as_sequence) else {
                continue;
            };
            for entry in env {
                let Some(var_name) = entry.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let Some(suffix) = var_name.strip_prefix(RELATED_IMAGE_PREFIX) else {
                    continue;
                };
                // Env vars populated via valueFrom carry no literal reference.
                let Some(reference) = entry.get("value").and_then(Value::as_str) else {
                    continue;
                };
                let name = suffix.to_lowercase().replace('_', "-");
                if let Some(existing) = images.iter().find(|i| i.name == name) {
                    if existing.image == reference {
                        continue;
                    }
                    return Err(CoreError::Merge(format!(
                        "related image '{name}' declared with conflicting references \
                         '{}' and '{reference}'",
                        existing.image
                    )));
                }
                images.push(RelatedImage {
                    name,
                    image: reference.to_owned(),
                });
            }
        }
    }
    Ok(images)
}

/// Containers and initContainers of a pod spec, in declaration order.
pub(crate) fn pod_containers(pod_spec: &Value) -> impl Iterator<Item = &Value> {
    ["containers", "initContainers"]
        .into_iter()
        .filter_map(|key| pod_spec.get(key).and_then(Value::as_sequence))
        .flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set_from(yaml: &str) -> ManifestSet {
        ManifestSet::from_reader(yaml.as_bytes()).unwrap()
    }

    #[test]
    fn discovers_related_image_env_vars() {
        let set = set_from(
            r"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: operator
spec:
  template:
    spec:
      containers:
        - name: manager
          image: quay.io/example/operator:v1
          env:
            - name: RELATED_IMAGE_MEMCACHED
              value: quay.io/example/memcached:1.6
            - name: WATCH_NAMESPACE
              value: ''
      initContainers:
        - name: init
          env:
            - name: RELATED_IMAGE_INIT_HELPER
              value: quay.io/example/init:2.0
",
        );
        let images = find_related_images(&set).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].name, "memcached");
        assert_eq!(images[0].image, "quay.io/example/memcached:1.6");
        assert_eq!(images[1].name, "init-helper");
    }

    #[test]
    fn exact_duplicates_collapse() {
        let set = set_from(
            r"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: a
spec:
  template:
    spec:
      containers:
        - env:
            - name: RELATED_IMAGE_APP
              value: quay.io/example/app:v1
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: b
spec:
  template:
    spec:
      containers:
        - env:
            - name: RELATED_IMAGE_APP
              value: quay.io/example/app:v1
",
        );
        let images = find_related_images(&set).unwrap();
        assert_eq!(images.len(), 1);
    }

    #[test]
    fn conflicting_references_are_a_merge_error() {
        let set = set_from(
            r"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: a
spec:
  template:
    spec:
      containers:
        - env:
            - name: RELATED_IMAGE_APP
              value: quay.io/example/app:v1
            - name: RELATED_IMAGE_APP
              value: quay.io/example/app:v2
",
        );
        assert!(matches!(
            find_related_images(&set),
            Err(CoreError::Merge(_))
        ));
    }

    #[test]
    fn value_from_entries_are_skipped() {
        let set = set_from(
            r"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: a
spec:
  template:
    spec:
      containers:
        - env:
            - name: RELATED_IMAGE_APP
              valueFrom:
                fieldRef:
                  fieldPath: metadata.name
",
        );
        assert!(find_related_images(&set).unwrap().is_empty());
    }

    #[test]
    fn no_deployments_means_no_images() {
        let set = set_from("apiVersion: v1\nkind: Service\nmetadata:\n  name: svc\n");
        assert!(find_related_images(&set).unwrap().is_empty());
    }
}
