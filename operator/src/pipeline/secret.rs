use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;

use super::metadata::{is_ignored, sanitize};

/// Pure transform; content is carried through opaquely (spec.md §4.3).
pub fn rewrite(source: &Secret, destination_namespace: &str) -> Option<Secret> {
    if is_ignored(&source.metadata) {
        return None;
    }
    let source_namespace = source.namespace().unwrap_or_default();
    let mut dest = source.clone();
    sanitize(&mut dest.metadata, &source_namespace, destination_namespace);
    Some(dest)
}

/// Update when `data` or `stringData` diverge (spec.md §4.3: "similar to
/// ConfigMap over `data` and `stringData`").
pub fn needs_update(desired: &Secret, existing: &Secret) -> bool {
    desired.data != existing.data || desired.string_data != existing.string_data
}

pub fn apply_for_update(mut desired: Secret, existing: &Secret) -> Secret {
    desired.metadata.resource_version = existing.metadata.resource_version.clone();
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::{apimachinery::pkg::apis::meta::v1::ObjectMeta, ByteString};
    use std::collections::BTreeMap;

    fn secret(name: &str, ns: &str, value: &str) -> Secret {
        let mut data = BTreeMap::new();
        data.insert("token".to_string(), ByteString(value.as_bytes().to_vec()));
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        }
    }

    #[test]
    fn update_triggers_on_data_change() {
        let a = secret("creds", "app-dr", "abc");
        let b = secret("creds", "app-dr", "abc");
        assert!(!needs_update(&a, &b));
        let c = secret("creds", "app-dr", "def");
        assert!(needs_update(&a, &c));
    }

    #[test]
    fn rewrite_retargets_namespace() {
        let source = secret("creds", "app", "abc");
        let dest = rewrite(&source, "app-dr").unwrap();
        assert_eq!(dest.namespace().as_deref(), Some("app-dr"));
    }
}
