use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;

use super::metadata::{is_ignored, sanitize};

/// Every source cluster carries this; never replicated (spec.md §4.3, §8).
const SKIPPED_NAME: &str = "kube-root-ca.crt";

/// Pure transform: `None` means "emit nothing" (ignored, or the protected
/// `kube-root-ca.crt` ConfigMap every namespace carries).
pub fn rewrite(source: &ConfigMap, destination_namespace: &str) -> Option<ConfigMap> {
    if source.name_any() == SKIPPED_NAME || is_ignored(&source.metadata) {
        return None;
    }
    let source_namespace = source.namespace().unwrap_or_default();
    let mut dest = source.clone();
    sanitize(&mut dest.metadata, &source_namespace, destination_namespace);
    Some(dest)
}

/// Update when `data` or `binaryData` diverge; the destination's
/// `resourceVersion` is always preserved on the way back to the API.
pub fn needs_update(desired: &ConfigMap, existing: &ConfigMap) -> bool {
    desired.data != existing.data || desired.binary_data != existing.binary_data
}

/// Carries the existing object's `resourceVersion` into the object about
/// to be sent back as an update (spec.md §4.3: "preserve existing
/// resourceVersion on update").
pub fn apply_for_update(mut desired: ConfigMap, existing: &ConfigMap) -> ConfigMap {
    desired.metadata.resource_version = existing.metadata.resource_version.clone();
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use dr_syncer_common::annotations;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn cm(name: &str, ns: &str, data: &[(&str, &str)]) -> ConfigMap {
        let mut d = BTreeMap::new();
        for (k, v) in data {
            d.insert(k.to_string(), v.to_string());
        }
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            data: Some(d),
            ..Default::default()
        }
    }

    #[test]
    fn skips_kube_root_ca() {
        let source = cm(SKIPPED_NAME, "app", &[("ca.crt", "xyz")]);
        assert!(rewrite(&source, "app-dr").is_none());
    }

    #[test]
    fn skips_ignored() {
        let mut source = cm("settings", "app", &[("k", "v1")]);
        let mut annotations = BTreeMap::new();
        annotations.insert(annotations::IGNORE.to_string(), "true".to_string());
        source.metadata.annotations = Some(annotations);
        assert!(rewrite(&source, "app-dr").is_none());
    }

    #[test]
    fn rewrites_namespace_and_tracking_annotations() {
        let source = cm("settings", "app", &[("k", "v1")]);
        let dest = rewrite(&source, "app-dr").unwrap();
        assert_eq!(dest.namespace().as_deref(), Some("app-dr"));
        assert_eq!(
            dest.annotations().get(annotations::SOURCE_NAMESPACE),
            Some(&"app".to_string())
        );
    }

    #[test]
    fn update_triggers_only_on_data_change() {
        let a = cm("settings", "app-dr", &[("k", "v1")]);
        let b = cm("settings", "app-dr", &[("k", "v1")]);
        assert!(!needs_update(&a, &b));
        let c = cm("settings", "app-dr", &[("k", "v2")]);
        assert!(needs_update(&a, &c));
    }
}
