//! Metadata sanitization shared by every rewriter (spec.md §4.3, "every
//! kind"). Each per-kind rewriter calls [`sanitize`] before any
//! kind-specific transform and checks [`is_ignored`] before emitting.

use chrono::Utc;
use dr_syncer_common::annotations;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// True when the source object carries `dr-syncer.io/ignore=true`; the
/// rewriter must emit nothing for it (spec.md §4.3, §8). spec.md calls
/// this "the ignore label" in §4.3 Filtering but treats it as a universal
/// marker in §8 -- honored whether the bearer set it as a label or an
/// annotation, same as `scale-override`/`storage-class` elsewhere in the
/// pipeline.
pub fn is_ignored(meta: &ObjectMeta) -> bool {
    let marked = |map: &Option<BTreeMap<String, String>>| {
        map.as_ref()
            .and_then(|m| m.get(annotations::IGNORE))
            .map(|v| v == "true")
            .unwrap_or(false)
    };
    marked(&meta.labels) || marked(&meta.annotations)
}

/// Clears every field that must be zero-valued on every destination
/// object (spec.md §4.3, §8), retargets the namespace, and appends
/// source-tracking labels/annotations.
pub fn sanitize(meta: &mut ObjectMeta, source_namespace: &str, destination_namespace: &str) {
    meta.uid = None;
    meta.resource_version = None;
    meta.self_link = None;
    meta.creation_timestamp = None;
    meta.managed_fields = None;
    meta.owner_references = None;
    meta.generation = None;
    meta.finalizers = None;
    meta.namespace = Some(destination_namespace.to_string());

    if let Some(existing) = meta.annotations.as_mut() {
        existing.remove(LAST_APPLIED_ANNOTATION);
    }

    let dest_annotations = meta.annotations.get_or_insert_with(BTreeMap::new);
    dest_annotations.insert(
        annotations::SOURCE_NAMESPACE.to_string(),
        source_namespace.to_string(),
    );
    dest_annotations.insert(annotations::SYNCED_AT.to_string(), Utc::now().to_rfc3339());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_with_annotation(key: &str, value: &str) -> ObjectMeta {
        let mut annotations = BTreeMap::new();
        annotations.insert(key.to_string(), value.to_string());
        ObjectMeta {
            annotations: Some(annotations),
            ..Default::default()
        }
    }

    #[test]
    fn ignore_annotation_is_detected() {
        let meta = meta_with_annotation(annotations::IGNORE, "true");
        assert!(is_ignored(&meta));
        let meta = meta_with_annotation(annotations::IGNORE, "false");
        assert!(!is_ignored(&meta));
        assert!(!is_ignored(&ObjectMeta::default()));
    }

    #[test]
    fn ignore_label_is_also_detected() {
        let mut labels = BTreeMap::new();
        labels.insert(annotations::IGNORE.to_string(), "true".to_string());
        let meta = ObjectMeta {
            labels: Some(labels),
            ..Default::default()
        };
        assert!(is_ignored(&meta));
    }

    #[test]
    fn sanitize_clears_server_owned_fields_and_retargets_namespace() {
        let mut meta = ObjectMeta {
            uid: Some("u".into()),
            resource_version: Some("1".into()),
            self_link: Some("/api/v1/x".into()),
            generation: Some(3),
            namespace: Some("source-ns".into()),
            ..meta_with_annotation(LAST_APPLIED_ANNOTATION, "{}")
        };
        sanitize(&mut meta, "source-ns", "dest-ns");
        assert!(meta.uid.is_none());
        assert!(meta.resource_version.is_none());
        assert!(meta.self_link.is_none());
        assert!(meta.generation.is_none());
        assert_eq!(meta.namespace.as_deref(), Some("dest-ns"));
        let annotations = meta.annotations.unwrap();
        assert!(!annotations.contains_key(LAST_APPLIED_ANNOTATION));
        assert_eq!(
            annotations.get(dr_syncer_common::annotations::SOURCE_NAMESPACE),
            Some(&"source-ns".to_string())
        );
        assert!(annotations.contains_key(dr_syncer_common::annotations::SYNCED_AT));
    }
}
