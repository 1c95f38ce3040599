use dr_syncer_common::annotations;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use std::collections::BTreeMap;

use super::metadata::{is_ignored, sanitize};

const BIND_COMPLETED_ANNOTATION: &str = "pv.kubernetes.io/bind-completed";
const BOUND_BY_CONTROLLER_ANNOTATION: &str = "pv.kubernetes.io/bound-by-controller";
const SELECTED_NODE_ANNOTATION: &str = "volume.kubernetes.io/selected-node";

/// PVC rewrite for a brand-new destination object (spec.md §4.4.3 steps
/// 1-2): storage-class and access-mode mapping, then the create-only
/// field stripping.
pub fn rewrite_for_create(
    source: &PersistentVolumeClaim,
    destination_namespace: &str,
    storage_class_mappings: &BTreeMap<String, String>,
    access_mode_mappings: &BTreeMap<String, String>,
    preserve_volume_attributes: bool,
    pv_sync_enabled: bool,
) -> Option<PersistentVolumeClaim> {
    if is_ignored(&source.metadata) {
        return None;
    }
    let source_namespace = source.namespace().unwrap_or_default();
    let mut dest = source.clone();
    sanitize(&mut dest.metadata, &source_namespace, destination_namespace);

    if let Some(existing) = dest.metadata.annotations.as_mut() {
        existing.remove(BIND_COMPLETED_ANNOTATION);
        existing.remove(BOUND_BY_CONTROLLER_ANNOTATION);
        existing.remove(SELECTED_NODE_ANNOTATION);
    }

    if let Some(spec) = dest.spec.as_mut() {
        spec.volume_name = None;

        if let Some(class) = resolve_storage_class(source, storage_class_mappings) {
            spec.storage_class_name = Some(class);
        }
        if let Some(modes) = spec.access_modes.as_mut() {
            for mode in modes.iter_mut() {
                if let Some(mapped) = access_mode_mappings.get(mode) {
                    *mode = mapped.clone();
                }
            }
        }

        if !(preserve_volume_attributes || pv_sync_enabled) {
            spec.volume_mode = None;
            spec.selector = None;
            spec.data_source = None;
            spec.data_source_ref = None;
        }
    }

    Some(dest)
}

/// Label override (`dr-syncer.io/storage-class`) wins over the
/// ClusterMapping's storage-class map (spec.md §4.4.3 step 1).
fn resolve_storage_class(
    source: &PersistentVolumeClaim,
    storage_class_mappings: &BTreeMap<String, String>,
) -> Option<String> {
    if let Some(overridden) = source.labels().get(annotations::STORAGE_CLASS_OVERRIDE) {
        return Some(overridden.clone());
    }
    let current = source.spec.as_ref()?.storage_class_name.as_ref()?;
    storage_class_mappings.get(current).cloned()
}

/// `volumeName`, `storageClassName`, `accessModes`, and `volumeMode` are
/// immutable once the PVC exists; only `spec.resources` (size requests)
/// may ever be updated (spec.md §4.4.3 step 3).
pub fn apply_for_update(
    existing: &PersistentVolumeClaim,
    desired_size: &PersistentVolumeClaim,
) -> PersistentVolumeClaim {
    let mut updated = existing.clone();
    if let (Some(target), Some(current)) = (
        desired_size.spec.as_ref().and_then(|s| s.resources.as_ref()),
        updated.spec.as_mut().and_then(|s| s.resources.as_mut()),
    ) {
        current.requests = target.requests.clone();
    }
    updated
}

/// `true` when the destination's size request is already at the
/// desired value, i.e. no update API call is needed.
pub fn size_unchanged(existing: &PersistentVolumeClaim, desired: &PersistentVolumeClaim) -> bool {
    let existing_requests = existing
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.clone());
    let desired_requests = desired
        .spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.clone());
    existing_requests == desired_requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::{
        api::core::v1::PersistentVolumeClaimSpec, apimachinery::pkg::apis::meta::v1::ObjectMeta,
    };

    fn pvc(name: &str, ns: &str, storage_class: &str) -> PersistentVolumeClaim {
        PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: Some(PersistentVolumeClaimSpec {
                storage_class_name: Some(storage_class.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn storage_class_mapping_applies() {
        let source = pvc("data", "db", "fast-ssd");
        let mut mappings = BTreeMap::new();
        mappings.insert("fast-ssd".to_string(), "dr-standard".to_string());
        let dest =
            rewrite_for_create(&source, "db-dr", &mappings, &BTreeMap::new(), false, false)
                .unwrap();
        assert_eq!(
            dest.spec.unwrap().storage_class_name.as_deref(),
            Some("dr-standard")
        );
    }

    #[test]
    fn label_override_wins_over_mapping() {
        let mut source = pvc("data", "db", "fast-ssd");
        let mut labels = BTreeMap::new();
        labels.insert(
            annotations::STORAGE_CLASS_OVERRIDE.to_string(),
            "manual-class".to_string(),
        );
        source.metadata.labels = Some(labels);
        let mut mappings = BTreeMap::new();
        mappings.insert("fast-ssd".to_string(), "dr-standard".to_string());
        let dest =
            rewrite_for_create(&source, "db-dr", &mappings, &BTreeMap::new(), false, false)
                .unwrap();
        assert_eq!(
            dest.spec.unwrap().storage_class_name.as_deref(),
            Some("manual-class")
        );
    }

    #[test]
    fn volume_name_always_cleared_on_create() {
        let mut source = pvc("data", "db", "fast-ssd");
        source.spec.as_mut().unwrap().volume_name = Some("pv-123".to_string());
        let dest =
            rewrite_for_create(&source, "db-dr", &BTreeMap::new(), &BTreeMap::new(), false, false)
                .unwrap();
        assert!(dest.spec.unwrap().volume_name.is_none());
    }
}
