use dr_syncer_common::annotations;
use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;

use super::metadata::{is_ignored, sanitize};

/// The scale decision returned alongside the rewritten object, recorded
/// into `NamespaceMapping.status.deploymentScales` (spec.md §3, §4.3).
pub struct ScaleRecord {
    pub name: String,
    pub original_replicas: i32,
}

pub struct RewriteResult {
    pub deployment: Deployment,
    pub scale: ScaleRecord,
}

/// Scale-to-zero / override resolution (spec.md §4.3, scenario #2):
/// an explicit `scale-override` label always wins; otherwise scale-to-zero
/// (default on) forces zero; otherwise the original replica count survives.
pub fn rewrite(
    source: &Deployment,
    destination_namespace: &str,
    scale_to_zero: bool,
) -> Option<RewriteResult> {
    if is_ignored(&source.metadata) {
        return None;
    }
    let source_namespace = source.namespace().unwrap_or_default();
    let name = source.name_any();
    let original_replicas = source
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0);

    let override_replicas = source
        .labels()
        .get(annotations::SCALE_OVERRIDE)
        .and_then(|v| v.parse::<i32>().ok());

    let desired_replicas = match override_replicas {
        Some(n) => n,
        None if scale_to_zero => 0,
        None => original_replicas,
    };

    let mut dest = source.clone();
    sanitize(&mut dest.metadata, &source_namespace, destination_namespace);
    dest.annotations_mut().insert(
        annotations::ORIGINAL_REPLICAS.to_string(),
        original_replicas.to_string(),
    );
    if let Some(spec) = dest.spec.as_mut() {
        spec.replicas = Some(desired_replicas);
    }

    Some(RewriteResult {
        deployment: dest,
        scale: ScaleRecord {
            name,
            original_replicas,
        },
    })
}

fn containers(d: &Deployment) -> Option<&Vec<k8s_openapi::api::core::v1::Container>> {
    d.spec.as_ref()?.template.spec.as_ref().map(|p| &p.containers)
}

fn volumes(d: &Deployment) -> Option<&Vec<k8s_openapi::api::core::v1::Volume>> {
    d.spec.as_ref()?.template.spec.as_ref()?.volumes.as_ref()
}

/// Update when replicas, containers, volumes, or annotations differ
/// (spec.md §4.3).
pub fn needs_update(desired: &Deployment, existing: &Deployment) -> bool {
    let replicas_differ = desired.spec.as_ref().and_then(|s| s.replicas)
        != existing.spec.as_ref().and_then(|s| s.replicas);
    let containers_differ = containers(desired) != containers(existing);
    let volumes_differ = volumes(desired) != volumes(existing);
    let annotations_differ = desired.metadata.annotations != existing.metadata.annotations;

    replicas_differ || containers_differ || volumes_differ || annotations_differ
}

pub fn apply_for_update(mut desired: Deployment, existing: &Deployment) -> Deployment {
    desired.metadata.resource_version = existing.metadata.resource_version.clone();
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::{
        api::{apps::v1::DeploymentSpec, core::v1::PodTemplateSpec},
        apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta},
    };
    use std::collections::BTreeMap;

    fn deployment(name: &str, ns: &str, replicas: i32, labels: &[(&str, &str)]) -> Deployment {
        let mut label_map = BTreeMap::new();
        for (k, v) in labels {
            label_map.insert(k.to_string(), v.to_string());
        }
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                labels: Some(label_map),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                selector: LabelSelector::default(),
                template: PodTemplateSpec::default(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn scale_to_zero_forces_zero_and_records_original() {
        let source = deployment("api", "app", 5, &[]);
        let result = rewrite(&source, "app-dr", true).unwrap();
        assert_eq!(result.deployment.spec.unwrap().replicas, Some(0));
        assert_eq!(result.scale.original_replicas, 5);
        assert_eq!(
            result.deployment.metadata.annotations.unwrap()[annotations::ORIGINAL_REPLICAS],
            "5"
        );
    }

    #[test]
    fn scale_override_label_wins_over_scale_to_zero() {
        let source = deployment("cache", "app", 3, &[(annotations::SCALE_OVERRIDE, "2")]);
        let result = rewrite(&source, "app-dr", true).unwrap();
        assert_eq!(result.deployment.spec.unwrap().replicas, Some(2));
        assert_eq!(result.scale.original_replicas, 3);
    }

    #[test]
    fn scale_to_zero_disabled_preserves_original() {
        let source = deployment("api", "app", 5, &[]);
        let result = rewrite(&source, "app-dr", false).unwrap();
        assert_eq!(result.deployment.spec.unwrap().replicas, Some(5));
    }

    #[test]
    fn update_triggers_on_replica_change() {
        let a = deployment("api", "app-dr", 0, &[]);
        let b = deployment("api", "app-dr", 0, &[]);
        assert!(!needs_update(&a, &b));
        let c = deployment("api", "app-dr", 1, &[]);
        assert!(needs_update(&a, &c));
    }
}
