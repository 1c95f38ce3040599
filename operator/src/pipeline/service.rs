use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;

use super::metadata::{is_ignored, sanitize};

/// Drops cluster-assigned fields on create; `apply_for_update` restores
/// them from the existing destination object since they are immutable
/// once assigned (spec.md §4.3, scenario #3).
pub fn rewrite(source: &Service, destination_namespace: &str) -> Option<Service> {
    if is_ignored(&source.metadata) {
        return None;
    }
    let source_namespace = source.namespace().unwrap_or_default();
    let mut dest = source.clone();
    sanitize(&mut dest.metadata, &source_namespace, destination_namespace);
    if let Some(spec) = dest.spec.as_mut() {
        spec.cluster_ip = None;
        spec.cluster_ips = None;
        spec.health_check_node_port = None;
    }
    Some(dest)
}

/// Update when ports, selector, or type differ (spec.md §4.3).
pub fn needs_update(desired: &Service, existing: &Service) -> bool {
    let ports_differ =
        desired.spec.as_ref().map(|s| &s.ports) != existing.spec.as_ref().map(|s| &s.ports);
    let selector_differ =
        desired.spec.as_ref().map(|s| &s.selector) != existing.spec.as_ref().map(|s| &s.selector);
    let type_differ =
        desired.spec.as_ref().map(|s| &s.type_) != existing.spec.as_ref().map(|s| &s.type_);
    ports_differ || selector_differ || type_differ
}

/// `clusterIP`/`clusterIPs` are immutable once assigned; every update must
/// carry the destination's existing values forward verbatim.
pub fn apply_for_update(mut desired: Service, existing: &Service) -> Service {
    desired.metadata.resource_version = existing.metadata.resource_version.clone();
    if let (Some(desired_spec), Some(existing_spec)) =
        (desired.spec.as_mut(), existing.spec.as_ref())
    {
        desired_spec.cluster_ip = existing_spec.cluster_ip.clone();
        desired_spec.cluster_ips = existing_spec.cluster_ips.clone();
    }
    desired
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::{api::core::v1::ServiceSpec, apimachinery::pkg::apis::meta::v1::ObjectMeta};

    fn svc(name: &str, ns: &str, cluster_ip: Option<&str>) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                cluster_ip: cluster_ip.map(str::to_string),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn rewrite_drops_cluster_ip() {
        let source = svc("web", "app", Some("10.1.2.3"));
        let dest = rewrite(&source, "app-dr").unwrap();
        assert!(dest.spec.unwrap().cluster_ip.is_none());
    }

    #[test]
    fn apply_for_update_preserves_existing_cluster_ip() {
        let desired = svc("web", "app-dr", None);
        let existing = svc("web", "app-dr", Some("10.9.8.7"));
        let applied = apply_for_update(desired, &existing);
        assert_eq!(applied.spec.unwrap().cluster_ip.as_deref(), Some("10.9.8.7"));
    }
}
