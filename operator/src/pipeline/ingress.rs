use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;

use super::metadata::{is_ignored, sanitize};

/// TLS blocks and rules carry through verbatim (spec.md §4.3).
pub fn rewrite(source: &Ingress, destination_namespace: &str) -> Option<Ingress> {
    if is_ignored(&source.metadata) {
        return None;
    }
    let source_namespace = source.namespace().unwrap_or_default();
    let mut dest = source.clone();
    sanitize(&mut dest.metadata, &source_namespace, destination_namespace);
    Some(dest)
}

/// Update when rules or TLS differ (spec.md §4.3).
pub fn needs_update(desired: &Ingress, existing: &Ingress) -> bool {
    let rules_differ =
        desired.spec.as_ref().map(|s| &s.rules) != existing.spec.as_ref().map(|s| &s.rules);
    let tls_differ = desired.spec.as_ref().map(|s| &s.tls) != existing.spec.as_ref().map(|s| &s.tls);
    rules_differ || tls_differ
}

pub fn apply_for_update(mut desired: Ingress, existing: &Ingress) -> Ingress {
    desired.metadata.resource_version = existing.metadata.resource_version.clone();
    desired
}
