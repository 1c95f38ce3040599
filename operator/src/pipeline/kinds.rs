//! Kind-name resolution (spec.md §4.3 "Kind selection"): callers pass
//! free-form strings (`Deployment`, `deployments`, `pvc`, ...); this module
//! normalizes them to the canonical [`Kind`] the dispatcher switches on.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    ConfigMap,
    Secret,
    Deployment,
    Service,
    Ingress,
    PersistentVolumeClaim,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::ConfigMap => "ConfigMap",
            Kind::Secret => "Secret",
            Kind::Deployment => "Deployment",
            Kind::Service => "Service",
            Kind::Ingress => "Ingress",
            Kind::PersistentVolumeClaim => "PersistentVolumeClaim",
        };
        write!(f, "{s}")
    }
}

/// Process order within a single NamespaceMapping sync (spec.md §5): so
/// Secrets/ConfigMaps land before Deployments that may reference them.
pub const BUILTIN_ORDER: [Kind; 6] = [
    Kind::ConfigMap,
    Kind::Secret,
    Kind::Deployment,
    Kind::Service,
    Kind::Ingress,
    Kind::PersistentVolumeClaim,
];

/// Resolves a user-supplied kind string (singular, plural, or a common
/// short form), case-insensitively, to a builtin [`Kind`]. Returns `None`
/// both for unknown kinds and for kinds the dynamic-client path handles
/// (an empty return means "not a specialized rewriter", not "invalid").
pub fn resolve_builtin(raw: &str) -> Option<Kind> {
    match raw.to_ascii_lowercase().as_str() {
        "configmap" | "configmaps" | "cm" => Some(Kind::ConfigMap),
        "secret" | "secrets" => Some(Kind::Secret),
        "deployment" | "deployments" | "deploy" => Some(Kind::Deployment),
        "service" | "services" | "svc" => Some(Kind::Service),
        "ingress" | "ingresses" => Some(Kind::Ingress),
        "persistentvolumeclaim" | "persistentvolumeclaims" | "pvc" => {
            Some(Kind::PersistentVolumeClaim)
        }
        _ => None,
    }
}

/// `true` for short forms the spec calls out explicitly for the dynamic
/// (non-specialized) path, so callers can tell "recognized, goes dynamic"
/// from "genuinely unrecognized".
pub fn is_known_dynamic_alias(raw: &str) -> bool {
    matches!(
        raw.to_ascii_lowercase().as_str(),
        "pv" | "persistentvolume" | "persistentvolumes" | "crd" | "customresourcedefinition"
    )
}

/// A group-qualified kind ref (`resource.group`) used when selecting
/// arbitrary kinds. Returns `None` for refs missing the dot separator
/// required to disambiguate resource from group (spec.md §4.3: "an
/// invalid group-qualified ref is logged and skipped").
pub fn parse_group_qualified(raw: &str) -> Option<(String, String)> {
    let (resource, group) = raw.split_once('.')?;
    if resource.is_empty() || group.is_empty() {
        return None;
    }
    Some((resource.to_ascii_lowercase(), group.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_singular_plural_and_short_forms() {
        assert_eq!(resolve_builtin("Deployment"), Some(Kind::Deployment));
        assert_eq!(resolve_builtin("deployments"), Some(Kind::Deployment));
        assert_eq!(resolve_builtin("PVC"), Some(Kind::PersistentVolumeClaim));
        assert_eq!(resolve_builtin("svc"), Some(Kind::Service));
        assert_eq!(resolve_builtin("bogus"), None);
    }

    #[test]
    fn group_qualified_ref_requires_both_parts() {
        assert_eq!(
            parse_group_qualified("widgets.example.io"),
            Some(("widgets".to_string(), "example.io".to_string()))
        );
        assert_eq!(parse_group_qualified("widgets"), None);
        assert_eq!(parse_group_qualified(".example.io"), None);
        assert_eq!(parse_group_qualified("widgets."), None);
    }
}
