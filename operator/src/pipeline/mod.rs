//! Transformation pipeline (spec.md §4.3): resolves which kinds to sync,
//! runs each source object through the matching rewriter, and decides
//! create vs. update vs. no-op against the destination cluster.

pub mod configmap;
pub mod deployment;
pub mod dynamic;
pub mod ingress;
pub mod kinds;
pub mod metadata;
pub mod pvc;
pub mod secret;
pub mod service;

use kinds::Kind;

/// What the caller must do to reconcile a single object once its rewrite
/// and lookup against the destination are known.
pub enum SyncAction<T> {
    Create(T),
    Update(T),
    NoOp,
    Skip,
}

/// Resolves a requested kind selection (spec.md §4.3 "Kind selection")
/// against the configured include list, filtering out anything excluded
/// by name in `exclude`.
pub fn select_kinds<'a>(requested: &'a [String], exclude: &[String]) -> Vec<&'a str> {
    requested
        .iter()
        .map(String::as_str)
        .filter(|k| !exclude.iter().any(|e| e.eq_ignore_ascii_case(k)))
        .collect()
}

/// Dispatch table entry: whether a requested kind string resolves to a
/// specialized rewriter, a known dynamic alias, or an arbitrary
/// group-qualified ref for the dynamic client path.
pub enum Resolution {
    Builtin(Kind),
    Dynamic,
}

pub fn resolve(raw: &str) -> Option<Resolution> {
    if let Some(kind) = kinds::resolve_builtin(raw) {
        return Some(Resolution::Builtin(kind));
    }
    if kinds::is_known_dynamic_alias(raw) || kinds::parse_group_qualified(raw).is_some() {
        return Some(Resolution::Dynamic);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_kinds_drops_excluded_entries() {
        let requested = vec!["Deployment".to_string(), "Secret".to_string()];
        let exclude = vec!["secret".to_string()];
        assert_eq!(select_kinds(&requested, &exclude), vec!["Deployment"]);
    }

    #[test]
    fn resolve_prefers_builtin_over_dynamic() {
        assert!(matches!(resolve("deployment"), Some(Resolution::Builtin(Kind::Deployment))));
        assert!(matches!(resolve("widgets.example.io"), Some(Resolution::Dynamic)));
        assert!(resolve("???").is_none());
    }
}
