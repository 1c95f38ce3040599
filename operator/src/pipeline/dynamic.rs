//! Arbitrary namespaced kinds not covered by a specialized rewriter
//! (spec.md §4.3 "Arbitrary namespaced kinds"): resolved by group-qualified
//! ref against cluster discovery, then synced with a blunt deep-equality
//! decision over the whole non-status, non-metadata body.

use kube::{
    api::{ApiResource, DynamicObject},
    discovery::Discovery,
    Api, Client, ResourceExt,
};

use super::kinds::parse_group_qualified;
use super::metadata::{is_ignored, sanitize};
use crate::util::error::{ClassifiedError, ErrorClass};

/// Finds the `ApiResource` for a group-qualified ref (`widgets.example.io`)
/// within an already-populated `Discovery` snapshot. Returns `None` when
/// the ref doesn't resolve to any served resource -- the caller logs and
/// skips it rather than failing the whole sync (spec.md §4.3).
pub fn resolve_api_resource(discovery: &Discovery, raw_ref: &str) -> Option<ApiResource> {
    let (resource, group) = parse_group_qualified(raw_ref)?;
    for group_entry in discovery.groups() {
        if group_entry.name() != group {
            continue;
        }
        for (api_resource, _caps) in group_entry.resources_by_stability() {
            if api_resource.plural.eq_ignore_ascii_case(&resource) {
                return Some(api_resource);
            }
        }
    }
    None
}

pub fn dynamic_api(
    client: &Client,
    api_resource: &ApiResource,
    namespace: &str,
) -> Api<DynamicObject> {
    Api::namespaced_with(client.clone(), namespace, api_resource)
}

/// Pure transform: metadata sanitization only. Spec/data fields carry
/// through verbatim since the dynamic path has no kind-specific knowledge
/// of what's safe to mutate.
pub fn rewrite(source: &DynamicObject, destination_namespace: &str) -> Option<DynamicObject> {
    if is_ignored(&source.metadata) {
        return None;
    }
    let source_namespace = source.namespace().unwrap_or_default();
    let mut dest = source.clone();
    sanitize(&mut dest.metadata, &source_namespace, destination_namespace);
    Some(dest)
}

/// Deep-equality over `data` plus the non-metadata portion of `types`;
/// without kind-specific knowledge this is the only safe "did anything
/// change" signal (spec.md §4.3).
pub fn needs_update(desired: &DynamicObject, existing: &DynamicObject) -> bool {
    desired.data != existing.data
}

pub fn apply_for_update(mut desired: DynamicObject, existing: &DynamicObject) -> DynamicObject {
    desired.metadata.resource_version = existing.metadata.resource_version.clone();
    desired
}

pub async fn fetch(
    api: &Api<DynamicObject>,
    name: &str,
) -> Result<Option<DynamicObject>, ClassifiedError> {
    match api.get(name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(kube::Error::Api(resp)) if resp.code == 404 => Ok(None),
        Err(e) => Err(classify(e)),
    }
}

fn classify(err: kube::Error) -> ClassifiedError {
    match crate::util::error::classify_kube_error(&err) {
        ErrorClass::NonRetryable => ClassifiedError::non_retryable(err),
        ErrorClass::WaitForNextSync => ClassifiedError::wait_for_next_sync(err),
        ErrorClass::Retryable => ClassifiedError::retryable(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::TypeMeta;
    use serde_json::json;

    fn widget(name: &str, ns: &str, spec: serde_json::Value) -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "example.io/v1".to_string(),
                kind: "Widget".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(ns.to_string()),
                ..Default::default()
            },
            data: json!({ "spec": spec }),
        }
    }

    #[test]
    fn update_triggers_on_data_change() {
        let a = widget("w1", "app-dr", json!({"replicas": 2}));
        let b = widget("w1", "app-dr", json!({"replicas": 2}));
        assert!(!needs_update(&a, &b));
        let c = widget("w1", "app-dr", json!({"replicas": 3}));
        assert!(needs_update(&a, &c));
    }

    #[test]
    fn rewrite_retargets_namespace_and_respects_ignore() {
        let source = widget("w1", "app", json!({}));
        let dest = rewrite(&source, "app-dr").unwrap();
        assert_eq!(dest.namespace().as_deref(), Some("app-dr"));
    }
}
