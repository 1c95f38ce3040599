//! Destination-side cleanup run from the finalizer (spec.md §4.5): removes
//! every destination object this mapping's sync pass created, identified by
//! the `dr-syncer.io/source-namespace` tracking annotation `sanitize`
//! stamps onto every rewritten object.

use dr_syncer_common::annotations;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use kube::{
    Client, Resource, ResourceExt,
    api::{Api, DeleteParams, ListParams},
};

use crate::util::error::Error;

fn tracked(meta_annotations: &Option<std::collections::BTreeMap<String, String>>, source_namespace: &str) -> bool {
    meta_annotations
        .as_ref()
        .and_then(|a| a.get(annotations::SOURCE_NAMESPACE))
        .map(|v| v == source_namespace)
        .unwrap_or(false)
}

async fn sweep<K>(client: &Client, destination_namespace: &str, source_namespace: &str) -> Result<usize, Error>
where
    K: Resource<Scope = kube::core::NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + for<'de> serde::Deserialize<'de>
        + serde::Serialize,
    K::DynamicType: Default,
{
    let api: Api<K> = Api::namespaced(client.clone(), destination_namespace);
    let list = api.list(&ListParams::default()).await?;
    let mut removed = 0;
    for item in &list.items {
        if tracked(&item.meta().annotations, source_namespace) {
            api.delete(&item.name_any(), &DeleteParams::default()).await?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Enumerates every builtin kind in the destination namespace and removes
/// the objects this mapping synced there (spec.md §4.5).
pub async fn run(client: &Client, destination_namespace: &str, source_namespace: &str) -> Result<usize, Error> {
    let mut removed = 0;
    removed += sweep::<ConfigMap>(client, destination_namespace, source_namespace).await?;
    removed += sweep::<Secret>(client, destination_namespace, source_namespace).await?;
    removed += sweep::<Deployment>(client, destination_namespace, source_namespace).await?;
    removed += sweep::<Service>(client, destination_namespace, source_namespace).await?;
    removed += sweep::<Ingress>(client, destination_namespace, source_namespace).await?;
    removed += sweep::<PersistentVolumeClaim>(client, destination_namespace, source_namespace).await?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracked_matches_exact_source_namespace() {
        let mut annotations = std::collections::BTreeMap::new();
        annotations.insert(annotations::SOURCE_NAMESPACE.to_string(), "app".to_string());
        assert!(tracked(&Some(annotations.clone()), "app"));
        assert!(!tracked(&Some(annotations), "other"));
        assert!(!tracked(&None, "app"));
    }
}
