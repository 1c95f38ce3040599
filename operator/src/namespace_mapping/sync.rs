//! Per-namespace object sync (spec.md §4.3): lists each selected kind in
//! the source namespace, rewrites it, and creates/updates it in the
//! destination. PVC data transfer is a separate subsystem invoked by the
//! reconciler once this pass completes.

use dr_syncer_types::{
    DeploymentScaleRecord, ErrorClass as StatusErrorClass, NamespaceMappingSpec,
    ResourceStatusRow, SyncError, SyncStats, MAX_RESOURCE_STATUS_ROWS_PER_KIND,
};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::networking::v1::Ingress;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    Client, ResourceExt,
    api::{Api, ApiResource, DynamicObject, ListParams, PostParams},
    discovery::{Discovery, Scope},
};

use crate::pipeline::{self, kinds::Kind};
use crate::util::error::{ErrorClass, classify_kube_error};

#[derive(Default)]
pub struct SyncOutcome {
    pub stats: SyncStats,
    pub rows: Vec<ResourceStatusRow>,
    pub truncated: bool,
    pub errors: Vec<SyncError>,
    pub deployment_scales: Vec<DeploymentScaleRecord>,
    /// PVCs whose destination object sync succeeded this pass, in source
    /// order; the reconciler drives PVC data transfer (spec.md §4.4.4)
    /// off this list rather than re-listing and re-filtering PVCs itself.
    pub synced_pvc_names: Vec<String>,
}

impl SyncOutcome {
    fn push_row(&mut self, kind: &str, row: ResourceStatusRow) {
        let count_for_kind = self.rows.iter().filter(|r| r.kind == kind).count();
        if count_for_kind >= MAX_RESOURCE_STATUS_ROWS_PER_KIND {
            self.truncated = true;
            return;
        }
        self.rows.push(row);
    }

    fn push_error(&mut self, kind: &str, name: &str, err: &kube::Error) {
        let classification = match classify_kube_error(err) {
            ErrorClass::NonRetryable => StatusErrorClass::NonRetryable,
            ErrorClass::WaitForNextSync => StatusErrorClass::WaitForNextSync,
            ErrorClass::Retryable => StatusErrorClass::Retryable,
        };
        self.push_plain_error(kind, name, err.to_string(), classification);
    }

    /// Records a failure that didn't originate from a single `kube::Error`
    /// (e.g. a PVC data transfer, which can fail at several distinct
    /// steps before ever touching the Kubernetes API).
    pub fn push_plain_error(&mut self, kind: &str, name: &str, message: String, classification: StatusErrorClass) {
        self.stats.resources_failed += 1;
        self.errors.push(SyncError {
            kind: kind.to_string(),
            name: name.to_string(),
            message,
            time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
                k8s_openapi::jiff::Timestamp::now(),
            )),
            classification,
        });
    }
}

fn excluded_by_label(labels: &std::collections::BTreeMap<String, String>, exclude_labels: &[String]) -> bool {
    exclude_labels.iter().any(|key| labels.contains_key(key))
}

fn excluded_by_name(kind: &str, name: &str, exclude_resources: &[String]) -> bool {
    exclude_resources.iter().any(|entry| {
        entry == name || entry.eq_ignore_ascii_case(&format!("{kind}/{name}"))
    })
}

/// Runs the full object-sync pass for every kind `spec.resourceTypes`
/// resolves to a builtin rewriter (spec.md §4.3, §5 BUILTIN_ORDER).
pub async fn sync_namespace(
    source: &Client,
    destination: &Client,
    spec: &NamespaceMappingSpec,
) -> SyncOutcome {
    let mut outcome = SyncOutcome::default();

    if let Err(e) = ensure_destination_namespace(source, destination, spec).await {
        outcome.push_plain_error(
            "Namespace",
            &spec.destination_namespace,
            format!("failed to prepare destination namespace: {e}"),
            StatusErrorClass::Retryable,
        );
        return outcome;
    }

    for kind in pipeline::kinds::BUILTIN_ORDER {
        let requested = spec
            .resource_types
            .iter()
            .any(|r| r == "*" || pipeline::kinds::resolve_builtin(r) == Some(kind));
        if !requested {
            continue;
        }
        match kind {
            Kind::ConfigMap => sync_configmaps(source, destination, spec, &mut outcome).await,
            Kind::Secret => sync_secrets(source, destination, spec, &mut outcome).await,
            Kind::Deployment => sync_deployments(source, destination, spec, &mut outcome).await,
            Kind::Service => sync_services(source, destination, spec, &mut outcome).await,
            Kind::Ingress => sync_ingresses(source, destination, spec, &mut outcome).await,
            Kind::PersistentVolumeClaim => {
                sync_pvcs(source, destination, spec, &mut outcome).await
            }
        }
    }

    sync_dynamic_kinds(source, destination, spec, &mut outcome).await;

    outcome
}

/// Resolves `spec.resourceTypes` against server discovery for everything
/// the builtin dispatch didn't already claim (spec.md §4.3 "Kind
/// selection", "Arbitrary namespaced kinds"): a bare `*` expands to every
/// namespaced kind discovery reports minus the builtins; anything else is
/// either a group-qualified ref (`widgets.example.io`) or a short alias
/// (`pv`, `crd`). Unknown or cluster-scoped refs are skipped, matching the
/// spec's "unknown kinds are silently skipped" and the Non-goal excluding
/// cluster-scoped resources other than namespaces.
async fn sync_dynamic_kinds(
    source: &Client,
    destination: &Client,
    spec: &NamespaceMappingSpec,
    outcome: &mut SyncOutcome,
) {
    let wants_star = spec.resource_types.iter().any(|r| r == "*");
    let extra: Vec<&String> = spec
        .resource_types
        .iter()
        .filter(|r| *r != "*" && pipeline::kinds::resolve_builtin(r).is_none())
        .collect();
    if !wants_star && extra.is_empty() {
        return;
    }

    let discovery = match Discovery::new(source.clone()).run().await {
        Ok(d) => d,
        Err(e) => {
            outcome.push_plain_error(
                "*",
                "*",
                format!("discovery failed: {e}"),
                StatusErrorClass::Retryable,
            );
            return;
        }
    };

    let mut resources: Vec<ApiResource> = Vec::new();
    if wants_star {
        for group in discovery.groups() {
            for (api_resource, caps) in group.resources_by_stability() {
                if caps.scope != Scope::Namespaced {
                    continue;
                }
                if pipeline::kinds::resolve_builtin(&api_resource.plural).is_some() {
                    continue;
                }
                resources.push(api_resource);
            }
        }
    }
    for raw in extra {
        if let Some(api_resource) = pipeline::dynamic::resolve_api_resource(&discovery, raw) {
            resources.push(api_resource);
            continue;
        }
        if pipeline::kinds::is_known_dynamic_alias(raw) {
            if let Some(api_resource) = find_by_plural(&discovery, raw) {
                resources.push(api_resource);
            }
            // Recognized alias with no namespaced match (e.g. `pv`, which is
            // cluster-scoped) -- silently skipped per the Non-goal.
            continue;
        }
        // Unrecognized or malformed group-qualified ref: logged and skipped.
        eprintln!("namespace mapping: unknown or invalid kind {raw:?}, skipping");
    }

    for api_resource in resources {
        sync_dynamic_kind(source, destination, spec, &api_resource, outcome).await;
    }
}

fn find_by_plural(discovery: &Discovery, raw: &str) -> Option<ApiResource> {
    let wanted = raw.to_ascii_lowercase();
    discovery.groups().find_map(|group| {
        group.resources_by_stability().into_iter().find_map(|(ar, caps)| {
            (caps.scope == Scope::Namespaced && ar.plural.eq_ignore_ascii_case(&wanted))
                .then_some(ar)
        })
    })
}

async fn sync_dynamic_kind(
    source: &Client,
    destination: &Client,
    spec: &NamespaceMappingSpec,
    api_resource: &ApiResource,
    outcome: &mut SyncOutcome,
) {
    let kind_label = api_resource.kind.clone();
    let source_api = pipeline::dynamic::dynamic_api(source, api_resource, &spec.source_namespace);
    let dest_api = pipeline::dynamic::dynamic_api(destination, api_resource, &spec.destination_namespace);

    let items: Vec<DynamicObject> = match source_api.list(&list_params(spec)).await {
        Ok(list) => list.items,
        Err(e) => {
            outcome.push_error(&kind_label, "*", &e);
            return;
        }
    };

    for item in &items {
        let name = item.name_any();
        if excluded_by_label(item.labels(), &spec.exclude_labels)
            || excluded_by_name(&kind_label, &name, &spec.exclude_resources)
        {
            outcome.stats.resources_skipped += 1;
            continue;
        }
        let Some(desired) = pipeline::dynamic::rewrite(item, &spec.destination_namespace) else {
            outcome.stats.resources_skipped += 1;
            continue;
        };
        let result = match dest_api.get_opt(&name).await {
            Ok(Some(existing)) => {
                if pipeline::dynamic::needs_update(&desired, &existing) {
                    let updated = pipeline::dynamic::apply_for_update(desired, &existing);
                    dest_api
                        .replace(&name, &PostParams::default(), &updated)
                        .await
                        .map(|_| "Updated")
                } else {
                    Ok("NoOp")
                }
            }
            Ok(None) => dest_api
                .create(&PostParams::default(), &desired)
                .await
                .map(|_| "Created"),
            Err(e) => Err(e),
        };
        match result {
            Ok(action) => {
                if action != "NoOp" {
                    outcome.stats.resources_synced += 1;
                }
                outcome.push_row(
                    &kind_label,
                    ResourceStatusRow {
                        kind: kind_label.clone(),
                        name: name.clone(),
                        action: action.to_string(),
                        message: None,
                        last_synced_time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
                            k8s_openapi::jiff::Timestamp::now(),
                        )),
                    },
                );
            }
            Err(e) => outcome.push_error(&kind_label, &name, &e),
        }
    }
}

/// Creates the destination namespace if it's missing (SPEC_FULL.md §C.2):
/// `namespaceConfig.createNamespace` gates the create, and
/// `preserveLabels`/`preserveAnnotations` decide whether the source
/// namespace's own labels/annotations are copied onto it. Does nothing if
/// the destination namespace already exists.
async fn ensure_destination_namespace(
    source: &Client,
    destination: &Client,
    spec: &NamespaceMappingSpec,
) -> Result<(), kube::Error> {
    let namespaces: Api<Namespace> = Api::all(destination.clone());
    if namespaces.get_opt(&spec.destination_namespace).await?.is_some() {
        return Ok(());
    }
    if !spec.namespace_config.create_namespace {
        return Ok(());
    }

    let mut metadata = ObjectMeta {
        name: Some(spec.destination_namespace.clone()),
        ..Default::default()
    };

    if spec.namespace_config.preserve_labels || spec.namespace_config.preserve_annotations {
        let source_namespaces: Api<Namespace> = Api::all(source.clone());
        if let Some(source_ns) = source_namespaces.get_opt(&spec.source_namespace).await? {
            if spec.namespace_config.preserve_labels {
                metadata.labels = source_ns.metadata.labels.clone();
            }
            if spec.namespace_config.preserve_annotations {
                metadata.annotations = source_ns.metadata.annotations.clone();
            }
        }
    }

    let namespace = Namespace {
        metadata,
        ..Default::default()
    };
    match namespaces.create(&PostParams::default(), &namespace).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
        Err(e) => Err(e),
    }
}

fn list_params(spec: &NamespaceMappingSpec) -> ListParams {
    let mut lp = ListParams::default();
    if let Some(selector) = &spec.label_selector {
        lp = lp.labels(selector);
    }
    lp
}

macro_rules! sync_simple_kind {
    ($name:ident, $ty:ty, $kind_str:expr, $module:path) => {
        async fn $name(
            source: &Client,
            destination: &Client,
            spec: &NamespaceMappingSpec,
            outcome: &mut SyncOutcome,
        ) {
            use $module as rewriter;
            let source_api: Api<$ty> = Api::namespaced(source.clone(), &spec.source_namespace);
            let dest_api: Api<$ty> = Api::namespaced(destination.clone(), &spec.destination_namespace);
            let items = match source_api.list(&list_params(spec)).await {
                Ok(list) => list.items,
                Err(e) => {
                    outcome.push_error($kind_str, "*", &e);
                    return;
                }
            };
            for item in &items {
                let name = item.name_any();
                if excluded_by_label(item.labels(), &spec.exclude_labels)
                    || excluded_by_name($kind_str, &name, &spec.exclude_resources)
                {
                    outcome.stats.resources_skipped += 1;
                    continue;
                }
                let Some(desired) = rewriter::rewrite(item, &spec.destination_namespace) else {
                    outcome.stats.resources_skipped += 1;
                    continue;
                };
                let result = match dest_api.get_opt(&name).await {
                    Ok(Some(existing)) => {
                        if rewriter::needs_update(&desired, &existing) {
                            let updated = rewriter::apply_for_update(desired, &existing);
                            dest_api
                                .replace(&name, &PostParams::default(), &updated)
                                .await
                                .map(|_| "Updated")
                        } else {
                            Ok("NoOp")
                        }
                    }
                    Ok(None) => dest_api
                        .create(&PostParams::default(), &desired)
                        .await
                        .map(|_| "Created"),
                    Err(e) => Err(e),
                };
                match result {
                    Ok(action) => {
                        if action != "NoOp" {
                            outcome.stats.resources_synced += 1;
                        }
                        outcome.push_row(
                            $kind_str,
                            ResourceStatusRow {
                                kind: $kind_str.to_string(),
                                name: name.clone(),
                                action: action.to_string(),
                                message: None,
                                last_synced_time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
                                    k8s_openapi::jiff::Timestamp::now(),
                                )),
                            },
                        );
                    }
                    Err(e) => outcome.push_error($kind_str, &name, &e),
                }
            }
        }
    };
}

sync_simple_kind!(sync_configmaps, ConfigMap, "ConfigMap", pipeline::configmap);
sync_simple_kind!(sync_secrets, Secret, "Secret", pipeline::secret);
sync_simple_kind!(sync_services, Service, "Service", pipeline::service);
sync_simple_kind!(sync_ingresses, Ingress, "Ingress", pipeline::ingress);

async fn sync_deployments(
    source: &Client,
    destination: &Client,
    spec: &NamespaceMappingSpec,
    outcome: &mut SyncOutcome,
) {
    let source_api: Api<Deployment> = Api::namespaced(source.clone(), &spec.source_namespace);
    let dest_api: Api<Deployment> = Api::namespaced(destination.clone(), &spec.destination_namespace);
    let items = match source_api.list(&list_params(spec)).await {
        Ok(list) => list.items,
        Err(e) => {
            outcome.push_error("Deployment", "*", &e);
            return;
        }
    };
    for item in &items {
        let name = item.name_any();
        if excluded_by_label(item.labels(), &spec.exclude_labels)
            || excluded_by_name("Deployment", &name, &spec.exclude_resources)
        {
            outcome.stats.resources_skipped += 1;
            continue;
        }
        let Some(rewritten) = pipeline::deployment::rewrite(item, &spec.destination_namespace, spec.scale_to_zero)
        else {
            outcome.stats.resources_skipped += 1;
            continue;
        };
        outcome.deployment_scales.push(DeploymentScaleRecord {
            name: rewritten.scale.name,
            original_replicas: rewritten.scale.original_replicas,
            last_synced_time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
                k8s_openapi::jiff::Timestamp::now(),
            )),
        });
        let desired = rewritten.deployment;
        let result = match dest_api.get_opt(&name).await {
            Ok(Some(existing)) => {
                if pipeline::deployment::needs_update(&desired, &existing) {
                    let updated = pipeline::deployment::apply_for_update(desired, &existing);
                    dest_api
                        .replace(&name, &PostParams::default(), &updated)
                        .await
                        .map(|_| "Updated")
                } else {
                    Ok("NoOp")
                }
            }
            Ok(None) => dest_api
                .create(&PostParams::default(), &desired)
                .await
                .map(|_| "Created"),
            Err(e) => Err(e),
        };
        match result {
            Ok(action) => {
                if action != "NoOp" {
                    outcome.stats.resources_synced += 1;
                }
                outcome.push_row(
                    "Deployment",
                    ResourceStatusRow {
                        kind: "Deployment".to_string(),
                        name: name.clone(),
                        action: action.to_string(),
                        message: None,
                        last_synced_time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
                            k8s_openapi::jiff::Timestamp::now(),
                        )),
                    },
                );
            }
            Err(e) => outcome.push_error("Deployment", &name, &e),
        }
    }
}

async fn sync_pvcs(
    source: &Client,
    destination: &Client,
    spec: &NamespaceMappingSpec,
    outcome: &mut SyncOutcome,
) {
    use k8s_openapi::api::core::v1::PersistentVolumeClaim;
    let source_api: Api<PersistentVolumeClaim> =
        Api::namespaced(source.clone(), &spec.source_namespace);
    let dest_api: Api<PersistentVolumeClaim> =
        Api::namespaced(destination.clone(), &spec.destination_namespace);
    let items = match source_api.list(&list_params(spec)).await {
        Ok(list) => list.items,
        Err(e) => {
            outcome.push_error("PersistentVolumeClaim", "*", &e);
            return;
        }
    };
    for item in &items {
        let name = item.name_any();
        if excluded_by_label(item.labels(), &spec.exclude_labels)
            || excluded_by_name("PersistentVolumeClaim", &name, &spec.exclude_resources)
        {
            outcome.stats.resources_skipped += 1;
            continue;
        }
        let pvc_cfg = &spec.pvc_config;
        let Some(desired) = pipeline::pvc::rewrite_for_create(
            item,
            &spec.destination_namespace,
            &pvc_cfg.storage_class_mappings,
            &pvc_cfg.access_mode_mappings,
            pvc_cfg.preserve_volume_attributes,
            pvc_cfg.sync_persistent_volumes,
        ) else {
            outcome.stats.resources_skipped += 1;
            continue;
        };
        let result = match dest_api.get_opt(&name).await {
            Ok(Some(existing)) => {
                if pipeline::pvc::size_unchanged(&existing, &desired) {
                    Ok("NoOp")
                } else {
                    let updated = pipeline::pvc::apply_for_update(&existing, &desired);
                    dest_api
                        .replace(&name, &PostParams::default(), &updated)
                        .await
                        .map(|_| "Updated")
                }
            }
            Ok(None) => dest_api
                .create(&PostParams::default(), &desired)
                .await
                .map(|_| "Created"),
            Err(e) => Err(e),
        };
        match result {
            Ok(action) => {
                if action != "NoOp" {
                    outcome.stats.resources_synced += 1;
                }
                outcome.push_row(
                    "PersistentVolumeClaim",
                    ResourceStatusRow {
                        kind: "PersistentVolumeClaim".to_string(),
                        name: name.clone(),
                        action: action.to_string(),
                        message: None,
                        last_synced_time: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
                            k8s_openapi::jiff::Timestamp::now(),
                        )),
                    },
                );
                outcome.synced_pvc_names.push(name);
            }
            Err(e) => outcome.push_error("PersistentVolumeClaim", &name, &e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclude_by_name_matches_plain_and_kind_qualified() {
        let exclude = vec!["web".to_string(), "Secret/creds".to_string()];
        assert!(excluded_by_name("Service", "web", &exclude));
        assert!(excluded_by_name("Secret", "creds", &exclude));
        assert!(!excluded_by_name("Service", "other", &exclude));
    }

    #[test]
    fn exclude_by_label_checks_key_presence() {
        let mut labels = std::collections::BTreeMap::new();
        labels.insert("tier".to_string(), "cache".to_string());
        assert!(excluded_by_label(&labels, &["tier".to_string()]));
        assert!(!excluded_by_label(&labels, &["env".to_string()]));
    }
}
