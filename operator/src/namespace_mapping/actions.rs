use dr_syncer_types::{NamespaceMapping, NamespaceMappingPhase, CLEANUP_FINALIZER, CONDITION_SYNCED};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
};
use serde_json::json;

use crate::util::error::Error;
use crate::util::patch::{patch_status_retrying, set_condition};

use super::sync::SyncOutcome;

/// Adds the cleanup finalizer if it isn't present yet (spec.md §4.5).
pub async fn ensure_finalizer(api: &Api<NamespaceMapping>, instance: &NamespaceMapping) -> Result<(), Error> {
    if instance.finalizers().iter().any(|f| f == CLEANUP_FINALIZER) {
        return Ok(());
    }
    let mut finalizers = instance.finalizers().to_vec();
    finalizers.push(CLEANUP_FINALIZER.to_string());
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(
        &instance.name_any(),
        &PatchParams::default(),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}

/// Removes the cleanup finalizer, letting the API server delete the object
/// (spec.md §4.5: "remove the finalizer" is the terminal step either way).
pub async fn remove_finalizer(api: &Api<NamespaceMapping>, instance: &NamespaceMapping) -> Result<(), Error> {
    let finalizers: Vec<String> = instance
        .finalizers()
        .iter()
        .filter(|f| *f != CLEANUP_FINALIZER)
        .cloned()
        .collect();
    let patch = json!({ "metadata": { "finalizers": finalizers } });
    api.patch(
        &instance.name_any(),
        &PatchParams::default(),
        &Patch::Merge(patch),
    )
    .await?;
    Ok(())
}

pub async fn record_phase(
    api: &Api<NamespaceMapping>,
    name: &str,
    phase: NamespaceMappingPhase,
    message: impl Into<String>,
) -> Result<NamespaceMapping, Error> {
    let message = message.into();
    patch_status_retrying(api, name, |status| {
        status.phase = phase;
        let synced = phase == NamespaceMappingPhase::Completed;
        set_condition(
            &mut status.conditions,
            CONDITION_SYNCED,
            synced,
            phase.to_string().as_str(),
            message.clone(),
            None,
        );
        if synced {
            status.retry_status.consecutive_failures = 0;
            status.last_sync_time = Some(Time::from(k8s_openapi::jiff::Timestamp::now()));
        } else if phase == NamespaceMappingPhase::Failed {
            status.retry_status.consecutive_failures += 1;
        }
        status.retry_status.last_attempt_time = Some(Time::from(k8s_openapi::jiff::Timestamp::now()));
    })
    .await
}

/// Writes the result of one object-sync pass into status (spec.md §4.3,
/// §7): stats, per-object rows (capped per kind), and sync errors.
pub async fn record_sync_outcome(
    api: &Api<NamespaceMapping>,
    name: &str,
    outcome: &SyncOutcome,
) -> Result<NamespaceMapping, Error> {
    patch_status_retrying(api, name, |status| {
        status.sync_stats = outcome.stats.clone();
        status.resource_status = outcome.rows.clone();
        status.resource_status_truncated = outcome.truncated;
        status.sync_errors = outcome.errors.clone();
        status.deployment_scales = outcome.deployment_scales.clone();
    })
    .await
}

pub async fn record_next_sync_time(
    api: &Api<NamespaceMapping>,
    name: &str,
    next: Option<Time>,
) -> Result<NamespaceMapping, Error> {
    patch_status_retrying(api, name, |status| {
        status.next_sync_time = next.clone();
    })
    .await
}

/// Nudges `resourceVersion` without changing anything meaningful, so the
/// controller's own watch observes a change and reconciles promptly
/// (used by the continuous-mode watch trigger in [`super::watch`]).
pub async fn touch(api: &Api<NamespaceMapping>, name: &str) -> Result<NamespaceMapping, Error> {
    patch_status_retrying(api, name, |status| {
        status.retry_status.last_attempt_time = Some(Time::from(k8s_openapi::jiff::Timestamp::now()));
    })
    .await
}

pub async fn acknowledge_sync_now(
    api: &Api<NamespaceMapping>,
    name: &str,
    generation: i64,
) -> Result<NamespaceMapping, Error> {
    patch_status_retrying(api, name, |status| {
        status.acknowledged_sync_now_generation = Some(generation);
    })
    .await
}
