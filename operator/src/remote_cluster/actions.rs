use dr_syncer_types::{RemoteCluster, condition_types};
use kube::Api;

use crate::util::error::Error;
use crate::util::patch::{patch_status_retrying, set_condition};

/// Records a single condition outcome and keeps `consecutiveFailures` /
/// `lastAttemptTime` in step with it (spec.md §7, §4.1).
pub async fn record_condition(
    api: &Api<RemoteCluster>,
    name: &str,
    type_: &str,
    status: bool,
    reason: &str,
    message: impl Into<String>,
) -> Result<RemoteCluster, Error> {
    let message = message.into();
    patch_status_retrying(api, name, |status_obj| {
        set_condition(
            &mut status_obj.conditions,
            type_,
            status,
            reason,
            message.clone(),
            None,
        );
        if status {
            status_obj.consecutive_failures = 0;
        } else {
            status_obj.consecutive_failures += 1;
        }
        status_obj.last_attempt_time =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
                k8s_openapi::jiff::Timestamp::now(),
            ));
    })
    .await
}

pub async fn record_cluster_available(
    api: &Api<RemoteCluster>,
    name: &str,
    available: bool,
) -> Result<RemoteCluster, Error> {
    patch_status_retrying(api, name, |status_obj| {
        status_obj.cluster_available = available;
        if available {
            status_obj.last_sync_time =
                Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
                    k8s_openapi::jiff::Timestamp::now(),
                ));
        }
    })
    .await
}

pub async fn record_pvc_sync_ready(
    api: &Api<RemoteCluster>,
    name: &str,
    ready: bool,
) -> Result<RemoteCluster, Error> {
    patch_status_retrying(api, name, |status_obj| {
        status_obj.pvc_sync_ready = ready;
    })
    .await
}

/// Condition `Type` constants re-exported for reconcile's match arms.
pub use condition_types::*;
