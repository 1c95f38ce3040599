use dr_syncer_types::{ClusterMapping, ClusterMappingPhase, ConnectivityStatus, CONDITION_SYNCED};
use kube::Api;

use crate::util::error::Error;
use crate::util::patch::{patch_status_retrying, set_condition};

pub async fn transition(
    api: &Api<ClusterMapping>,
    name: &str,
    phase: ClusterMappingPhase,
    message: impl Into<String>,
) -> Result<ClusterMapping, Error> {
    let message = message.into();
    patch_status_retrying(api, name, |status| {
        status.phase = phase;
        status.message = Some(message.clone());
        let synced = phase == ClusterMappingPhase::Connected;
        set_condition(
            &mut status.conditions,
            CONDITION_SYNCED,
            synced,
            phase.to_string().as_str(),
            message.clone(),
            None,
        );
        status.last_attempt_time =
            Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
                k8s_openapi::jiff::Timestamp::now(),
            ));
        if synced {
            status.consecutive_failures = 0;
            status.last_verified =
                Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::Time::from(
                    k8s_openapi::jiff::Timestamp::now(),
                ));
        } else if phase == ClusterMappingPhase::Failed {
            status.consecutive_failures += 1;
        }
    })
    .await
}

pub async fn record_connectivity(
    api: &Api<ClusterMapping>,
    name: &str,
    connectivity: ConnectivityStatus,
) -> Result<ClusterMapping, Error> {
    patch_status_retrying(api, name, |status| {
        status.connectivity = Some(connectivity.clone());
    })
    .await
}
