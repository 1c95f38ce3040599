use super::backoff::status_conflict_delay;
use super::error::Error;
use dr_syncer_types::{
    ClusterMapping, ClusterMappingStatus, NamespaceMapping, NamespaceMappingStatus, RemoteCluster,
    RemoteClusterStatus,
};
use kube::{
    Api,
    api::{PostParams, Resource},
};
use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;

/// Objects whose status subresource can be fetched fresh and mutated
/// in-place before being written back. Implemented by the three CRD kinds
/// in `dr_syncer_types`.
pub trait Object<S> {
    fn mut_status(&mut self) -> &mut S;
}

impl Object<RemoteClusterStatus> for RemoteCluster {
    fn mut_status(&mut self) -> &mut RemoteClusterStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl Object<ClusterMappingStatus> for ClusterMapping {
    fn mut_status(&mut self) -> &mut ClusterMappingStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

impl Object<NamespaceMappingStatus> for NamespaceMapping {
    fn mut_status(&mut self) -> &mut NamespaceMappingStatus {
        self.status.get_or_insert_with(Default::default)
    }
}

/// Conflict-tolerant status write (spec.md §4.1): GET the latest version,
/// apply `f` to a fresh copy of its status, PUT it back via the status
/// subresource. On a version conflict (HTTP 409), refetch and retry with a
/// gentle geometric backoff (100ms, x1.5) up to 10 attempts, after which the
/// caller should requeue instead of blocking further. The engine never
/// touches `spec` here -- only `status` is ever sent.
pub async fn patch_status_retrying<S, T>(
    api: &Api<T>,
    name: &str,
    mut f: impl FnMut(&mut S),
) -> Result<T, Error>
where
    T: Clone + Resource + Object<S> + Serialize + DeserializeOwned + Debug,
{
    let mut last_err = None;
    for attempt in 0..10u32 {
        let mut current = api.get_status(name).await?;
        f(current.mut_status());
        match api
            .replace_status(name, &PostParams::default(), serde_json::to_vec(&current)?)
            .await
        {
            Ok(updated) => return Ok(updated),
            Err(kube::Error::Api(resp)) if resp.code == 409 => {
                last_err = Some(kube::Error::Api(resp));
                tokio::time::sleep(status_conflict_delay(attempt)).await;
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(last_err
        .map(Error::from)
        .unwrap_or_else(|| Error::other("status update conflict retries exhausted")))
}

/// Compares two condition sets ignoring `lastTransitionTime`, so a
/// no-op status write never advances it (spec.md §7, §8).
pub fn conditions_equal_ignoring_transition_time(
    a: &[k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition],
    b: &[k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition],
) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| {
        x.type_ == y.type_
            && x.status == y.status
            && x.reason == y.reason
            && x.message == y.message
            && x.observed_generation == y.observed_generation
    })
}

/// Inserts or updates a condition in-place, only advancing
/// `lastTransitionTime` when `type`/`status`/`reason`/`message` actually
/// changed (spec.md §7).
pub fn set_condition(
    conditions: &mut Vec<k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition>,
    type_: &str,
    status: bool,
    reason: &str,
    message: impl Into<String>,
    observed_generation: Option<i64>,
) {
    use k8s_openapi::{
        apimachinery::pkg::apis::meta::v1::{Condition, Time},
        jiff::Timestamp,
    };
    let message = message.into();
    let status_str = if status { "True" } else { "False" }.to_string();
    let now = Time::from(Timestamp::now());
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        let changed =
            existing.status != status_str || existing.reason.as_deref() != Some(reason) || existing.message != message;
        existing.status = status_str;
        existing.reason = Some(reason.to_string());
        existing.message = message;
        existing.observed_generation = observed_generation;
        if changed {
            existing.last_transition_time = now;
        }
        return;
    }
    conditions.push(Condition {
        type_: type_.to_string(),
        status: status_str,
        reason: Some(reason.to_string()),
        message,
        observed_generation,
        last_transition_time: now,
    });
}
