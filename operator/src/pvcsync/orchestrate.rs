//! Ties the PVC data-sync steps together (spec.md §4.4.4): global
//! concurrency admission, source-node discovery, ephemeral destination
//! pod lifecycle, and the rsync pull itself. Everything here runs inline
//! within a single NamespaceMapping reconcile, per spec.md §5.

use dr_syncer_types::DataSyncConfig;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, api::ListParams};
use rand::Rng;

use super::{keys, node, transfer};
use crate::util::concurrency::ConcurrencyGate;
use crate::util::error::{Error, ErrorClass, classify_error};

/// Counts running `app=dr-syncer-agent` pods across every namespace of a
/// remote cluster -- the RemoteCluster reconciler's "agent reconciler"
/// check (spec.md §4.1, `PVCSyncReady`).
pub async fn count_agent_pods(client: &Client) -> Result<usize, Error> {
    let pods: Api<Pod> = Api::all(client.clone());
    let list = pods
        .list(&ListParams::default().labels(keys::AGENT_LABEL_SELECTOR))
        .await?;
    Ok(list
        .items
        .iter()
        .filter(|p| {
            p.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .map(|phase| phase == "Running")
                .unwrap_or(false)
        })
        .count())
}

/// Runs one PVC's data transfer end to end, admitted through `gate` keyed
/// on `(source_namespace, pvc_name)` so the same volume is never pulled by
/// two overlapping transfers (spec.md §4.4.4 step 1).
pub async fn sync_pvc_data(
    gate: &ConcurrencyGate<(String, String)>,
    source_client: &Client,
    source_namespace: &str,
    destination_client: &Client,
    destination_namespace: &str,
    pvc_name: &str,
    ssh_key_secret: Option<&str>,
    data_sync: &DataSyncConfig,
) -> Result<(), Error> {
    let _permit = gate
        .acquire((source_namespace.to_string(), pvc_name.to_string()))
        .await;

    let source_node = node::discover(source_client, source_namespace, pvc_name)
        .await
        .map_err(|e| e.error)?;
    let source_host = node::agent_host_for_node(source_client, source_namespace, &source_node)
        .await
        .map_err(|e| e.error)?;

    // A running destination workload pinned to the volume's node wins when
    // one exists (e.g. a deployment not scaled to zero); otherwise the
    // scheduler places the ephemeral pod freely and relies on the storage
    // class to bind the destination PVC wherever it lands.
    transfer::ensure_rsync_configmap(destination_client, destination_namespace).await?;
    let destination_node = node::discover(destination_client, destination_namespace, pvc_name)
        .await
        .ok();

    // spec.md §4.4.5: same exponential-backoff-with-jitter shape as the
    // engine's own backoff, but scoped to this single sync pass. A
    // transfer-level failure that classifies as `WaitForNextSync` (e.g. a
    // 409 from a concurrent cleanup) skips the remaining steps outright;
    // the next periodic sync picks the PVC back up.
    let schedule = super::retry_schedule();
    let mut step: u32 = 0;
    loop {
        let attempt = run_one_attempt(
            destination_client,
            destination_namespace,
            destination_node.as_deref(),
            pvc_name,
            ssh_key_secret,
            &source_host,
            data_sync,
        )
        .await;

        let err = match attempt {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };

        if classify_error(&err) == ErrorClass::WaitForNextSync {
            return Err(err);
        }
        let jitter = rand::rng().random_range(-1.0..1.0);
        let Some(delay) = schedule.delay_for(step, jitter) else {
            return Err(err);
        };
        step += 1;
        tokio::time::sleep(delay).await;
    }
}

async fn run_one_attempt(
    client: &Client,
    namespace: &str,
    destination_node: Option<&str>,
    pvc_name: &str,
    ssh_key_secret: Option<&str>,
    source_host: &str,
    data_sync: &DataSyncConfig,
) -> Result<(), Error> {
    let pod = transfer::create_rsync_pod(client, namespace, destination_node, pvc_name, ssh_key_secret).await?;

    let result = run_and_transfer(client, namespace, &pod.name, source_host, data_sync).await;

    transfer::cleanup(client, namespace, &pod.name).await;
    result
}

async fn run_and_transfer(
    client: &Client,
    namespace: &str,
    pod_name: &str,
    source_host: &str,
    data_sync: &DataSyncConfig,
) -> Result<(), Error> {
    transfer::wait_ready(client, namespace, pod_name).await?;
    transfer::run_transfer(client, namespace, pod_name, source_host, data_sync).await
}
