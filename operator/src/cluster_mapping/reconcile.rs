use dr_syncer_types::{ClusterMapping, ClusterMappingPhase, RemoteCluster};
use futures::stream::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    Api, ResourceExt,
    api::{Patch, PatchParams},
    client::Client,
    runtime::{controller::Action, predicates},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use rand::Rng;
use serde_json::json;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use super::actions;
use crate::clients;
use crate::pvcsync::{keys, verify};
use crate::util::{
    Error,
    backoff::ExponentialBackoff,
    colors::{FG1, FG2},
    mutexmap::MutexMap,
};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

const CONNECTED_REQUEUE: Duration = Duration::from_secs(3600);
const FAILED_REQUEUE: Duration = Duration::from_secs(300);
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

pub async fn run(client: Client, args: dr_syncer_common::args::ControllerArgs) -> Result<(), Error> {
    println!("{}", "⚙️ Starting ClusterMapping controller...".green());

    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone(), args.clone()));

    let lease_namespace = args.namespace.clone();
    let holder_id = dr_syncer_common::args::holder_id("cluster-mapping");
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "dr-syncer-cluster-mapping-controller-lock".to_string(),
            lease_ttl: args.lease_ttl(),
        },
    );

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        dr_syncer_common::shutdown::shutdown_signal().await;
        shutdown_signal.cancel();
    });

    let mut controller_task: Option<tokio::task::JoinHandle<()>> = None;
    let mut tick = tokio::time::interval(args.lease_renew_interval());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                if let Some(task) = controller_task.take() {
                    task.abort();
                    task.await.ok();
                }
                break Ok(())
            },
            _ = tick.tick() => {}
        }
        let lease = match leadership.try_acquire_or_renew().await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("leader election renew/acquire failed: {e}");
                if let Some(task) = controller_task.take() {
                    task.abort();
                }
                continue;
            }
        };
        if matches!(lease, LeaseLockResult::Acquired(_)) {
            if controller_task.is_none() {
                println!("{}", "👑 Acquired leadership; starting ClusterMapping controller".green());
                let context_for_controller = context.clone();
                let crd_api: Api<ClusterMapping> = Api::all(client.clone());
                let (controller, watch) =
                    crate::util::trigger::filtered_controller(crd_api, predicates::generation);
                controller_task = Some(tokio::spawn(async move {
                    tokio::select! {
                        _ = controller
                            .run(reconcile, on_error, context_for_controller)
                            .for_each(|_res| async move {}) => {},
                        _ = watch => {},
                    }
                }));
            }
        } else if let Some(task) = controller_task.take() {
            eprintln!("lost leadership; stopping ClusterMapping controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    args: dr_syncer_common::args::ControllerArgs,
    /// Process-wide, tied to the controller manager's lifecycle (spec.md
    /// §5 "Shared-resource policy"): guards agent-side state (key
    /// installation, connectivity probing) per cluster name so two
    /// ClusterMappings sharing a cluster never race on it.
    cluster_locks: MutexMap<String>,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    fn new(client: Client, args: dr_syncer_common::args::ControllerArgs) -> Self {
        let cluster_locks = MutexMap::new();
        #[cfg(feature = "metrics")]
        {
            ContextData {
                client,
                args,
                cluster_locks,
                metrics: ControllerMetrics::new("cluster-mapping"),
            }
        }
        #[cfg(not(feature = "metrics"))]
        {
            ContextData { client, args, cluster_locks }
        }
    }
}

async fn reconcile(instance: Arc<ClusterMapping>, context: Arc<ContextData>) -> Result<Action, Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }
    if instance.spec.paused {
        return Ok(Action::requeue(CONNECTED_REQUEUE));
    }

    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("ClusterMapping must be namespaced".to_string()))?;
    let name = instance.name_any();

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    if let Some(status) = &instance.status {
        if let Some(action) = backoff_gate(status.consecutive_failures, status.last_attempt_time.as_ref()) {
            return Ok(action);
        }
    }

    let api: Api<ClusterMapping> = Api::namespaced(context.client.clone(), &namespace);
    let remote_clusters: Api<RemoteCluster> = Api::namespaced(context.client.clone(), &namespace);

    match run_chain(&context, &api, &remote_clusters, &name, &namespace, &instance).await {
        Ok(ClusterMappingPhase::Connected) => {
            println!(
                "{}{}{}{}",
                namespace.color(FG2),
                "/".color(FG1),
                name.color(FG2),
                " connected".color(FG1),
            );
            Ok(Action::requeue(CONNECTED_REQUEUE))
        }
        Ok(_) => Ok(Action::requeue(FAILED_REQUEUE)),
        Err(e) => {
            eprintln!("{}", format!("{namespace}/{name} reconcile failed: {e}").red());
            actions::transition(&api, &name, ClusterMappingPhase::Failed, format!("{e}")).await?;
            Ok(Action::requeue(ERROR_REQUEUE))
        }
    }
}

/// Single-pass run of the Pending -> Connecting -> Connected/Failed chain
/// (spec.md §4.1 "ClusterMapping state machine"). The requeue interval the
/// caller applies to the returned phase stands in for the separate
/// per-state ticks the source describes.
async fn run_chain(
    context: &ContextData,
    api: &Api<ClusterMapping>,
    remote_clusters: &Api<RemoteCluster>,
    name: &str,
    namespace: &str,
    instance: &ClusterMapping,
) -> Result<ClusterMappingPhase, Error> {
    actions::transition(api, name, ClusterMappingPhase::Pending, "validating cluster mapping").await?;

    let source = remote_clusters.get(&instance.spec.source_cluster).await.map_err(|e| {
        Error::UserInput(format!(
            "source cluster {} not found: {e}",
            instance.spec.source_cluster
        ))
    })?;
    let target = remote_clusters.get(&instance.spec.target_cluster).await.map_err(|e| {
        Error::UserInput(format!(
            "target cluster {} not found: {e}",
            instance.spec.target_cluster
        ))
    })?;
    if !source.spec.pvc_sync.enabled || !target.spec.pvc_sync.enabled {
        let phase = ClusterMappingPhase::Failed;
        actions::transition(api, name, phase, "pvc-sync is not enabled on both clusters").await?;
        return Ok(phase);
    }

    actions::transition(api, name, ClusterMappingPhase::Connecting, "distributing SSH trust").await?;

    // Lock both cluster names in a fixed order so two ClusterMappings that
    // share a cluster (either side) never install keys or probe
    // connectivity against it concurrently; sorting avoids A-then-B vs
    // B-then-A deadlocks between mappings sharing both clusters.
    let (first_name, second_name) = if instance.spec.source_cluster <= instance.spec.target_cluster {
        (&instance.spec.source_cluster, &instance.spec.target_cluster)
    } else {
        (&instance.spec.target_cluster, &instance.spec.source_cluster)
    };
    let _first_lock = context.cluster_locks.lock(first_name.clone()).await;
    let _second_lock = if first_name != second_name {
        Some(context.cluster_locks.lock(second_name.clone()).await)
    } else {
        None
    };

    let source_handle = clients::resolve(
        &context.client,
        namespace,
        &source.spec.kubeconfig_secret_ref.name,
        source.spec.kubeconfig_secret_ref.namespace.as_deref(),
        &source.spec.kubeconfig_secret_ref.key,
        context.args.ignore_cert,
    )
    .await
    .map_err(|e| e.error)?;
    let target_handle = clients::resolve(
        &context.client,
        namespace,
        &target.spec.kubeconfig_secret_ref.name,
        target.spec.kubeconfig_secret_ref.namespace.as_deref(),
        &target.spec.kubeconfig_secret_ref.key,
        context.args.ignore_cert,
    )
    .await
    .map_err(|e| e.error)?;

    let source_namespace = &context.args.namespace;
    let target_namespace = &context.args.namespace;

    // spec.md §4.4.1: either push one configured public key (path a) or
    // distribute every target agent's discovered host key (path b).
    let keys_to_install = if let Some(ssh_key_ref) = &instance.spec.ssh_key_secret_ref {
        let key = keys::read_configured_public_key(
            &context.client,
            namespace,
            &ssh_key_ref.name,
            &ssh_key_ref.key_or("id_rsa.pub"),
        )
        .await?;
        vec![key]
    } else {
        keys::discover_target_host_keys(&target_handle.client, target_namespace).await?
    };
    keys::distribute(&source_handle.client, source_namespace, &keys_to_install).await?;

    // SPEC_FULL.md §C.1: an operator-set `rotate-ssh-key` annotation on the
    // target RemoteCluster just asks for the unconditional redistribution
    // above to happen promptly; since it already ran this pass, clear the
    // annotation so the request is observed exactly once.
    if target
        .annotations()
        .get(dr_syncer_common::annotations::ROTATE_SSH_KEY)
        .map(|v| v == "true")
        .unwrap_or(false)
    {
        clear_rotate_ssh_key(remote_clusters, &target.name_any()).await?;
    }

    if !instance.spec.verify_connectivity {
        let phase = ClusterMappingPhase::Connected;
        actions::transition(api, name, phase, "connectivity verification disabled").await?;
        return Ok(phase);
    }

    let connectivity = verify::verify(
        &source_handle.client,
        source_namespace,
        &target_handle.client,
        target_namespace,
        context.args.verify_workers,
        instance.spec.connectivity_timeout(),
    )
    .await?;

    actions::record_connectivity(api, name, connectivity.clone()).await?;

    let phase = if verify::all_targets_connected(&connectivity) {
        ClusterMappingPhase::Connected
    } else {
        ClusterMappingPhase::Failed
    };
    actions::transition(
        api,
        name,
        phase,
        format!(
            "{}/{} target agents connected",
            connectivity.connected_agents, connectivity.total_target_agents
        ),
    )
    .await?;
    Ok(phase)
}

/// spec.md §4.1 "Backoff contract": skip real work while the object is
/// still inside its computed backoff window since the last failed attempt.
fn backoff_gate(consecutive_failures: u32, last_attempt_time: Option<&Time>) -> Option<Action> {
    let last = last_attempt_time?;
    if consecutive_failures == 0 {
        return None;
    }
    let now = k8s_openapi::jiff::Timestamp::now().as_second();
    let elapsed = Duration::from_secs(now.saturating_sub(last.0.as_second()).max(0) as u64);
    let jitter = rand::rng().random_range(-1.0..1.0);
    ExponentialBackoff::default()
        .remaining(consecutive_failures, elapsed, jitter)
        .map(Action::requeue)
}

/// Clears `dr-syncer.io/rotate-ssh-key` on `name` via JSON merge patch
/// (SPEC_FULL.md §C.1), making the request idempotent.
async fn clear_rotate_ssh_key(remote_clusters: &Api<RemoteCluster>, name: &str) -> Result<(), Error> {
    let mut annotations = serde_json::Map::new();
    annotations.insert(
        dr_syncer_common::annotations::ROTATE_SSH_KEY.to_string(),
        serde_json::Value::Null,
    );
    let patch = json!({ "metadata": { "annotations": annotations } });
    remote_clusters
        .patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await?;
    Ok(())
}

fn on_error(instance: Arc<ClusterMapping>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("ClusterMapping reconcile error: {error:?} {:?}", instance.name_any()).red()
    );
    Action::requeue(ERROR_REQUEUE)
}
