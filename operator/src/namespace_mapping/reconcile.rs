use dr_syncer_common::annotations::SYNC_NOW;
use dr_syncer_types::{ClusterMapping, NamespaceMapping, NamespaceMappingPhase, RemoteCluster};
use futures::stream::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    Api, ResourceExt,
    client::Client,
    runtime::controller::Action,
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use rand::Rng;

use super::{actions, cleanup, sync, watch};
use crate::clients;
use crate::pvcsync;
use crate::util::{
    Error,
    backoff::ExponentialBackoff,
    colors::{FG1, FG2},
    concurrency::ConcurrencyGate,
};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

const PAUSED_REQUEUE: Duration = Duration::from_secs(300);
const ERROR_REQUEUE: Duration = Duration::from_secs(60);
const MANUAL_POLL: Duration = Duration::from_secs(30);

pub async fn run(client: Client, args: dr_syncer_common::args::ControllerArgs) -> Result<(), Error> {
    println!("{}", "⚙️ Starting NamespaceMapping controller...".green());

    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone(), args.clone()));

    let lease_namespace = args.namespace.clone();
    let holder_id = dr_syncer_common::args::holder_id("namespace-mapping");
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "dr-syncer-namespace-mapping-controller-lock".to_string(),
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
                println!("{}", "👑 Acquired leadership; starting NamespaceMapping controller".green());
                let context_for_controller = context.clone();
                let crd_api: Api<NamespaceMapping> = Api::all(client.clone());
                let (controller, watch) = crate::util::trigger::filtered_controller(
                    crd_api,
                    crate::util::trigger::generation_or_annotation(SYNC_NOW),
                );
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
            eprintln!("lost leadership; stopping NamespaceMapping controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    args: dr_syncer_common::args::ControllerArgs,
    /// Tracks the continuous-mode watch task spawned for each mapping, so a
    /// second reconcile of the same object doesn't spawn a duplicate.
    watches: Mutex<HashMap<String, CancellationToken>>,
    /// Process-wide admission for PVC data transfers, keyed on
    /// `(sourceNamespace, pvcName)` (spec.md §4.4.4 step 1, §5).
    pvc_gate: ConcurrencyGate<(String, String)>,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    fn new(client: Client, args: dr_syncer_common::args::ControllerArgs) -> Self {
        let pvc_gate = ConcurrencyGate::new(args.max_concurrent_syncs);
        #[cfg(feature = "metrics")]
        {
            ContextData {
                client,
                args,
                watches: Mutex::new(HashMap::new()),
                pvc_gate,
                metrics: ControllerMetrics::new("namespace-mapping"),
            }
        }
        #[cfg(not(feature = "metrics"))]
        {
            ContextData {
                client,
                args,
                watches: Mutex::new(HashMap::new()),
                pvc_gate,
            }
        }
    }
}

fn chrono_to_k8s_time(dt: chrono::DateTime<chrono::Utc>) -> Time {
    let secs = dt.timestamp();
    let nanos = dt.timestamp_subsec_nanos() as i32;
    let ts = k8s_openapi::jiff::Timestamp::new(secs, nanos).unwrap_or_else(|_| k8s_openapi::jiff::Timestamp::now());
    Time::from(ts)
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

async fn reconcile(instance: Arc<NamespaceMapping>, context: Arc<ContextData>) -> Result<Action, Error> {
    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("NamespaceMapping must be namespaced".to_string()))?;
    let name = instance.name_any();
    let key = format!("{namespace}/{name}");

    #[cfg(feature = "metrics")]
    context
        .metrics
        .reconcile_counter
        .with_label_values(&[&name, &namespace])
        .inc();

    let api: Api<NamespaceMapping> = Api::namespaced(context.client.clone(), &namespace);

    if instance.metadata.deletion_timestamp.is_some() {
        if let Some(handle) = context.watches.lock().await.remove(&key) {
            handle.cancel();
        }
        return finalize_deletion(&context, &api, &instance, &namespace).await;
    }

    actions::ensure_finalizer(&api, &instance).await?;

    if instance.spec.paused {
        return Ok(Action::requeue(PAUSED_REQUEUE));
    }

    if let Some(status) = &instance.status {
        if let Some(action) = backoff_gate(
            status.retry_status.consecutive_failures,
            status.retry_status.last_attempt_time.as_ref(),
        ) {
            return Ok(action);
        }
    }

    let handles = match resolve_clusters(&context, &namespace, &instance).await {
        Ok(h) => h,
        Err(e) => {
            actions::record_phase(&api, &name, NamespaceMappingPhase::Failed, format!("{e}")).await?;
            return Ok(Action::requeue(ERROR_REQUEUE));
        }
    };

    use dr_syncer_types::ReplicationMode;
    match instance.spec.replication_mode {
        ReplicationMode::Scheduled => run_scheduled(&context, &api, &name, &instance, &handles).await,
        ReplicationMode::Manual => run_manual(&context, &api, &name, &instance, &handles).await,
        ReplicationMode::Continuous => {
            run_continuous(&context, &api, &name, &key, &namespace, &instance, &handles).await
        }
    }
}

struct ClusterHandles {
    source: Client,
    destination: Client,
    ssh_key_secret: Option<String>,
}

async fn resolve_clusters(
    context: &ContextData,
    namespace: &str,
    instance: &NamespaceMapping,
) -> Result<ClusterHandles, Error> {
    let remote_clusters: Api<RemoteCluster> = Api::namespaced(context.client.clone(), namespace);

    let (source_name, destination_name, ssh_key_secret) = if instance.spec.uses_cluster_mapping() {
        let cluster_mappings: Api<ClusterMapping> = Api::namespaced(context.client.clone(), namespace);
        let mapping_name = instance.spec.cluster_mapping_ref.as_ref().unwrap();
        let mapping = cluster_mappings.get(mapping_name).await?;
        (
            mapping.spec.source_cluster.clone(),
            mapping.spec.target_cluster.clone(),
            mapping.spec.ssh_key_secret_ref.as_ref().map(|r| r.name.clone()),
        )
    } else {
        let source = instance
            .spec
            .source_cluster
            .clone()
            .ok_or_else(|| Error::UserInput("sourceCluster is required without clusterMappingRef".to_string()))?;
        let destination = instance
            .spec
            .destination_cluster
            .clone()
            .ok_or_else(|| Error::UserInput("destinationCluster is required without clusterMappingRef".to_string()))?;
        (source, destination, None)
    };

    let source_cluster = remote_clusters.get(&source_name).await?;
    let destination_cluster = remote_clusters.get(&destination_name).await?;

    let source_handle = clients::resolve(
        &context.client,
        namespace,
        &source_cluster.spec.kubeconfig_secret_ref.name,
        source_cluster.spec.kubeconfig_secret_ref.namespace.as_deref(),
        &source_cluster.spec.kubeconfig_secret_ref.key,
        context.args.ignore_cert,
    )
    .await
    .map_err(|e| e.error)?;
    let destination_handle = clients::resolve(
        &context.client,
        namespace,
        &destination_cluster.spec.kubeconfig_secret_ref.name,
        destination_cluster.spec.kubeconfig_secret_ref.namespace.as_deref(),
        &destination_cluster.spec.kubeconfig_secret_ref.key,
        context.args.ignore_cert,
    )
    .await
    .map_err(|e| e.error)?;

    Ok(ClusterHandles {
        source: source_handle.client,
        destination: destination_handle.client,
        ssh_key_secret,
    })
}

async fn run_sync_pass(
    context: &ContextData,
    api: &Api<NamespaceMapping>,
    name: &str,
    instance: &NamespaceMapping,
    handles: &ClusterHandles,
) -> Result<Action, Error> {
    actions::record_phase(api, name, NamespaceMappingPhase::Running, "sync in progress").await?;
    let mut outcome = sync::sync_namespace(&handles.source, &handles.destination, &instance.spec).await;

    if instance.spec.pvc_config.sync_data {
        for pvc_name in outcome.synced_pvc_names.clone() {
            let result = pvcsync::orchestrate::sync_pvc_data(
                &context.pvc_gate,
                &handles.source,
                &instance.spec.source_namespace,
                &handles.destination,
                &instance.spec.destination_namespace,
                &pvc_name,
                handles.ssh_key_secret.as_deref(),
                &instance.spec.pvc_config.data_sync_config,
            )
            .await;
            if let Err(e) = result {
                outcome.push_plain_error(
                    "PersistentVolumeClaimData",
                    &pvc_name,
                    e.to_string(),
                    dr_syncer_types::ErrorClass::Retryable,
                );
            }
        }
    }

    actions::record_sync_outcome(api, name, &outcome).await?;

    let phase = if outcome.errors.is_empty() {
        NamespaceMappingPhase::Completed
    } else {
        NamespaceMappingPhase::Failed
    };
    actions::record_phase(
        api,
        name,
        phase,
        format!(
            "{} synced, {} failed, {} skipped",
            outcome.stats.resources_synced, outcome.stats.resources_failed, outcome.stats.resources_skipped
        ),
    )
    .await?;
    println!(
        "{}{}{}",
        name.color(FG2),
        " sync pass complete: ".color(FG1),
        format!(
            "{} synced / {} failed / {} skipped",
            outcome.stats.resources_synced, outcome.stats.resources_failed, outcome.stats.resources_skipped
        ),
    );
    Ok(Action::requeue(if phase == NamespaceMappingPhase::Failed {
        ERROR_REQUEUE
    } else {
        Duration::from_secs(instance.spec.continuous.as_ref().map(|c| c.background_sync_interval_seconds).unwrap_or(300))
    }))
}

async fn run_scheduled(
    context: &ContextData,
    api: &Api<NamespaceMapping>,
    name: &str,
    instance: &NamespaceMapping,
    handles: &ClusterHandles,
) -> Result<Action, Error> {
    let Some(expr) = &instance.spec.schedule else {
        actions::record_phase(api, name, NamespaceMappingPhase::Failed, "Scheduled mode requires a schedule").await?;
        return Ok(Action::requeue(ERROR_REQUEUE));
    };
    let schedule = match expr.parse::<cron::Schedule>() {
        Ok(s) => s,
        Err(e) => {
            actions::record_phase(api, name, NamespaceMappingPhase::Failed, format!("invalid schedule: {e}")).await?;
            return Ok(Action::requeue(ERROR_REQUEUE));
        }
    };

    let next_sync_time = instance.status.as_ref().and_then(|s| s.next_sync_time.as_ref());

    match next_sync_time {
        None => {
            let Some(next) = schedule.upcoming(chrono::Utc).next() else {
                actions::record_phase(api, name, NamespaceMappingPhase::Failed, "schedule has no future occurrences").await?;
                return Ok(Action::requeue(ERROR_REQUEUE));
            };
            actions::record_next_sync_time(api, name, Some(chrono_to_k8s_time(next))).await?;
            let wait = (next - chrono::Utc::now()).to_std().unwrap_or(Duration::ZERO);
            return Ok(Action::requeue(wait));
        }
        // spec.md §4.1: "if next-sync-time is in the future, requeue until
        // then" -- without this, a reconcile fired right after
        // `record_next_sync_time` below (or by any other status write) would
        // see a populated `next_sync_time` and run the sync pass immediately,
        // ignoring the schedule entirely.
        Some(t) => {
            let now = k8s_openapi::jiff::Timestamp::now().as_second();
            let next_secs = t.0.as_second();
            if next_secs > now {
                let wait = Duration::from_secs((next_secs - now) as u64);
                return Ok(Action::requeue(wait));
            }
        }
    }

    let action = run_sync_pass(context, api, name, instance, handles).await?;

    if let Some(next) = schedule.upcoming(chrono::Utc).next() {
        actions::record_next_sync_time(api, name, Some(chrono_to_k8s_time(next))).await?;
        let wait = (next - chrono::Utc::now()).to_std().unwrap_or(Duration::from_secs(1));
        return Ok(Action::requeue(wait));
    }
    Ok(action)
}

async fn run_manual(
    context: &ContextData,
    api: &Api<NamespaceMapping>,
    name: &str,
    instance: &NamespaceMapping,
    handles: &ClusterHandles,
) -> Result<Action, Error> {
    let generation = instance.metadata.generation.unwrap_or(0);
    // spec.md §6: "sync-now=<anything>" -- any value present is a trigger,
    // not just the literal string "true" (end-to-end scenario #5 sets `=1`).
    let requested = instance.annotations().contains_key(SYNC_NOW);
    let acknowledged = instance
        .status
        .as_ref()
        .and_then(|s| s.acknowledged_sync_now_generation)
        .unwrap_or(-1);

    if !requested || acknowledged == generation {
        return Ok(Action::requeue(MANUAL_POLL));
    }

    let action = run_sync_pass(context, api, name, instance, handles).await?;
    actions::acknowledge_sync_now(api, name, generation).await?;
    Ok(action)
}

async fn run_continuous(
    context: &ContextData,
    api: &Api<NamespaceMapping>,
    name: &str,
    key: &str,
    namespace: &str,
    instance: &NamespaceMapping,
    handles: &ClusterHandles,
) -> Result<Action, Error> {
    let mut watches = context.watches.lock().await;
    if !watches.contains_key(key) {
        let watch_resources = instance
            .spec
            .continuous
            .as_ref()
            .and_then(|c| c.watch_resources.clone())
            .unwrap_or_else(|| instance.spec.resource_types.clone());
        let cancel = CancellationToken::new();
        let mut rx = watch::spawn(
            handles.source.clone(),
            instance.spec.source_namespace.clone(),
            watch_resources,
            cancel.clone(),
        );
        let touch_api: Api<NamespaceMapping> = Api::namespaced(context.client.clone(), namespace);
        let touch_name = name.to_string();
        let touch_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = touch_cancel.cancelled() => break,
                    event = rx.recv() => {
                        if event.is_none() {
                            break;
                        }
                        let _ = actions::touch(&touch_api, &touch_name).await;
                    }
                }
            }
        });
        watches.insert(key.to_string(), cancel);
    }
    drop(watches);

    run_sync_pass(context, api, name, instance, handles).await
}

async fn finalize_deletion(
    context: &ContextData,
    api: &Api<NamespaceMapping>,
    instance: &NamespaceMapping,
    namespace: &str,
) -> Result<Action, Error> {
    if !instance.finalizers().iter().any(|f| f == dr_syncer_types::CLEANUP_FINALIZER) {
        return Ok(Action::await_change());
    }

    let destination = if instance.spec.uses_cluster_mapping() {
        let cluster_mappings: Api<ClusterMapping> = Api::namespaced(context.client.clone(), namespace);
        let mapping_name = instance.spec.cluster_mapping_ref.as_ref().unwrap();
        match cluster_mappings.get(mapping_name).await {
            Ok(mapping) => Some(mapping.spec.target_cluster),
            Err(kube::Error::Api(resp)) if resp.code == 404 => None,
            Err(e) => return Err(e.into()),
        }
    } else {
        instance.spec.destination_cluster.clone()
    };

    let Some(destination_name) = destination else {
        actions::remove_finalizer(api, instance).await?;
        return Ok(Action::await_change());
    };

    let remote_clusters: Api<RemoteCluster> = Api::namespaced(context.client.clone(), namespace);
    let destination_cluster = match remote_clusters.get(&destination_name).await {
        Ok(c) => c,
        Err(kube::Error::Api(resp)) if resp.code == 404 => {
            actions::remove_finalizer(api, instance).await?;
            return Ok(Action::await_change());
        }
        Err(e) => return Err(e.into()),
    };

    let handle = clients::resolve(
        &context.client,
        namespace,
        &destination_cluster.spec.kubeconfig_secret_ref.name,
        destination_cluster.spec.kubeconfig_secret_ref.namespace.as_deref(),
        &destination_cluster.spec.kubeconfig_secret_ref.key,
        context.args.ignore_cert,
    )
    .await
    .map_err(|e| e.error)?;

    cleanup::run(&handle.client, &instance.spec.destination_namespace, &instance.spec.source_namespace).await?;
    actions::remove_finalizer(api, instance).await?;
    Ok(Action::await_change())
}

fn on_error(instance: Arc<NamespaceMapping>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("NamespaceMapping reconcile error: {error:?} {:?}", instance.name_any()).red()
    );
    Action::requeue(ERROR_REQUEUE)
}
