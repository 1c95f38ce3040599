use dr_syncer_types::{RemoteCluster, RemoteClusterSpec};
use futures::stream::StreamExt;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::{
    Api, ResourceExt,
    client::Client,
    runtime::{controller::Action, predicates},
};
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use owo_colors::OwoColorize;
use rand::Rng;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use super::actions;
use crate::clients;
use crate::util::{
    Error,
    backoff::ExponentialBackoff,
    colors::{FG1, FG2},
};

#[cfg(feature = "metrics")]
use crate::util::metrics::ControllerMetrics;

const SUCCESS_REQUEUE: Duration = Duration::from_secs(300);
const ERROR_REQUEUE: Duration = Duration::from_secs(60);

/// Entrypoint for the `RemoteCluster` controller.
pub async fn run(client: Client, args: dr_syncer_common::args::ControllerArgs) -> Result<(), Error> {
    println!("{}", "⚙️ Starting RemoteCluster controller...".green());

    let context: Arc<ContextData> = Arc::new(ContextData::new(client.clone(), args.ignore_cert));

    let lease_namespace = args.namespace.clone();
    let holder_id = dr_syncer_common::args::holder_id("remote-cluster");
    let leadership = LeaseLock::new(
        client.clone(),
        &lease_namespace,
        LeaseLockParams {
            holder_id,
            lease_name: "dr-syncer-remote-cluster-controller-lock".to_string(),
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
                println!("{}", "👑 Acquired leadership; starting RemoteCluster controller".green());
                let context_for_controller = context.clone();
                let crd_api: Api<RemoteCluster> = Api::all(client.clone());
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
            eprintln!("lost leadership; stopping RemoteCluster controller");
            task.abort();
        }
    }
}

struct ContextData {
    client: Client,
    ignore_cert: bool,
    #[cfg(feature = "metrics")]
    metrics: ControllerMetrics,
}

impl ContextData {
    fn new(client: Client, ignore_cert: bool) -> Self {
        #[cfg(feature = "metrics")]
        {
            ContextData {
                client,
                ignore_cert,
                metrics: ControllerMetrics::new("remote-cluster"),
            }
        }
        #[cfg(not(feature = "metrics"))]
        {
            ContextData { client, ignore_cert }
        }
    }
}

async fn reconcile(instance: Arc<RemoteCluster>, context: Arc<ContextData>) -> Result<Action, Error> {
    if instance.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let namespace = instance
        .namespace()
        .ok_or_else(|| Error::UserInput("RemoteCluster must be namespaced".to_string()))?;
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

    let api: Api<RemoteCluster> = Api::namespaced(context.client.clone(), &namespace);

    match run_chain(&context, &api, &name, &namespace, &instance.spec).await {
        Ok(()) => {
            println!(
                "{}{}{}{}",
                namespace.color(FG2),
                "/".color(FG1),
                name.color(FG2),
                " available".color(FG1),
            );
            Ok(Action::requeue(SUCCESS_REQUEUE))
        }
        Err(e) => {
            eprintln!("{}", format!("{namespace}/{name} reconcile failed: {e}").red());
            Ok(Action::requeue(ERROR_REQUEUE))
        }
    }
}

/// Runs the five-step chain in order, writing each condition as it goes
/// (spec.md §4.1 "RemoteCluster state machine"). Stops at the first
/// failing step; later conditions are left at whatever they last were,
/// matching the source's "don't claim readiness you haven't checked".
async fn run_chain(
    context: &ContextData,
    api: &Api<RemoteCluster>,
    name: &str,
    namespace: &str,
    spec: &RemoteClusterSpec,
) -> Result<(), Error> {
    if let Some(schedule) = &spec.default_schedule {
        match schedule.parse::<cron::Schedule>() {
            Ok(_) => {
                actions::record_condition(api, name, actions::SCHEDULE_VALID, true, "Valid", "cron expression parses")
                    .await?;
            }
            Err(e) => {
                actions::record_condition(
                    api,
                    name,
                    actions::SCHEDULE_VALID,
                    false,
                    "InvalidCron",
                    format!("{e}"),
                )
                .await?;
                return Err(Error::UserInput(format!("invalid defaultSchedule: {e}")));
            }
        }
    }

    let secret_ref = &spec.kubeconfig_secret_ref;
    let raw = match clients::fetch_kubeconfig_secret(
        &context.client,
        namespace,
        &secret_ref.name,
        secret_ref.namespace.as_deref(),
        &secret_ref.key,
    )
    .await
    {
        Ok(raw) => {
            actions::record_condition(
                api,
                name,
                actions::KUBECONFIG_AVAILABLE,
                true,
                "Fetched",
                "credential secret found",
            )
            .await?;
            raw
        }
        Err(e) => {
            actions::record_condition(
                api,
                name,
                actions::KUBECONFIG_AVAILABLE,
                false,
                "SecretMissing",
                format!("{}", e.error),
            )
            .await?;
            return Err(e.error);
        }
    };

    let kubeconfig = match clients::parse_kubeconfig(&raw) {
        Ok(kubeconfig) => {
            actions::record_condition(
                api,
                name,
                actions::KUBECONFIG_VALID,
                true,
                "Parsed",
                "kubeconfig decoded",
            )
            .await?;
            kubeconfig
        }
        Err(e) => {
            actions::record_condition(
                api,
                name,
                actions::KUBECONFIG_VALID,
                false,
                "DecodeFailed",
                format!("{e}"),
            )
            .await?;
            return Err(e);
        }
    };

    let remote_client = match clients::build_and_verify_client(kubeconfig, context.ignore_cert).await {
        Ok(client) => {
            actions::record_condition(
                api,
                name,
                actions::CLUSTER_AVAILABLE,
                true,
                "Reachable",
                "apiserver responded",
            )
            .await?;
            actions::record_cluster_available(api, name, true).await?;
            client
        }
        Err(e) => {
            actions::record_condition(
                api,
                name,
                actions::CLUSTER_AVAILABLE,
                false,
                "Unreachable",
                format!("{e}"),
            )
            .await?;
            actions::record_cluster_available(api, name, false).await?;
            return Err(e);
        }
    };

    // spec.md §4.1: "if PVC-sync is enabled, invoke the PVC-sync
    // subsystem's agent reconciler (set PVCSyncReady with granular
    // sub-reason for partial readiness)".
    if spec.pvc_sync.enabled {
        match crate::pvcsync::orchestrate::count_agent_pods(&remote_client).await {
            Ok(0) => {
                actions::record_condition(
                    api,
                    name,
                    actions::PVC_SYNC_READY,
                    false,
                    "NoAgentsFound",
                    "pvc-sync enabled but no running app=dr-syncer-agent pods were found in any namespace",
                )
                .await?;
                actions::record_pvc_sync_ready(api, name, false).await?;
                return Err(Error::UserInput(format!(
                    "{namespace}/{name}: pvc-sync enabled with no agent fleet present"
                )));
            }
            Ok(n) => {
                actions::record_condition(
                    api,
                    name,
                    actions::PVC_SYNC_READY,
                    true,
                    "AgentFleetPresent",
                    format!("{n} running agent pod(s) found"),
                )
                .await?;
                actions::record_pvc_sync_ready(api, name, true).await?;
            }
            Err(e) => {
                actions::record_condition(
                    api,
                    name,
                    actions::PVC_SYNC_READY,
                    false,
                    "AgentDiscoveryFailed",
                    format!("{e}"),
                )
                .await?;
                actions::record_pvc_sync_ready(api, name, false).await?;
                return Err(e);
            }
        }
    } else {
        actions::record_condition(
            api,
            name,
            actions::PVC_SYNC_READY,
            true,
            "Disabled",
            "pvc-sync not enabled for this cluster",
        )
        .await?;
        actions::record_pvc_sync_ready(api, name, false).await?;
    }

    Ok(())
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

fn on_error(instance: Arc<RemoteCluster>, error: &Error, _context: Arc<ContextData>) -> Action {
    eprintln!(
        "{}",
        format!("RemoteCluster reconcile error: {error:?} {:?}", instance.name_any()).red()
    );
    Action::requeue(ERROR_REQUEUE)
}
