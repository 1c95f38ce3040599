use clap::Parser;
use dr_syncer_common::args::ControllerArgs;
use kube::Client;
use owo_colors::OwoColorize;

mod clients;
mod cluster_mapping;
mod namespace_mapping;
mod pipeline;
mod pvcsync;
mod remote_cluster;
mod util;

#[cfg(feature = "metrics")]
use util::metrics::{ControllerMetrics, MetricsServer};

/// Process entrypoint: one in-cluster `Client`, three CRD controllers
/// (each with its own leader-election lease, spec.md §4.1), and a shared
/// `/metrics`+`/healthz` server. spec.md §6 "Exit semantics": this process
/// exits non-zero only if the manager itself can't start -- individual
/// reconcile failures never reach here, they're surfaced through status.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dr_syncer_common::init();
    let args = ControllerArgs::parse();

    println!("{}", "🚀 dr-syncer starting".green());

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("failed to build in-cluster client: {e}"))?;

    #[cfg(feature = "metrics")]
    let metrics_task = {
        let server = MetricsServer::new(vec![
            ControllerMetrics::new("remote-cluster"),
            ControllerMetrics::new("cluster-mapping"),
            ControllerMetrics::new("namespace-mapping"),
        ]);
        let shutdown = tokio_util::sync::CancellationToken::new();
        let shutdown_signal = shutdown.clone();
        let port = args.metrics_port;
        tokio::spawn(async move {
            dr_syncer_common::shutdown::shutdown_signal().await;
            shutdown_signal.cancel();
        });
        if port == 0 {
            None
        } else {
            Some(tokio::spawn(async move { server.serve(port, shutdown).await }))
        }
    };

    dr_syncer_common::signal_ready();

    let remote_cluster_task = tokio::spawn(remote_cluster::reconcile::run(client.clone(), args.clone()));
    let cluster_mapping_task = tokio::spawn(cluster_mapping::reconcile::run(client.clone(), args.clone()));
    let namespace_mapping_task = tokio::spawn(namespace_mapping::reconcile::run(client.clone(), args.clone()));

    let (remote_res, cluster_res, namespace_res) =
        tokio::join!(remote_cluster_task, cluster_mapping_task, namespace_mapping_task);

    remote_res
        .map_err(|e| anyhow::anyhow!("RemoteCluster controller task panicked: {e}"))?
        .map_err(|e| anyhow::anyhow!("RemoteCluster controller failed to start: {e}"))?;
    cluster_res
        .map_err(|e| anyhow::anyhow!("ClusterMapping controller task panicked: {e}"))?
        .map_err(|e| anyhow::anyhow!("ClusterMapping controller failed to start: {e}"))?;
    namespace_res
        .map_err(|e| anyhow::anyhow!("NamespaceMapping controller task panicked: {e}"))?
        .map_err(|e| anyhow::anyhow!("NamespaceMapping controller failed to start: {e}"))?;

    #[cfg(feature = "metrics")]
    if let Some(task) = metrics_task {
        task.await
            .map_err(|e| anyhow::anyhow!("metrics server task panicked: {e}"))?
            .map_err(|e| anyhow::anyhow!("metrics server failed: {e}"))?;
    }

    println!("{}", "🛑 dr-syncer shut down gracefully".red());
    Ok(())
}
