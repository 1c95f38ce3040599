//! Connectivity verification (spec.md §4.4.2): every (target agent,
//! source agent) pair gets one SSH probe, run through a bounded worker
//! pool under a deadline.

use dr_syncer_types::{AgentPairStatus, ConnectivityStatus};
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client, ResourceExt};

use super::exec::{self, AgentCommand};
use super::keys::list_agent_pods;
use crate::util::error::Error;

/// The exact stdout `test-connection` must produce (spec.md §4.4.2, §6
/// "SSH wire contract").
pub const EXPECTED_MAGIC: &str = "SSH proxy connection successful";

fn pod_ip(pod: &Pod) -> Option<String> {
    pod.status.as_ref()?.pod_ip.clone()
}

/// Probes every (target, source) pair in parallel through `workers`
/// concurrent slots, bounded by `deadline`. A target agent counts as
/// "connected" once it reaches at least one source agent.
pub async fn verify(
    source_client: &Client,
    source_namespace: &str,
    target_client: &Client,
    target_namespace: &str,
    workers: usize,
    deadline: std::time::Duration,
) -> Result<ConnectivityStatus, Error> {
    let source_pods = list_agent_pods(source_client, source_namespace).await?;
    let target_pods = list_agent_pods(target_client, target_namespace).await?;
    let target_api: Api<Pod> = Api::namespaced(target_client.clone(), target_namespace);

    let pairs: Vec<(Pod, Pod)> = target_pods
        .iter()
        .flat_map(|t| source_pods.iter().map(move |s| (t.clone(), s.clone())))
        .collect();

    let probe = tokio::time::timeout(deadline, async {
        stream::iter(pairs.into_iter().map(|(target, source)| {
            let target_api = target_api.clone();
            async move {
                let target_node = target
                    .spec
                    .as_ref()
                    .and_then(|s| s.node_name.clone())
                    .unwrap_or_default();
                let source_node = source
                    .spec
                    .as_ref()
                    .and_then(|s| s.node_name.clone())
                    .unwrap_or_default();
                let result = match pod_ip(&source) {
                    Some(ip) => {
                        exec::run(
                            &target_api,
                            &target.name_any(),
                            AgentCommand::TestConnection { host: &ip },
                        )
                        .await
                    }
                    None => Err(Error::other("source agent has no pod IP")),
                };
                let (connected, error) = match result {
                    Ok(out) if out.stdout.contains(EXPECTED_MAGIC) => (true, None),
                    Ok(out) => (false, Some(format!("unexpected output: {}", out.stdout.trim()))),
                    Err(e) => (false, Some(e.to_string())),
                };
                AgentPairStatus {
                    source_node,
                    target_node,
                    connected,
                    error,
                }
            }
        }))
        .buffer_unordered(workers.max(1))
        .collect::<Vec<_>>()
        .await
    })
    .await
    .map_err(|_| Error::other("connectivity verification deadline exceeded"))?;

    let connected_agents = target_pods
        .iter()
        .filter(|t| {
            probe
                .iter()
                .any(|p| p.target_node == t.spec.as_ref().and_then(|s| s.node_name.clone()).unwrap_or_default() && p.connected)
        })
        .count() as u32;

    Ok(ConnectivityStatus {
        total_source_agents: source_pods.len() as u32,
        total_target_agents: target_pods.len() as u32,
        connected_agents,
        details: probe,
    })
}

/// `Connected` requires every target agent to have reached at least one
/// source agent, and at least one of each to exist (spec.md §8: "0 target
/// agents and 0 source agents never reaches Connected").
pub fn all_targets_connected(status: &ConnectivityStatus) -> bool {
    status.total_target_agents > 0
        && status.total_source_agents > 0
        && status.connected_agents == status.total_target_agents
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(total_target: u32, total_source: u32, connected: u32) -> ConnectivityStatus {
        ConnectivityStatus {
            total_source_agents: total_source,
            total_target_agents: total_target,
            connected_agents: connected,
            details: Vec::new(),
        }
    }

    #[test]
    fn zero_agents_never_connects() {
        assert!(!all_targets_connected(&status(0, 0, 0)));
    }

    #[test]
    fn all_targets_reached_is_connected() {
        assert!(all_targets_connected(&status(3, 2, 3)));
        assert!(!all_targets_connected(&status(3, 2, 2)));
    }
}
