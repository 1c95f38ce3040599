//! Source node discovery (spec.md §4.4.4 step 2): finds which node a
//! source PVC's data actually lives on so the ephemeral rsync pod on the
//! destination can reach it through the matching source agent.

use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod};
use kube::{Api, Client, ResourceExt, api::ListParams};

use super::exec::{self, AgentCommand};
use crate::util::error::{ClassifiedError, Error, ErrorClass, classify_kube_error};

/// Finds a running pod in `namespace` whose volumes reference `pvc_name`
/// and returns the node it's scheduled on; falling back to a CSI-path scan
/// across the agent fleet when no workload currently mounts the volume
/// (spec.md §4.4.4 step 2).
pub async fn discover(
    client: &Client,
    namespace: &str,
    pvc_name: &str,
) -> Result<String, ClassifiedError> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = pods
        .list(&ListParams::default())
        .await
        .map_err(classify)?;

    for pod in &list.items {
        if pod_uses_pvc(pod, pvc_name) {
            if let Some(node) = pod.spec.as_ref().and_then(|s| s.node_name.clone()) {
                return Ok(node);
            }
        }
    }

    if let Some(node) = discover_via_csi_scan(client, namespace, pvc_name).await? {
        return Ok(node);
    }

    Err(ClassifiedError::retryable(Error::other(format!(
        "no running pod in {namespace} references PVC {pvc_name}, and no CSI mount found"
    ))))
}

/// Scans every agent pod for a CSI mount directory named after the PVC's
/// bound `PersistentVolume`, returning the node the matching agent runs on.
async fn discover_via_csi_scan(
    client: &Client,
    namespace: &str,
    pvc_name: &str,
) -> Result<Option<String>, ClassifiedError> {
    let pvcs: Api<PersistentVolumeClaim> = Api::namespaced(client.clone(), namespace);
    let pvc = match pvcs.get_opt(pvc_name).await.map_err(classify)? {
        Some(pvc) => pvc,
        None => return Ok(None),
    };
    let Some(pv_name) = pvc.spec.and_then(|s| s.volume_name) else {
        return Ok(None);
    };

    let agents = super::keys::list_agent_pods(client, namespace)
        .await
        .map_err(ClassifiedError::retryable)?;
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    for agent in &agents {
        let out = exec::run(
            &api,
            &agent.name_any(),
            AgentCommand::FindCsiMount { pv_name: &pv_name },
        )
        .await
        .map_err(ClassifiedError::retryable)?;
        if !out.stdout.trim().is_empty() {
            if let Some(node) = agent.spec.as_ref().and_then(|s| s.node_name.clone()) {
                return Ok(Some(node));
            }
        }
    }
    Ok(None)
}

/// Finds the agent pod (`app=dr-syncer-agent`) scheduled on `node_name` and
/// returns its pod IP, the address the ephemeral rsync pod SSHes into
/// (spec.md §4.4.4 step 5: "SSH into the source agent on the source node").
pub async fn agent_host_for_node(client: &Client, namespace: &str, node_name: &str) -> Result<String, ClassifiedError> {
    let pods = super::keys::list_agent_pods(client, namespace)
        .await
        .map_err(ClassifiedError::retryable)?;
    pods.iter()
        .find(|p| p.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node_name))
        .and_then(|p| p.status.as_ref()?.pod_ip.clone())
        .ok_or_else(|| {
            ClassifiedError::retryable(Error::other(format!(
                "no dr-syncer-agent pod with an assigned IP on node {node_name}"
            )))
        })
}

fn pod_uses_pvc(pod: &Pod, pvc_name: &str) -> bool {
    let running = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .map(|p| p == "Running")
        .unwrap_or(false);
    if !running {
        return false;
    }
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_ref())
        .map(|volumes| {
            volumes.iter().any(|v| {
                v.persistent_volume_claim
                    .as_ref()
                    .map(|pvc| pvc.claim_name == pvc_name)
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}

fn classify(err: kube::Error) -> ClassifiedError {
    match classify_kube_error(&err) {
        ErrorClass::NonRetryable => ClassifiedError::non_retryable(err),
        ErrorClass::WaitForNextSync => ClassifiedError::wait_for_next_sync(err),
        ErrorClass::Retryable => ClassifiedError::retryable(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        PersistentVolumeClaimVolumeSource, PodSpec, PodStatus, Volume,
    };

    fn pod_with_pvc(phase: &str, node: &str, pvc: &str) -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            spec: Some(PodSpec {
                node_name: Some(node.to_string()),
                volumes: Some(vec![Volume {
                    name: "data".to_string(),
                    persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                        claim_name: pvc.to_string(),
                        read_only: None,
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn only_running_pods_match() {
        assert!(pod_uses_pvc(&pod_with_pvc("Running", "node-a", "data-pvc"), "data-pvc"));
        assert!(!pod_uses_pvc(&pod_with_pvc("Pending", "node-a", "data-pvc"), "data-pvc"));
        assert!(!pod_uses_pvc(&pod_with_pvc("Running", "node-a", "other-pvc"), "data-pvc"));
    }
}
