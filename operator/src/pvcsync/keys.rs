//! SSH-key distribution (spec.md §4.4.1): installs trusted public keys
//! into every source-cluster agent's `authorized_keys`.

use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::{Api, Client, ResourceExt, api::ListParams};

use super::exec::{self, AgentCommand};
use crate::util::error::Error;

pub const AGENT_LABEL_SELECTOR: &str = "app=dr-syncer-agent";
pub const AUTHORIZED_KEYS_PATH: &str = "/home/syncer/.ssh/authorized_keys";
const HOST_KEY_PATH: &str = "/etc/ssh/keys/ssh_host_rsa_key.pub";

/// Lists every running agent pod (`app=dr-syncer-agent`) in `namespace`.
pub async fn list_agent_pods(client: &Client, namespace: &str) -> Result<Vec<Pod>, Error> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = pods
        .list(&ListParams::default().labels(AGENT_LABEL_SELECTOR))
        .await?;
    Ok(list
        .items
        .into_iter()
        .filter(|p| {
            p.status
                .as_ref()
                .and_then(|s| s.phase.as_deref())
                .map(|phase| phase == "Running")
                .unwrap_or(false)
        })
        .collect())
}

/// Reads the designated public key out of a Secret (spec.md §4.4.1 path
/// (a): a configured public key pushed to every source agent).
pub async fn read_configured_public_key(
    client: &Client,
    namespace: &str,
    secret_name: &str,
    key: &str,
) -> Result<String, Error> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets.get(secret_name).await?;
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| {
            Error::UserInput(format!("secret {namespace}/{secret_name} has no key {key}"))
        })?;
    Ok(String::from_utf8_lossy(&bytes.0).trim().to_string())
}

/// Reads every target-cluster agent's host public key (spec.md §4.4.1
/// path (b): one discovered key per target agent).
pub async fn discover_target_host_keys(
    client: &Client,
    target_namespace: &str,
) -> Result<Vec<String>, Error> {
    let pods = list_agent_pods(client, target_namespace).await?;
    let api: Api<Pod> = Api::namespaced(client.clone(), target_namespace);
    let mut keys = Vec::with_capacity(pods.len());
    for pod in &pods {
        let out = exec::run(
            &api,
            &pod.name_any(),
            AgentCommand::ReadFile { path: HOST_KEY_PATH },
        )
        .await?;
        let key = out.stdout.trim().to_string();
        if !key.is_empty() {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Installs `key` into `pod_name`'s `authorized_keys`, first testing for
/// an exact existing line so repeated installs are idempotent (spec.md
/// §4.4.1: "test for the key's presence ... append only when absent").
pub async fn install_key(pods: &Api<Pod>, pod_name: &str, key: &str) -> Result<bool, Error> {
    let present = exec::run(
        pods,
        pod_name,
        AgentCommand::GrepExactLine {
            line: key,
            path: AUTHORIZED_KEYS_PATH,
        },
    )
    .await?;
    if present.success {
        return Ok(false);
    }
    exec::run(
        pods,
        pod_name,
        AgentCommand::AppendLine {
            line: key,
            path: AUTHORIZED_KEYS_PATH,
        },
    )
    .await?;
    Ok(true)
}

/// Installs `keys` into every agent pod in `source_namespace`, skipping
/// keys already present. Returns the number of keys actually appended.
pub async fn distribute(
    source_client: &Client,
    source_namespace: &str,
    keys: &[String],
) -> Result<usize, Error> {
    let source_pods = list_agent_pods(source_client, source_namespace).await?;
    let api: Api<Pod> = Api::namespaced(source_client.clone(), source_namespace);
    let mut installed = 0;
    for pod in &source_pods {
        let name = pod.name_any();
        for key in keys {
            if install_key(&api, &name, key).await? {
                installed += 1;
            }
        }
    }
    Ok(installed)
}
