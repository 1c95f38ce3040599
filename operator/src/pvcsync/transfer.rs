//! Ephemeral rsync pod lifecycle (spec.md §4.4.4 steps 3-6): provisions a
//! short-lived pod in the destination cluster, waits for it to become
//! ready, drives the rsync-over-SSH pull, then tears everything down on
//! every exit path.

use dr_syncer_types::DataSyncConfig;
use futures::AsyncReadExt;
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, EnvVar, Pod, PodSpec, SecretVolumeSource, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{
    Api, Client, ResourceExt,
    api::{AttachParams, DeleteParams, ListParams, PostParams},
    runtime::wait::{Condition, await_condition},
};
use rand::Rng;
use std::{collections::BTreeMap, time::Duration};

use super::wire;
use crate::util::error::Error;

const READY_TIMEOUT: Duration = Duration::from_secs(120);
const CLEANUP_TIMEOUT: Duration = Duration::from_secs(300);

fn random_suffix() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..8)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect()
}

/// Ensures the shared rsyncd ConfigMap exists in the destination
/// namespace (spec.md §4.4.4 step 3); idempotent, tolerates a concurrent
/// create by another reconcile.
pub async fn ensure_rsync_configmap(client: &Client, namespace: &str) -> Result<(), Error> {
    let api: Api<ConfigMap> = Api::namespaced(client.clone(), namespace);
    if api.get_opt(wire::RSYNC_CONFIG_MAP_NAME).await?.is_some() {
        return Ok(());
    }
    let mut data = BTreeMap::new();
    data.insert("rsyncd.conf".to_string(), wire::default_rsyncd_conf());
    let cm = ConfigMap {
        metadata: ObjectMeta {
            name: Some(wire::RSYNC_CONFIG_MAP_NAME.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    };
    match api.create(&PostParams::default(), &cm).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(resp)) if resp.code == 409 => Ok(()),
        Err(e) => Err(e.into()),
    }
}

pub struct RsyncPodHandle {
    pub name: String,
}

/// Creates the ephemeral pod pinned to `destination_node`, mounting the
/// destination PVC at `/data` and the shared rsyncd ConfigMap, plus an
/// optional SSH-key Secret (spec.md §4.4.4 step 3).
pub async fn create_rsync_pod(
    client: &Client,
    namespace: &str,
    destination_node: Option<&str>,
    pvc_name: &str,
    ssh_key_secret: Option<&str>,
) -> Result<RsyncPodHandle, Error> {
    let name = format!("dr-syncer-temp-{}", random_suffix());
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);

    let mut volumes = vec![
        Volume {
            name: "data".to_string(),
            persistent_volume_claim: Some(
                k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource {
                    claim_name: pvc_name.to_string(),
                    read_only: Some(false),
                },
            ),
            ..Default::default()
        },
        Volume {
            name: "rsyncd-conf".to_string(),
            config_map: Some(k8s_openapi::api::core::v1::ConfigMapVolumeSource {
                name: wire::RSYNC_CONFIG_MAP_NAME.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        },
    ];
    let mut mounts = vec![
        VolumeMount {
            name: "data".to_string(),
            mount_path: wire::RSYNC_MOUNT_PATH.to_string(),
            ..Default::default()
        },
        VolumeMount {
            name: "rsyncd-conf".to_string(),
            mount_path: "/etc/rsyncd.conf".to_string(),
            sub_path: Some("rsyncd.conf".to_string()),
            ..Default::default()
        },
    ];
    if let Some(secret_name) = ssh_key_secret {
        volumes.push(Volume {
            name: "ssh-keys".to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret_name.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name: "ssh-keys".to_string(),
            mount_path: "/etc/ssh/keys".to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }

    let pod = Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                "app".to_string(),
                "dr-syncer-rsync-pod".to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: destination_node.map(str::to_string),
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name: "rsync".to_string(),
                image: Some("alpine:3.20".to_string()),
                command: Some(vec!["sh".to_string(), "-c".to_string()]),
                args: Some(vec![format!(
                    "apk add --no-cache rsync openssh-client >/dev/null && rsync --daemon --no-detach --port={port} --config=/etc/rsyncd.conf",
                    port = wire::RSYNC_DAEMON_PORT
                )]),
                env: Some(vec![EnvVar {
                    name: "RSYNC_PORT".to_string(),
                    value: Some(wire::RSYNC_DAEMON_PORT.to_string()),
                    ..Default::default()
                }]),
                volume_mounts: Some(mounts),
                ..Default::default()
            }],
            volumes: Some(volumes),
            ..Default::default()
        }),
        ..Default::default()
    };

    api.create(&PostParams::default(), &pod).await?;
    Ok(RsyncPodHandle { name })
}

fn is_pod_ready() -> impl Condition<Pod> {
    |obj: Option<&Pod>| {
        let Some(pod) = obj else { return false };
        let Some(status) = &pod.status else { return false };
        let running = status.phase.as_deref() == Some("Running");
        let all_ready = status
            .container_statuses
            .as_ref()
            .map(|cs| cs.iter().all(|c| c.ready))
            .unwrap_or(false);
        running && all_ready
    }
}

fn is_pod_terminal() -> impl Condition<Pod> {
    |obj: Option<&Pod>| {
        obj.and_then(|p| p.status.as_ref())
            .and_then(|s| s.phase.as_deref())
            .map(|phase| phase == "Failed" || phase == "Succeeded")
            .unwrap_or(false)
    }
}

/// Polls until the pod is Running with every container Ready, or a
/// terminal phase / timeout aborts (spec.md §4.4.4 step 4).
pub async fn wait_ready(client: &Client, namespace: &str, pod_name: &str) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let ready = await_condition(api.clone(), pod_name, is_pod_ready());
    let terminal = await_condition(api, pod_name, is_pod_terminal());

    tokio::select! {
        result = tokio::time::timeout(READY_TIMEOUT, ready) => {
            result.map_err(|_| Error::other("rsync pod readiness timed out"))?
                .map_err(|e| Error::other(format!("{e}")))?;
            Ok(())
        }
        result = tokio::time::timeout(READY_TIMEOUT, terminal) => {
            result.map_err(|_| Error::other("rsync pod readiness timed out"))?
                .map_err(|e| Error::other(format!("{e}")))?;
            Err(Error::other(format!("rsync pod {pod_name} reached a terminal phase before becoming ready")))
        }
    }
}

/// Drives the rsync pull from inside the rsync pod: SSHes to the source
/// agent on `source_node` and pulls into the mounted volume (spec.md
/// §4.4.4 step 5).
pub async fn run_transfer(
    client: &Client,
    namespace: &str,
    pod_name: &str,
    source_host: &str,
    data_sync: &DataSyncConfig,
) -> Result<(), Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);

    let mut rsync_args = vec!["-avz".to_string(), "--delete".to_string()];
    rsync_args.extend(data_sync.rsync_options.iter().cloned());
    if let Some(limit) = &data_sync.bandwidth_limit {
        rsync_args.push(format!("--bwlimit={limit}"));
    }
    for exclude in &data_sync.exclude_paths {
        rsync_args.push(format!("--exclude={exclude}"));
    }

    // Classic rsync-over-ssh (spec.md §6: the source agent's authorized_keys
    // entry forces `rsync --server ...`, not a daemon listener) -- the `-e`
    // remote shell mirrors the exact invocation §4.4.2's `test-connection`
    // probe uses, so a reachable agent under verify is reachable here too.
    // The remote path is whatever the forced command serves; the client-side
    // path argument is cosmetic once the server side has overridden argv.
    rsync_args.push("-e".to_string());
    rsync_args.push(format!(
        "ssh -p {port} -o StrictHostKeyChecking=no",
        port = wire::AGENT_SSH_PORT
    ));

    let remote_source = format!(
        "{user}@{host}:{module}/",
        user = wire::AGENT_SSH_USER,
        host = source_host,
        module = wire::RSYNC_MODULE_NAME,
    );

    let mut argv = vec!["rsync".to_string()];
    argv.extend(rsync_args);
    argv.push(remote_source);
    argv.push(format!("{}/", wire::RSYNC_MOUNT_PATH));

    let mut attached = api
        .exec(pod_name, argv, &AttachParams::default().stdout(true).stderr(true))
        .await?;

    let mut output = String::new();
    if let Some(mut stream) = attached.stdout() {
        stream.read_to_string(&mut output).await.ok();
    }
    let status = match attached.take_status() {
        Some(fut) => fut.await,
        None => None,
    };
    attached.join().await.ok();

    match status.and_then(|s| s.status) {
        Some(ref s) if s == "Success" => Ok(()),
        _ => Err(Error::other(format!("rsync transfer failed: {output}"))),
    }
}

/// Deletes the ephemeral pod, best-effort and bounded (spec.md §4.4.4
/// step 6). Errors are swallowed by design: cleanup must never be the
/// reason a transfer's result is lost.
pub async fn cleanup(client: &Client, namespace: &str, pod_name: &str) {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let _ = tokio::time::timeout(CLEANUP_TIMEOUT, api.delete(pod_name, &DeleteParams::default())).await;
}

/// Lists every rsync pod this process may have orphaned (used by the
/// periodic sweep callers can run independently of any one transfer).
pub async fn list_orphaned(client: &Client, namespace: &str) -> Result<Vec<Pod>, Error> {
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = api
        .list(&ListParams::default().labels("app=dr-syncer-rsync-pod"))
        .await?;
    Ok(list.items)
}
