use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::common::SecretKeyRef;

fn default_kubeconfig_key() -> String {
    "kubeconfig".to_string()
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct AgentResources {
    pub cpu_request: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_limit: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct PvcSyncSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub agent_resources: AgentResources,
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "dr-syncer.io",
    version = "v1alpha1",
    kind = "RemoteCluster",
    plural = "remoteclusters",
    derive = "PartialEq",
    status = "RemoteClusterStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.clusterAvailable\", \"name\": \"AVAILABLE\", \"type\": \"string\" }"
)]
pub struct RemoteClusterSpec {
    pub kubeconfig_secret_ref: SecretKeyRefWithDefaultKey,
    pub default_schedule: Option<String>,
    #[serde(default)]
    pub pvc_sync: PvcSyncSpec,
}

/// `SecretKeyRef` with `key` defaulting to `kubeconfig` (spec.md §3,
/// "default key `kubeconfig`") rather than the plain struct's no-default.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct SecretKeyRefWithDefaultKey {
    pub name: String,
    pub namespace: Option<String>,
    #[serde(default = "default_kubeconfig_key")]
    pub key: String,
}

impl Default for SecretKeyRefWithDefaultKey {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: None,
            key: default_kubeconfig_key(),
        }
    }
}

impl From<&SecretKeyRefWithDefaultKey> for SecretKeyRef {
    fn from(v: &SecretKeyRefWithDefaultKey) -> Self {
        SecretKeyRef {
            name: v.name.clone(),
            namespace: v.namespace.clone(),
            key: Some(v.key.clone()),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct RemoteClusterStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_attempt_time: Option<Time>,
    pub last_sync_time: Option<Time>,
    #[serde(default)]
    pub cluster_available: bool,
    #[serde(default)]
    pub pvc_sync_ready: bool,
}

/// Condition `Type` values this reconciler writes (spec.md §7).
pub mod condition_types {
    pub const SCHEDULE_VALID: &str = "ScheduleValid";
    pub const KUBECONFIG_AVAILABLE: &str = "KubeconfigAvailable";
    pub const KUBECONFIG_VALID: &str = "KubeconfigValid";
    pub const CLUSTER_AVAILABLE: &str = "ClusterAvailable";
    pub const PVC_SYNC_READY: &str = "PVCSyncReady";
}
