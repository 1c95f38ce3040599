use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use crate::common::{SecretKeyRef, default_true};

fn default_connectivity_timeout() -> u64 {
    60
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "dr-syncer.io",
    version = "v1alpha1",
    kind = "ClusterMapping",
    plural = "clustermappings",
    derive = "PartialEq",
    status = "ClusterMappingStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
pub struct ClusterMappingSpec {
    pub source_cluster: String,
    pub target_cluster: String,
    pub ssh_key_secret_ref: Option<SecretKeyRef>,
    #[serde(default = "default_true")]
    pub verify_connectivity: bool,
    #[serde(default = "default_connectivity_timeout")]
    pub connectivity_timeout_seconds: u64,
    #[serde(default)]
    pub paused: bool,
}

impl ClusterMappingSpec {
    pub fn connectivity_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.connectivity_timeout_seconds)
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ClusterMappingPhase {
    #[default]
    Pending,
    Connecting,
    Connected,
    Failed,
}

impl FromStr for ClusterMappingPhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Connecting" => Ok(Self::Connecting),
            "Connected" => Ok(Self::Connected),
            "Failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ClusterMappingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct AgentPairStatus {
    pub source_node: String,
    pub target_node: String,
    pub connected: bool,
    pub error: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ConnectivityStatus {
    pub total_source_agents: u32,
    pub total_target_agents: u32,
    pub connected_agents: u32,
    #[serde(default)]
    pub details: Vec<AgentPairStatus>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ClusterMappingStatus {
    #[serde(default)]
    pub phase: ClusterMappingPhase,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub last_attempt_time: Option<Time>,
    pub last_verified: Option<Time>,
    pub connectivity: Option<ConnectivityStatus>,
    pub message: Option<String>,
}

/// `status.conditions[].type` this reconciler writes (spec.md §7).
pub const CONDITION_SYNCED: &str = "Synced";
