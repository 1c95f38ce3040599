use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::common::default_true;

/// Finalizer installed on every NamespaceMapping (spec.md §3, §4.5).
pub const CLEANUP_FINALIZER: &str = "dr-syncer.io/cleanup-namespacemapping";

/// Resource-status rows are capped per kind to bound object size
/// (SPEC_FULL.md §C.4 — the original is silent on bounding).
pub const MAX_RESOURCE_STATUS_ROWS_PER_KIND: usize = 50;

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ReplicationMode {
    Continuous,
    #[default]
    Scheduled,
    Manual,
}

impl FromStr for ReplicationMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Continuous" => Ok(Self::Continuous),
            "Scheduled" => Ok(Self::Scheduled),
            "Manual" => Ok(Self::Manual),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuous => write!(f, "Continuous"),
            Self::Scheduled => write!(f, "Scheduled"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

fn default_background_sync_interval() -> u64 {
    30
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ContinuousConfig {
    /// Kinds to install a dynamic watch over; defaults to `resourceTypes`
    /// when omitted (spec.md §5, watch channel).
    pub watch_resources: Option<Vec<String>>,
    #[serde(default = "default_background_sync_interval")]
    pub background_sync_interval_seconds: u64,
}

impl Default for ContinuousConfig {
    fn default() -> Self {
        Self {
            watch_resources: None,
            background_sync_interval_seconds: default_background_sync_interval(),
        }
    }
}

fn default_rsync_timeout() -> u64 {
    300
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct DataSyncConfig {
    /// Overrides the process-wide concurrency cap for this mapping only,
    /// never raising it above the process-wide maximum.
    pub concurrent_syncs: Option<usize>,
    pub bandwidth_limit: Option<String>,
    #[serde(default)]
    pub rsync_options: Vec<String>,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
    #[serde(default = "default_rsync_timeout")]
    pub timeout_seconds: u64,
}

impl Default for DataSyncConfig {
    fn default() -> Self {
        Self {
            concurrent_syncs: None,
            bandwidth_limit: None,
            rsync_options: Vec::new(),
            exclude_paths: Vec::new(),
            timeout_seconds: default_rsync_timeout(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct PvcConfig {
    #[serde(default)]
    pub sync_data: bool,
    #[serde(default)]
    pub sync_persistent_volumes: bool,
    #[serde(default)]
    pub preserve_volume_attributes: bool,
    #[serde(default)]
    pub storage_class_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub access_mode_mappings: BTreeMap<String, String>,
    #[serde(default)]
    pub data_sync_config: DataSyncConfig,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ImmutableResourcePolicy {
    /// Recreate (delete then create) a resource whose immutable fields
    /// diverged from the source.
    Recreate,
    /// Leave the destination object as-is and record a `NonRetryable`
    /// sync error; this is the safer default.
    #[default]
    Skip,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ImmutableResourceConfig {
    #[serde(default)]
    pub policy: ImmutableResourcePolicy,
}

impl Default for ImmutableResourceConfig {
    fn default() -> Self {
        Self {
            policy: ImmutableResourcePolicy::Skip,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct NamespaceConfig {
    #[serde(default = "default_true")]
    pub create_namespace: bool,
    #[serde(default)]
    pub preserve_labels: bool,
    #[serde(default)]
    pub preserve_annotations: bool,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            create_namespace: true,
            preserve_labels: false,
            preserve_annotations: false,
        }
    }
}

#[derive(CustomResource, Serialize, Deserialize, Default, Debug, PartialEq, Clone, JsonSchema)]
#[kube(
    group = "dr-syncer.io",
    version = "v1alpha1",
    kind = "NamespaceMapping",
    plural = "namespacemappings",
    derive = "PartialEq",
    status = "NamespaceMappingStatus",
    namespaced
)]
#[kube(derive = "Default")]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.phase\", \"name\": \"PHASE\", \"type\": \"string\" }"
)]
#[kube(
    printcolumn = "{\"jsonPath\": \".status.lastSyncTime\", \"name\": \"LAST-SYNC\", \"type\": \"date\" }"
)]
pub struct NamespaceMappingSpec {
    pub cluster_mapping_ref: Option<String>,
    pub source_cluster: Option<String>,
    pub destination_cluster: Option<String>,

    pub source_namespace: String,
    pub destination_namespace: String,

    #[serde(default)]
    pub replication_mode: ReplicationMode,
    pub schedule: Option<String>,
    pub continuous: Option<ContinuousConfig>,

    #[serde(default)]
    pub resource_types: Vec<String>,
    pub label_selector: Option<String>,
    #[serde(default)]
    pub exclude_labels: Vec<String>,
    #[serde(default)]
    pub exclude_resources: Vec<String>,

    #[serde(default)]
    pub pvc_config: PvcConfig,
    #[serde(default)]
    pub immutable_resource_config: ImmutableResourceConfig,
    #[serde(default)]
    pub namespace_config: NamespaceConfig,

    #[serde(default = "default_true")]
    pub scale_to_zero: bool,
    #[serde(default)]
    pub paused: bool,
}

impl NamespaceMappingSpec {
    /// Either cluster may be named directly, or both are resolved through
    /// `clusterMappingRef` (spec.md §3, NamespaceMapping attributes).
    pub fn uses_cluster_mapping(&self) -> bool {
        self.cluster_mapping_ref.is_some()
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum NamespaceMappingPhase {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl fmt::Display for NamespaceMappingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct DeploymentScaleRecord {
    pub name: String,
    pub original_replicas: i32,
    pub last_synced_time: Option<Time>,
}

/// Error classification written alongside each `syncErrors` row, mirroring
/// spec.md §7's taxonomy (`Retryable` / `NonRetryable` / `WaitForNextSync`).
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema, Default)]
pub enum ErrorClass {
    #[default]
    Retryable,
    NonRetryable,
    WaitForNextSync,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct ResourceStatusRow {
    pub kind: String,
    pub name: String,
    pub action: String,
    pub message: Option<String>,
    pub last_synced_time: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct SyncError {
    pub kind: String,
    pub name: String,
    pub message: String,
    pub time: Option<Time>,
    #[serde(default)]
    pub classification: ErrorClass,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct SyncStats {
    pub resources_synced: u64,
    pub resources_failed: u64,
    pub resources_skipped: u64,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct RetryStatus {
    pub consecutive_failures: u32,
    pub last_attempt_time: Option<Time>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Default, JsonSchema)]
pub struct NamespaceMappingStatus {
    #[serde(default)]
    pub phase: NamespaceMappingPhase,
    pub last_sync_time: Option<Time>,
    pub next_sync_time: Option<Time>,
    #[serde(default)]
    pub deployment_scales: Vec<DeploymentScaleRecord>,
    #[serde(default)]
    pub resource_status: Vec<ResourceStatusRow>,
    /// Set when `resource_status` hit `MAX_RESOURCE_STATUS_ROWS_PER_KIND`
    /// for any kind this sync (SPEC_FULL.md §C.4).
    #[serde(default)]
    pub resource_status_truncated: bool,
    #[serde(default)]
    pub sync_stats: SyncStats,
    #[serde(default)]
    pub retry_status: RetryStatus,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub sync_errors: Vec<SyncError>,
    /// Manual-mode bookkeeping: the last `metadata.generation` whose
    /// `sync-now` annotation was observed and acted on (spec.md §4.1).
    pub acknowledged_sync_now_generation: Option<i64>,
}

/// `status.conditions[].type` this reconciler writes (spec.md §7).
pub const CONDITION_SYNCED: &str = "Synced";
