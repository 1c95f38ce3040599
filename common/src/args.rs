use clap::Parser;

/// Process-wide tunables for the control plane binary. Read once at startup
/// (spec.md §4.1–§5); nothing here is hot-reloaded.
#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Namespace the controller itself runs in; used for the leader-election
    /// Lease and, by default, as the base for agent discovery.
    #[arg(long, env = "NAMESPACE", default_value = "dr-syncer-system")]
    pub namespace: String,

    /// Skip TLS verification for every RemoteCluster client (spec.md §4.2
    /// "global insecure"). Never defaults to true.
    #[arg(long, env = "DR_SYNCER_IGNORE_CERT", default_value_t = false)]
    pub ignore_cert: bool,

    /// Port the Prometheus `/metrics` and `/healthz` / `/readyz` endpoints are
    /// served on. `0` disables the metrics server.
    #[arg(long, env = "METRICS_PORT", default_value_t = 8080)]
    pub metrics_port: u16,

    /// Number of reconciles run concurrently per CRD kind (spec.md §5).
    #[arg(long, env = "DR_SYNCER_PARALLELISM", default_value_t = 5)]
    pub parallelism: u16,

    /// Global cap on simultaneous PVC data transfers (spec.md §4.4.4 step 1).
    #[arg(long, env = "DR_SYNCER_MAX_CONCURRENT_SYNCS", default_value_t = 5)]
    pub max_concurrent_syncs: usize,

    /// Worker-pool size for SSH connectivity verification (spec.md §4.4.2).
    #[arg(long, env = "DR_SYNCER_VERIFY_WORKERS", default_value_t = 10)]
    pub verify_workers: usize,

    /// Lease TTL for leader election.
    #[arg(long, env = "DR_SYNCER_LEASE_TTL_SECONDS", default_value_t = 15)]
    pub lease_ttl_seconds: u64,

    /// Interval between lease-renewal attempts; must stay comfortably below
    /// `lease_ttl_seconds`.
    #[arg(long, env = "DR_SYNCER_LEASE_RENEW_SECONDS", default_value_t = 5)]
    pub lease_renew_seconds: u64,
}

impl ControllerArgs {
    pub fn lease_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_ttl_seconds)
    }

    pub fn lease_renew_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lease_renew_seconds)
    }
}

/// Reads `POD_NAME`, falling back to `HOSTNAME`, falling back to a random
/// per-process identity — the same fallback chain every lease holder in the
/// teacher repo uses.
pub fn holder_id(controller: &str) -> String {
    std::env::var("POD_NAME")
        .or_else(|_| std::env::var("HOSTNAME"))
        .unwrap_or_else(|_| format!("dr-syncer-{controller}-{}", uuid::Uuid::new_v4()))
}
