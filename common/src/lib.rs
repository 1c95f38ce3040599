pub mod args;
pub mod shutdown;

pub fn signal_ready() {
    std::fs::write("/etc/ready", "ready").expect("Failed to write readiness file");
}

/// Process-wide startup: honor `NO_COLOR`/`DISABLE_COLORS` for the
/// `println!`/`eprintln!` log lines the controllers emit.
pub fn init() {
    let disable_colors = ["1", "true"].contains(
        &std::env::var("DISABLE_COLORS")
            .unwrap_or_else(|_| String::new())
            .to_lowercase()
            .as_str(),
    );
    owo_colors::set_override(!disable_colors);
}

/// The labels/annotations contract from spec.md §6 — these are the only
/// `dr-syncer.io/*` keys any component is allowed to read or write. They are
/// a public interface, not an implementation detail: external tooling
/// (the one-shot CLI, dashboards) depends on these exact strings.
pub mod annotations {
    pub const IGNORE: &str = "dr-syncer.io/ignore";
    pub const SCALE_OVERRIDE: &str = "dr-syncer.io/scale-override";
    pub const ORIGINAL_REPLICAS: &str = "dr-syncer.io/original-replicas";
    pub const SOURCE_NAMESPACE: &str = "dr-syncer.io/source-namespace";
    pub const SYNCED_AT: &str = "dr-syncer.io/synced-at";
    pub const SYNC_NOW: &str = "dr-syncer.io/sync-now";
    pub const ROTATE_SSH_KEY: &str = "dr-syncer.io/rotate-ssh-key";
    pub const STORAGE_CLASS_OVERRIDE: &str = "dr-syncer.io/storage-class";
}

/// Name of the agent fleet label selector every RemoteCluster with PVC-sync
/// enabled is expected to expose (spec.md §3, RemoteCluster invariants).
pub const AGENT_LABEL_SELECTOR: &str = "app=dr-syncer-agent";

/// The name this controller writes into `kube::api::PatchParams::apply`'s
/// field manager, and into any object it creates.
pub const MANAGER_NAME: &str = "dr-syncer";
