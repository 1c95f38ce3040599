//! SSH wire contract constants (spec.md §6 "SSH wire contract", §4.4.3
//! rsync daemon module) shared by every component that talks to an agent
//! or an ephemeral rsync pod.

pub const AGENT_SSH_PORT: u16 = 2222;
pub const AGENT_SSH_USER: &str = "syncer";
pub const TEST_CONNECTION_MAGIC: &str = "SSH proxy connection successful";

pub const RSYNC_CONFIG_MAP_NAME: &str = "dr-syncer-rsync-config";
pub const RSYNC_MODULE_NAME: &str = "data";
pub const RSYNC_MOUNT_PATH: &str = "/data";
pub const RSYNC_DAEMON_PORT: u16 = 8873;
pub const RSYNC_MAX_CONNECTIONS: u32 = 4;
pub const RSYNC_TIMEOUT_SECONDS: u32 = 300;

/// The restricted `authorized_keys` command every installed source-agent
/// key is pinned to (spec.md §6): no shell, no forwarding, rsync only.
pub fn restricted_authorized_keys_entry(public_key: &str) -> String {
    format!(
        "command=\"rsync --server -vlogDtprze.iLsfxC . {}\",no-port-forwarding,no-X11-forwarding,no-agent-forwarding,no-pty {}",
        RSYNC_MOUNT_PATH, public_key
    )
}

/// The default rsyncd.conf body the ephemeral pod mounts (spec.md §4.4.4
/// step 3, §6 "Rsync daemon module").
pub fn default_rsyncd_conf() -> String {
    format!(
        "uid = root\ngid = root\nuse chroot = no\nport = {port}\n\n[{module}]\n    path = {path}\n    read only = false\n    max connections = {max_conn}\n    timeout = {timeout}\n",
        port = RSYNC_DAEMON_PORT,
        module = RSYNC_MODULE_NAME,
        path = RSYNC_MOUNT_PATH,
        max_conn = RSYNC_MAX_CONNECTIONS,
        timeout = RSYNC_TIMEOUT_SECONDS,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_entry_forbids_forwarding() {
        let entry = restricted_authorized_keys_entry("ssh-rsa AAAA... host");
        assert!(entry.contains("no-port-forwarding"));
        assert!(entry.contains("no-pty"));
        assert!(entry.starts_with("command=\"rsync --server"));
    }

    #[test]
    fn default_conf_carries_spec_defaults() {
        let conf = default_rsyncd_conf();
        assert!(conf.contains("[data]"));
        assert!(conf.contains("max connections = 4"));
        assert!(conf.contains("timeout = 300"));
    }
}
