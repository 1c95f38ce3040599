use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Points at a key within a Secret, optionally in another namespace.
/// Used for both kubeconfig references (RemoteCluster) and SSH public-key
/// references (ClusterMapping).
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    /// Defaults to the owning object's own namespace when omitted.
    pub namespace: Option<String>,
    /// Defaults depend on the reference's use; see the field doc of the
    /// spec field that embeds this struct.
    pub key: Option<String>,
}

impl SecretKeyRef {
    pub fn key_or(&self, default: &str) -> String {
        self.key.clone().unwrap_or_else(|| default.to_string())
    }
}

pub(crate) fn default_true() -> bool {
    true
}
