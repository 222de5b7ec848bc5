use serde::{Deserialize, Serialize};

/// Feature switches consulted by the controller
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGates {
    /// Keep NotReady nodes as backends and only drop nodes that are being
    /// deleted, excluded or tainted for removal
    #[serde(default = "default_stable_load_balancer_node_set")]
    pub stable_load_balancer_node_set: bool,
}

impl Default for FeatureGates {
    fn default() -> Self {
        Self {
            stable_load_balancer_node_set: default_stable_load_balancer_node_set(),
        }
    }
}

fn default_stable_load_balancer_node_set() -> bool {
    true
}
