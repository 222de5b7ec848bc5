//! Node accessors used by backend selection

use crate::meta;
use k8s_openapi::api::core::v1::Node;

/// Nodes carrying this label are never load balancer backends
pub const LABEL_NODE_EXCLUDE_BALANCERS: &str = "node.kubernetes.io/exclude-from-external-load-balancers";

/// Taint placed by the cluster autoscaler before it removes a node
pub const TO_BE_DELETED_TAINT: &str = "ToBeDeletedByClusterAutoscaler";

pub const NODE_READY: &str = "Ready";
pub const CONDITION_TRUE: &str = "True";

pub fn provider_id(node: &Node) -> &str {
    node.spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .unwrap_or_default()
}

pub fn has_label(node: &Node, key: &str) -> bool {
    node.metadata
        .labels
        .as_ref()
        .is_some_and(|l| l.contains_key(key))
}

pub fn has_taint(node: &Node, key: &str) -> bool {
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .is_some_and(|taints| taints.iter().any(|t| t.key == key))
}

/// The status of the Ready condition; a node without one is not ready
pub fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|c| c.iter().find(|cond| cond.type_ == NODE_READY))
        .is_some_and(|cond| cond.status == CONDITION_TRUE)
}

pub fn is_deleting(node: &Node) -> bool {
    meta::is_deleting(&node.metadata)
}
