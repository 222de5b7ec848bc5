//! Node eligibility for load balancer backends

use crate::FeatureGates;
use k8s_openapi::api::core::v1::{Node, Service};
use lb_api::node;
use lb_api::service::EXTERNAL_TRAFFIC_POLICY_LOCAL;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Whether a node's state meets one eligibility criterion
pub type NodeConditionPredicate = fn(&Node) -> bool;

pub const ALL_NODE_PREDICATES: &[NodeConditionPredicate] =
    &[node_included_predicate, node_untainted_predicate, node_ready_predicate];

/// Readiness is left to the provider's health checks for eTP=Local services
pub const ETP_LOCAL_NODE_PREDICATES: &[NodeConditionPredicate] =
    &[node_included_predicate, node_untainted_predicate];

pub const STABLE_NODE_SET_PREDICATES: &[NodeConditionPredicate] = &[
    node_not_deleted_predicate,
    node_included_predicate,
    // Tainted nodes are dropped whenever a sync happens for another reason,
    // the taint alone does not trigger one (see should_sync_updated_node).
    node_untainted_predicate,
];

/// Nodes labelled for exclusion are never backends
pub fn node_included_predicate(n: &Node) -> bool {
    !node::has_label(n, node::LABEL_NODE_EXCLUDE_BALANCERS)
}

/// Nodes the cluster autoscaler is about to remove are not backends
pub fn node_untainted_predicate(n: &Node) -> bool {
    !node::has_taint(n, node::TO_BE_DELETED_TAINT)
}

pub fn node_ready_predicate(n: &Node) -> bool {
    node::is_ready(n)
}

pub fn node_not_deleted_predicate(n: &Node) -> bool {
    !node::is_deleting(n)
}

pub fn predicates_for_service(
    service: &Service,
    gates: &FeatureGates,
) -> &'static [NodeConditionPredicate] {
    if gates.stable_load_balancer_node_set {
        return STABLE_NODE_SET_PREDICATES;
    }
    let policy = service
        .spec
        .as_ref()
        .and_then(|s| s.external_traffic_policy.as_deref());
    if policy == Some(EXTERNAL_TRAFFIC_POLICY_LOCAL) {
        return ETP_LOCAL_NODE_PREDICATES;
    }
    ALL_NODE_PREDICATES
}

pub fn respects_predicates(n: &Node, predicates: &[NodeConditionPredicate]) -> bool {
    predicates.iter().all(|p| p(n))
}

pub fn filter_with_predicates(
    nodes: &[Arc<Node>],
    predicates: &[NodeConditionPredicate],
) -> Vec<Arc<Node>> {
    nodes
        .iter()
        .filter(|n| respects_predicates(n, predicates))
        .cloned()
        .collect()
}

/// Whether a node update can change the backend set of any service.
///
/// The exclusion label is checked on its own because eTP=Local services and
/// the stable node set ignore readiness: a NotReady node that gains the label
/// must still trigger a sync. Services whose set did not change are skipped
/// later by comparing against the last synced nodes.
pub fn should_sync_updated_node(old: &Node, new: &Node, gates: &FeatureGates) -> bool {
    if node_included_predicate(old) != node_included_predicate(new) {
        return true;
    }
    if node::provider_id(old) != node::provider_id(new) {
        return true;
    }
    if !gates.stable_load_balancer_node_set {
        return respects_predicates(old, ALL_NODE_PREDICATES)
            != respects_predicates(new, ALL_NODE_PREDICATES);
    }
    false
}

/// Compare two node sets by name and provider id only
pub fn nodes_sufficiently_equal(old: &[Arc<Node>], new: &[Arc<Node>]) -> bool {
    if old.len() != new.len() {
        return false;
    }
    distill(old) == distill(new)
}

fn distill(nodes: &[Arc<Node>]) -> BTreeMap<String, String> {
    nodes
        .iter()
        .map(|n| {
            (
                n.metadata.name.clone().unwrap_or_default(),
                node::provider_id(n).to_string(),
            )
        })
        .collect()
}
