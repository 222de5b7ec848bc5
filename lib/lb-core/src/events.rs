//! Classification of cluster notifications into queue work
//!
//! Every watch notification the controller receives is turned into a
//! [`ClusterEvent`] and passed through [`classify`], which decides whether a
//! service or node key needs to be queued.

use crate::predicates::should_sync_updated_node;
use crate::FeatureGates;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use lb_api::service::{self, LoadBalancerIds};
use lb_api::endpoint_slice;
use std::sync::Arc;

/// A change notification for one of the watched kinds.
///
/// Periodic resyncs are delivered as updates whose old and new objects are
/// the same.
#[derive(Clone, Debug)]
pub enum ClusterEvent {
    ServiceAdded(Arc<Service>),
    ServiceUpdated {
        old: Arc<Service>,
        new: Arc<Service>,
    },
    NodeAdded(Arc<Node>),
    NodeUpdated {
        old: Arc<Node>,
        new: Arc<Node>,
    },
    NodeDeleted(Arc<Node>),
    EndpointSliceAdded(Arc<EndpointSlice>),
    EndpointSliceUpdated {
        old: Arc<EndpointSlice>,
        new: Arc<EndpointSlice>,
    },
}

/// What to do with a notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Ignore,
    EnqueueService(String),
    EnqueueNode(String),
}

/// Decide which key, if any, an event should enqueue.
///
/// `lookup_service(namespace, name)` resolves the Service owning an
/// EndpointSlice from the read-only store.
pub fn classify<F>(event: &ClusterEvent, gates: &FeatureGates, lookup_service: F) -> Decision
where
    F: Fn(&str, &str) -> Option<Arc<Service>>,
{
    match event {
        // A service still carrying the finalizer is queued as well, to finish
        // cleanup the controller did not complete before it last exited.
        ClusterEvent::ServiceAdded(svc) => enqueue_if_managed(svc),
        ClusterEvent::ServiceUpdated { old, new } => {
            if LoadBalancerIds::from_service(old).is_empty()
                && LoadBalancerIds::from_service(new).is_empty()
                && !service::is_managed(new)
            {
                return Decision::Ignore;
            }
            Decision::EnqueueService(service::service_key(new))
        }
        ClusterEvent::NodeAdded(node) | ClusterEvent::NodeDeleted(node) => node_key(node),
        ClusterEvent::NodeUpdated { old, new } => {
            if should_sync_updated_node(old, new, gates) {
                node_key(new)
            } else {
                Decision::Ignore
            }
        }
        ClusterEvent::EndpointSliceAdded(eps) => match endpoint_slice::owning_service(eps) {
            Some(name) => resolve_owner(eps, name, &lookup_service),
            None => Decision::Ignore,
        },
        ClusterEvent::EndpointSliceUpdated { old, new } => {
            let owner = endpoint_slice::owning_service(new).or_else(|| endpoint_slice::owning_service(old));
            let Some(name) = owner else {
                return Decision::Ignore;
            };
            if !(endpoint_slice::needs_update(old, new) || endpoint_slice::needs_cleanup(new)) {
                return Decision::Ignore;
            }
            resolve_owner(new, name, &lookup_service)
        }
    }
}

fn enqueue_if_managed(svc: &Service) -> Decision {
    if service::is_managed(svc) {
        Decision::EnqueueService(service::service_key(svc))
    } else {
        Decision::Ignore
    }
}

fn node_key(node: &Node) -> Decision {
    match node.metadata.name.as_deref() {
        Some(name) if !name.is_empty() => Decision::EnqueueNode(name.to_string()),
        _ => Decision::Ignore,
    }
}

fn resolve_owner<F>(eps: &EndpointSlice, service_name: &str, lookup_service: &F) -> Decision
where
    F: Fn(&str, &str) -> Option<Arc<Service>>,
{
    let namespace = eps.metadata.namespace.as_deref().unwrap_or_default();
    match lookup_service(namespace, service_name) {
        Some(svc) => enqueue_if_managed(&svc),
        None => Decision::Ignore,
    }
}
