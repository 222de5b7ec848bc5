//! Cluster object vocabulary for the service load-balancer controller
//!
//! This library describes how the controller reads and marks the core
//! Kubernetes objects it works with:
//! - Service: load-balancer intent, identifier annotations, cleanup finalizer
//! - EndpointSlice: owning service, address family, cleanup finalizer
//! - Node: provider identity, readiness, exclusion label and taints

pub mod endpoint_slice;
pub mod meta;
pub mod node;
pub mod service;

pub use service::{LoadBalancerIds, Migration};

/// Field manager / event source name used for every write made by the controller
pub const CONTROLLER_NAME: &str = "service-controller";
