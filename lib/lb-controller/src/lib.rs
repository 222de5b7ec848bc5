//! Service load balancer controller
//!
//! Watches Services, Nodes and EndpointSlices and keeps provider load
//! balancers in line with them:
//! - `sync` runs the per-service load balancer lifecycle
//! - `node_sync` pushes node set changes to every load balancer
//! - `informer` feeds reflector stores and classifies changes into queue keys

pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod informer;
pub mod metrics;
pub mod node_sync;
pub mod recorder;
pub mod sync;

#[cfg(test)]
mod testing;

pub use client::{ClusterClient, ClusterInfo, KubeClusterClient};
pub use config::ControllerConfig;
pub use controller::{Controller, ControllerParts, Stores};
pub use error::{ControllerError, Result};
pub use metrics::ControllerMetrics;
pub use recorder::{EventRecorder, KubeEventRecorder, NoopEventRecorder};
