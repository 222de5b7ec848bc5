//! Cloud provider boundary for the service controller
//!
//! This library provides:
//! - The `Cloud` and `LoadBalancer` capability traits
//! - The provider error taxonomy
//! - A name based provider registry
//! - An in-memory `fake` provider

pub mod error;
pub mod fake;
pub mod provider;
pub mod registry;

pub use error::{CloudError, RegistryError};
pub use fake::{FakeCall, FakeCloud, FakeLoadBalancer};
pub use provider::{Cloud, LoadBalancer};
pub use registry::{init_cloud_provider, is_registered, register_cloud_provider, CloudFactory};
