//! Provider capability traits

use crate::CloudError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LoadBalancerStatus, Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use std::sync::Arc;

/// A cloud provider; only the load balancer capability is used here
pub trait Cloud: Send + Sync {
    fn provider_name(&self) -> &str;

    /// `None` when the provider cannot manage load balancers
    fn load_balancer(&self) -> Option<Arc<dyn LoadBalancer>>;
}

/// Provider-side load balancer operations.
///
/// `cluster` is the cluster identifier, `lb_id` the provider identifier read
/// from the Service annotations.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Create or update the load balancer and return its status.
    ///
    /// `nodes` is `None` when the provider should pick backends from the
    /// endpoint slices alone.
    async fn ensure_load_balancer(
        &self,
        cluster: &str,
        service: &Service,
        nodes: Option<&[Node]>,
        endpoint_slices: &[EndpointSlice],
        lb_id: &str,
    ) -> Result<Option<LoadBalancerStatus>, CloudError>;

    /// Replace the backend nodes of an existing load balancer
    async fn update_load_balancer(
        &self,
        cluster: &str,
        service: &Service,
        nodes: &[Node],
    ) -> Result<(), CloudError>;

    /// Delete the load balancer; succeeds if it is already gone
    async fn ensure_load_balancer_deleted(
        &self,
        cluster: &str,
        service: &Service,
        lb_id: &str,
    ) -> Result<(), CloudError>;

    /// Current status, `None` if the load balancer does not exist
    async fn get_load_balancer(
        &self,
        cluster: &str,
        service: &Service,
    ) -> Result<Option<LoadBalancerStatus>, CloudError>;
}
