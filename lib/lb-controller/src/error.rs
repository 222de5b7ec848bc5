use lb_cloud::{CloudError, RegistryError};
use lb_core::CoreError;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControllerError>;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("cluster info config map does not contain a clusterId")]
    ClusterIdMissing,

    #[error("cni {0:?} is not supported by the service controller")]
    UnsupportedCni(String),

    #[error("no cloud provider provided, services of type LoadBalancer will fail")]
    NoCloudProvider,

    #[error("cloud provider {0:?} does not support external load balancers")]
    LoadBalancerUnsupported(String),

    #[error("service status returned by ensure_load_balancer is empty")]
    EmptyLoadBalancerStatus,

    #[error("reflector store was dropped before it became ready")]
    StoreNotReady,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid key: {0}")]
    InvalidKey(#[from] CoreError),

    #[error("Cloud provider error: {0}")]
    Cloud(#[from] CloudError),

    #[error("Cloud provider registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl ControllerError {
    /// Explicit delay requested by the provider, honored without backoff
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ControllerError::Cloud(e) => e.retry_after(),
            _ => None,
        }
    }

    /// Whether the API server answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, ControllerError::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}
