//! In-memory provider recording every call it receives
//!
//! Results are configurable per operation so callers can drive the
//! controller through provider failures without a real backend.

use crate::{Cloud, CloudError, LoadBalancer};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use lb_api::service::service_key;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub const FAKE_PROVIDER_NAME: &str = "fake";

const FAKE_INGRESS_IP: &str = "192.0.2.10";

/// Oldest calls are dropped once the log holds this many
pub const MAX_RECORDED_CALLS: usize = 1024;

/// One recorded provider call
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FakeCall {
    Ensure {
        service: String,
        lb_id: String,
        nodes: Option<Vec<String>>,
        endpoint_slices: usize,
    },
    Update {
        service: String,
        nodes: Vec<String>,
    },
    Delete {
        service: String,
        lb_id: String,
    },
    Get {
        service: String,
    },
}

struct FakeState {
    calls: VecDeque<FakeCall>,
    ensure_result: Result<Option<LoadBalancerStatus>, CloudError>,
    update_error: Option<CloudError>,
    delete_errors: HashMap<String, CloudError>,
    get_result: Result<Option<LoadBalancerStatus>, CloudError>,
}

/// FakeLoadBalancer answers every call from its configured results
pub struct FakeLoadBalancer {
    state: Mutex<FakeState>,
}

impl FakeLoadBalancer {
    pub fn new() -> Self {
        let status = Self::default_status();
        Self {
            state: Mutex::new(FakeState {
                calls: VecDeque::new(),
                ensure_result: Ok(Some(status.clone())),
                update_error: None,
                delete_errors: HashMap::new(),
                get_result: Ok(Some(status)),
            }),
        }
    }

    /// Status returned by ensure and get unless configured otherwise
    pub fn default_status() -> LoadBalancerStatus {
        LoadBalancerStatus {
            ingress: Some(vec![LoadBalancerIngress {
                ip: Some(FAKE_INGRESS_IP.to_string()),
                ..Default::default()
            }]),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_ensure_result(&self, result: Result<Option<LoadBalancerStatus>, CloudError>) {
        self.state().ensure_result = result;
    }

    pub fn set_update_error(&self, error: Option<CloudError>) {
        self.state().update_error = error;
    }

    /// Fail deletion of `lb_id` with `error`
    pub fn set_delete_error(&self, lb_id: &str, error: CloudError) {
        self.state().delete_errors.insert(lb_id.to_string(), error);
    }

    pub fn set_get_result(&self, result: Result<Option<LoadBalancerStatus>, CloudError>) {
        self.state().get_result = result;
    }

    /// Recorded calls, oldest first
    pub fn calls(&self) -> Vec<FakeCall> {
        self.state().calls.iter().cloned().collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn record(&self, call: FakeCall) {
        debug!(?call, "Fake provider call");
        let mut state = self.state();
        if state.calls.len() == MAX_RECORDED_CALLS {
            state.calls.pop_front();
        }
        state.calls.push_back(call);
    }
}

impl Default for FakeLoadBalancer {
    fn default() -> Self {
        Self::new()
    }
}

fn node_names<'a>(nodes: impl IntoIterator<Item = &'a Node>) -> Vec<String> {
    nodes
        .into_iter()
        .map(|n| n.metadata.name.clone().unwrap_or_default())
        .collect()
}

#[async_trait]
impl LoadBalancer for FakeLoadBalancer {
    async fn ensure_load_balancer(
        &self,
        _cluster: &str,
        service: &Service,
        nodes: Option<&[Node]>,
        endpoint_slices: &[EndpointSlice],
        lb_id: &str,
    ) -> Result<Option<LoadBalancerStatus>, CloudError> {
        self.record(FakeCall::Ensure {
            service: service_key(service),
            lb_id: lb_id.to_string(),
            nodes: nodes.map(node_names),
            endpoint_slices: endpoint_slices.len(),
        });
        self.state().ensure_result.clone()
    }

    async fn update_load_balancer(
        &self,
        _cluster: &str,
        service: &Service,
        nodes: &[Node],
    ) -> Result<(), CloudError> {
        self.record(FakeCall::Update {
            service: service_key(service),
            nodes: node_names(nodes),
        });
        match self.state().update_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn ensure_load_balancer_deleted(
        &self,
        _cluster: &str,
        service: &Service,
        lb_id: &str,
    ) -> Result<(), CloudError> {
        self.record(FakeCall::Delete {
            service: service_key(service),
            lb_id: lb_id.to_string(),
        });
        match self.state().delete_errors.get(lb_id).cloned() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn get_load_balancer(
        &self,
        _cluster: &str,
        service: &Service,
    ) -> Result<Option<LoadBalancerStatus>, CloudError> {
        self.record(FakeCall::Get {
            service: service_key(service),
        });
        self.state().get_result.clone()
    }
}

/// FakeCloud hands out a shared [`FakeLoadBalancer`]
pub struct FakeCloud {
    load_balancer: Option<Arc<FakeLoadBalancer>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self {
            load_balancer: Some(Arc::new(FakeLoadBalancer::new())),
        }
    }

    /// A provider with no load balancer capability
    pub fn without_load_balancer() -> Self {
        Self { load_balancer: None }
    }

    /// The concrete fake, for configuring results and reading calls
    pub fn fake_load_balancer(&self) -> Option<Arc<FakeLoadBalancer>> {
        self.load_balancer.clone()
    }
}

impl Default for FakeCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl Cloud for FakeCloud {
    fn provider_name(&self) -> &str {
        FAKE_PROVIDER_NAME
    }

    fn load_balancer(&self) -> Option<Arc<dyn LoadBalancer>> {
        self.load_balancer
            .clone()
            .map(|lb| lb as Arc<dyn LoadBalancer>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service() -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let lb = FakeLoadBalancer::new();
        let svc = service();
        let status = lb
            .ensure_load_balancer("c1", &svc, None, &[], "lb-1")
            .await
            .unwrap();
        assert_eq!(status, Some(FakeLoadBalancer::default_status()));
        lb.ensure_load_balancer_deleted("c1", &svc, "lb-0").await.unwrap();

        assert_eq!(
            lb.calls(),
            vec![
                FakeCall::Ensure {
                    service: "default/web".to_string(),
                    lb_id: "lb-1".to_string(),
                    nodes: None,
                    endpoint_slices: 0,
                },
                FakeCall::Delete {
                    service: "default/web".to_string(),
                    lb_id: "lb-0".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_configured_failures() {
        let lb = FakeLoadBalancer::new();
        let svc = service();
        lb.set_delete_error("lb-0", CloudError::Api("boom".to_string()));
        lb.set_update_error(Some(CloudError::ImplementedElsewhere));

        assert!(lb.ensure_load_balancer_deleted("c1", &svc, "lb-0").await.is_err());
        assert!(lb.ensure_load_balancer_deleted("c1", &svc, "lb-1").await.is_ok());
        assert_eq!(
            lb.update_load_balancer("c1", &svc, &[]).await,
            Err(CloudError::ImplementedElsewhere)
        );
    }

    #[tokio::test]
    async fn test_call_log_keeps_most_recent_calls() {
        let lb = FakeLoadBalancer::new();
        let svc = service();
        for i in 0..MAX_RECORDED_CALLS + 5 {
            lb.ensure_load_balancer_deleted("c1", &svc, &format!("lb-{i}"))
                .await
                .unwrap();
        }

        let calls = lb.calls();
        assert_eq!(calls.len(), MAX_RECORDED_CALLS);
        assert_eq!(
            calls[0],
            FakeCall::Delete {
                service: "default/web".to_string(),
                lb_id: "lb-5".to_string(),
            }
        );
        assert_eq!(
            calls.last(),
            Some(&FakeCall::Delete {
                service: "default/web".to_string(),
                lb_id: format!("lb-{}", MAX_RECORDED_CALLS + 4),
            })
        );
    }

    #[test]
    fn test_cloud_without_load_balancer() {
        assert!(FakeCloud::without_load_balancer().load_balancer().is_none());
        assert!(FakeCloud::new().load_balancer().is_some());
    }
}
