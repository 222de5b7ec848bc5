//! Fakes and object builders shared by the controller tests

use crate::client::{ClusterClient, ClusterInfo};
use crate::controller::{stores, Context, Controller, ControllerParts, Writers};
use crate::metrics::ControllerMetrics;
use crate::recorder::EventRecorder;
use crate::{ControllerError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{
    LoadBalancerIngress, LoadBalancerStatus, Node, NodeCondition, NodeSpec, NodeStatus, ObjectReference,
    Service, ServiceSpec, ServiceStatus, Taint,
};
use k8s_openapi::api::discovery::v1::{Endpoint, EndpointSlice};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::core::ErrorResponse;
use kube::runtime::events::EventType;
use kube::runtime::watcher;
use lb_api::endpoint_slice::{ADDRESS_TYPE_IPV4, SERVICE_NAME_LABEL};
use lb_api::service::SERVICE_TYPE_LOAD_BALANCER;
use lb_cloud::{Cloud, FakeCloud, FakeLoadBalancer};
use lb_core::FeatureGates;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

pub const TEST_CLUSTER_ID: &str = "cluster-1";
pub const TEST_NAMESPACE: &str = "default";

struct FakeClusterState {
    service_patches: Vec<Service>,
    endpoint_slice_patches: Vec<EndpointSlice>,
    cluster_info: Option<ClusterInfo>,
    status_not_found: bool,
}

/// Records every patch that changes something and echoes the edited object
pub struct FakeClusterClient {
    state: Mutex<FakeClusterState>,
}

impl FakeClusterClient {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeClusterState {
                service_patches: Vec::new(),
                endpoint_slice_patches: Vec::new(),
                cluster_info: Some(ClusterInfo {
                    cluster_id: Some(TEST_CLUSTER_ID.to_string()),
                    cni: Some("flannel".to_string()),
                }),
                status_not_found: false,
            }),
        }
    }

    pub fn set_cluster_info(&self, info: Option<ClusterInfo>) {
        self.state.lock().unwrap().cluster_info = info;
    }

    /// Answer 404 to patches that change the service status
    pub fn fail_status_patches_with_not_found(&self) {
        self.state.lock().unwrap().status_not_found = true;
    }

    pub fn service_patches(&self) -> Vec<Service> {
        self.state.lock().unwrap().service_patches.clone()
    }

    pub fn endpoint_slice_patches(&self) -> Vec<EndpointSlice> {
        self.state.lock().unwrap().endpoint_slice_patches.clone()
    }
}

fn not_found(name: &str) -> ControllerError {
    ControllerError::Kube(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("services \"{name}\" not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

#[async_trait]
impl ClusterClient for FakeClusterClient {
    async fn patch_service(&self, old: &Service, new: &Service) -> Result<Service> {
        if old.metadata == new.metadata && old.status == new.status {
            return Ok(new.clone());
        }
        let mut state = self.state.lock().unwrap();
        if state.status_not_found && old.status != new.status {
            return Err(not_found(old.metadata.name.as_deref().unwrap_or_default()));
        }
        state.service_patches.push(new.clone());
        Ok(new.clone())
    }

    async fn patch_endpoint_slice(&self, old: &EndpointSlice, new: &EndpointSlice) -> Result<EndpointSlice> {
        if old.metadata != new.metadata {
            self.state.lock().unwrap().endpoint_slice_patches.push(new.clone());
        }
        Ok(new.clone())
    }

    async fn cluster_info(&self) -> Result<Option<ClusterInfo>> {
        Ok(self.state.lock().unwrap().cluster_info.clone())
    }
}

/// Keeps every recorded event in memory
#[derive(Default)]
pub struct RecordingEventRecorder {
    events: Mutex<Vec<(EventType, String, String)>>,
}

impl RecordingEventRecorder {
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(_, r, _)| r.clone()).collect()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events.lock().unwrap().iter().map(|(_, _, m)| m.clone()).collect()
    }

    pub fn types(&self) -> Vec<EventType> {
        self.events.lock().unwrap().iter().map(|(t, _, _)| *t).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

#[async_trait]
impl EventRecorder for RecordingEventRecorder {
    async fn record(
        &self,
        _object: &ObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        message: String,
    ) {
        self.events
            .lock()
            .unwrap()
            .push((type_, reason.to_string(), message));
    }
}

/// A controller over hand-fed stores with fake provider, client and recorder
pub struct TestEnv {
    pub controller: Option<Controller>,
    pub ctx: Arc<Context>,
    pub lb: Arc<FakeLoadBalancer>,
    pub client: Arc<FakeClusterClient>,
    pub recorder: Arc<RecordingEventRecorder>,
    writers: Writers,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_gates(FeatureGates::default())
    }

    pub fn with_gates(gates: FeatureGates) -> Self {
        let cloud = FakeCloud::new();
        let lb = cloud.fake_load_balancer().unwrap();
        let client = Arc::new(FakeClusterClient::new());
        let recorder = Arc::new(RecordingEventRecorder::default());
        let (stores, writers) = stores();
        let controller = Controller::from_parts(ControllerParts {
            cloud: Some(Arc::new(cloud) as Arc<dyn Cloud>),
            cluster: client.clone(),
            recorder: recorder.clone(),
            stores,
            gates,
            metrics: ControllerMetrics::new().unwrap(),
        })
        .unwrap();
        Self {
            ctx: controller.context(),
            controller: Some(controller),
            lb,
            client,
            recorder,
            writers,
        }
    }

    /// Complete the initial list of every store so they report ready
    pub fn mark_synced(&mut self) {
        self.writers.services.apply_watcher_event(&watcher::Event::Init);
        self.writers.services.apply_watcher_event(&watcher::Event::InitDone);
        self.writers.nodes.apply_watcher_event(&watcher::Event::Init);
        self.writers.nodes.apply_watcher_event(&watcher::Event::InitDone);
        self.writers.endpoint_slices.apply_watcher_event(&watcher::Event::Init);
        self.writers
            .endpoint_slices
            .apply_watcher_event(&watcher::Event::InitDone);
    }

    pub fn apply_service(&mut self, svc: Service) {
        self.writers.services.apply_watcher_event(&watcher::Event::Apply(svc));
    }

    pub fn remove_service(&mut self, svc: Service) {
        self.writers.services.apply_watcher_event(&watcher::Event::Delete(svc));
    }

    pub fn apply_endpoint_slice(&mut self, eps: EndpointSlice) {
        self.writers
            .endpoint_slices
            .apply_watcher_event(&watcher::Event::Apply(eps));
    }

    pub fn apply_node(&mut self, node: Node) {
        self.writers.nodes.apply_watcher_event(&watcher::Event::Apply(node));
    }

    pub fn remove_node(&mut self, node: Node) {
        self.writers.nodes.apply_watcher_event(&watcher::Event::Delete(node));
    }
}

/// A LoadBalancer service in the test namespace
pub fn lb_service(name: &str, uid: &str) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(SERVICE_TYPE_LOAD_BALANCER.to_string()),
            ..Default::default()
        }),
        status: None,
    }
}

pub trait ServiceExt {
    fn with_annotation(self, key: &str, value: &str) -> Self;
    fn with_finalizer(self, finalizer: &str) -> Self;
    fn with_status_ip(self, ip: &str) -> Self;
    fn with_type(self, type_: &str) -> Self;
    fn deleting(self) -> Self;
}

impl ServiceExt for Service {
    fn with_annotation(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    fn with_finalizer(mut self, finalizer: &str) -> Self {
        lb_api::meta::add_finalizer(&mut self.metadata, finalizer);
        self
    }

    fn with_status_ip(mut self, ip: &str) -> Self {
        self.status = Some(ServiceStatus {
            load_balancer: Some(LoadBalancerStatus {
                ingress: Some(vec![LoadBalancerIngress {
                    ip: Some(ip.to_string()),
                    ..Default::default()
                }]),
            }),
            ..Default::default()
        });
        self
    }

    fn with_type(mut self, type_: &str) -> Self {
        self.spec.get_or_insert_with(ServiceSpec::default).type_ = Some(type_.to_string());
        self
    }

    fn deleting(mut self) -> Self {
        self.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        self
    }
}

/// An IPv4 slice owned by `service` in the test namespace
pub fn endpoint_slice(name: &str, service: &str, addresses: &[&str]) -> EndpointSlice {
    EndpointSlice {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                SERVICE_NAME_LABEL.to_string(),
                service.to_string(),
            )])),
            ..Default::default()
        },
        address_type: ADDRESS_TYPE_IPV4.to_string(),
        endpoints: addresses
            .iter()
            .map(|a| Endpoint {
                addresses: vec![a.to_string()],
                ..Default::default()
            })
            .collect(),
        ports: None,
    }
}

pub fn with_deletion(mut eps: EndpointSlice) -> EndpointSlice {
    eps.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    eps
}

/// A ready node with a provider id derived from its name
pub fn node(name: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(NodeSpec {
            provider_id: Some(format!("fake://{name}")),
            ..Default::default()
        }),
        status: Some(NodeStatus {
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
    }
}

pub trait NodeExt {
    fn not_ready(self) -> Self;
    fn with_label(self, key: &str) -> Self;
    fn with_taint(self, key: &str) -> Self;
}

impl NodeExt for Node {
    fn not_ready(mut self) -> Self {
        if let Some(conditions) = self.status.as_mut().and_then(|s| s.conditions.as_mut()) {
            for condition in conditions.iter_mut() {
                condition.status = "False".to_string();
            }
        }
        self
    }

    fn with_label(mut self, key: &str) -> Self {
        self.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), String::new());
        self
    }

    fn with_taint(mut self, key: &str) -> Self {
        self.spec
            .get_or_insert_with(NodeSpec::default)
            .taints
            .get_or_insert_with(Vec::new)
            .push(Taint {
                key: key.to_string(),
                effect: "NoSchedule".to_string(),
                ..Default::default()
            });
        self
    }
}
