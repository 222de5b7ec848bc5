//! Service controller wiring: stores, queues and workers

use crate::client::{ClusterClient, KubeClusterClient};
use crate::config::ControllerConfig;
use crate::informer::{Informer, Notification};
use crate::metrics::ControllerMetrics;
use crate::recorder::{EventRecorder, KubeEventRecorder};
use crate::{ControllerError, Result};
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Node, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::{Api, Client};
use lb_cloud::{Cloud, LoadBalancer};
use lb_core::{classify, ClusterEvent, Decision, FeatureGates, LastSyncedNodes, ServiceCache, WorkQueue};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Networking plugin the provider integration cannot serve
const UNSUPPORTED_CNI: &str = "calico";

/// Read-only views of the watched kinds
#[derive(Clone)]
pub struct Stores {
    pub services: Store<Service>,
    pub nodes: Store<Node>,
    pub endpoint_slices: Store<EndpointSlice>,
}

impl Stores {
    pub fn service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.services.get(&ObjectRef::new(name).within(namespace))
    }

    /// Endpoint slices labelled as belonging to `namespace/name`
    pub fn endpoint_slices_for(&self, namespace: &str, name: &str) -> Vec<Arc<EndpointSlice>> {
        self.endpoint_slices
            .state()
            .into_iter()
            .filter(|eps| {
                eps.metadata.namespace.as_deref() == Some(namespace)
                    && lb_api::endpoint_slice::owning_service(eps) == Some(name)
            })
            .collect()
    }

    pub async fn wait_until_ready(&self) -> Result<()> {
        tokio::try_join!(
            self.services.wait_until_ready(),
            self.nodes.wait_until_ready(),
            self.endpoint_slices.wait_until_ready(),
        )
        .map_err(|_| ControllerError::StoreNotReady)?;
        Ok(())
    }
}

pub(crate) struct Writers {
    pub(crate) services: Writer<Service>,
    pub(crate) nodes: Writer<Node>,
    pub(crate) endpoint_slices: Writer<EndpointSlice>,
}

pub(crate) fn stores() -> (Stores, Writers) {
    let (services, service_writer) = reflector::store();
    let (nodes, node_writer) = reflector::store();
    let (endpoint_slices, endpoint_slice_writer) = reflector::store();
    (
        Stores {
            services,
            nodes,
            endpoint_slices,
        },
        Writers {
            services: service_writer,
            nodes: node_writer,
            endpoint_slices: endpoint_slice_writer,
        },
    )
}

/// Everything the controller needs apart from the watch machinery
pub struct ControllerParts {
    pub cloud: Option<Arc<dyn Cloud>>,
    pub cluster: Arc<dyn ClusterClient>,
    pub recorder: Arc<dyn EventRecorder>,
    pub stores: Stores,
    pub gates: FeatureGates,
    pub metrics: ControllerMetrics,
}

/// State shared by the service and node workers
pub struct Context {
    pub(crate) provider_name: String,
    pub(crate) balancer: Arc<dyn LoadBalancer>,
    pub(crate) cluster: Arc<dyn ClusterClient>,
    pub(crate) recorder: Arc<dyn EventRecorder>,
    pub(crate) stores: Stores,
    pub(crate) cache: ServiceCache,
    pub(crate) last_synced: LastSyncedNodes,
    pub(crate) service_queue: WorkQueue,
    pub(crate) node_queue: WorkQueue,
    pub(crate) endpoint_slice_queue: WorkQueue,
    pub(crate) gates: FeatureGates,
    pub(crate) metrics: ControllerMetrics,
}

impl Context {
    /// Route a cluster notification to the queue that handles it
    pub fn handle_event(&self, event: ClusterEvent) {
        let decision = classify(&event, &self.gates, |namespace, name| {
            self.stores.service(namespace, name)
        });
        match decision {
            Decision::EnqueueService(key) => {
                debug!(%key, "Enqueueing service");
                self.service_queue.add(&key);
            }
            Decision::EnqueueNode(key) => {
                debug!(%key, "Enqueueing node");
                self.node_queue.add(&key);
            }
            Decision::Ignore => {}
        }
    }

    fn handle_service_result(&self, key: &str, result: Result<()>) {
        match result {
            Ok(()) => self.service_queue.forget(key),
            Err(e) => match e.retry_after() {
                Some(after) => {
                    warn!(%key, ?after, error = %e, "Error processing service, retrying after delay");
                    self.service_queue.add_after(key, after);
                }
                None => {
                    error!(%key, error = %e, "Error processing service, retrying with exponential backoff");
                    self.service_queue.add_rate_limited(key);
                }
            },
        }
    }

    async fn check_cluster_info(&self) -> Result<()> {
        match self.cluster.cluster_info().await {
            Ok(Some(info)) if info.cni.as_deref() == Some(UNSUPPORTED_CNI) => {
                Err(ControllerError::UnsupportedCni(UNSUPPORTED_CNI.to_string()))
            }
            Ok(Some(_)) => Ok(()),
            Ok(None) => {
                warn!("Cluster info config map not found, load balancer syncs will fail until it exists");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to read cluster info");
                Ok(())
            }
        }
    }

    fn shut_down_queues(&self) {
        self.service_queue.shut_down();
        self.node_queue.shut_down();
        self.endpoint_slice_queue.shut_down();
    }
}

async fn service_worker(ctx: Arc<Context>) {
    while let Some(key) = ctx.service_queue.get().await {
        let result = ctx.sync_service(&key).await;
        ctx.handle_service_result(&key, result);
        ctx.service_queue.done(&key);
    }
}

/// Node changes are handled one at a time; each runs a full node sync
async fn node_worker(ctx: Arc<Context>, workers: usize) {
    while let Some(key) = ctx.node_queue.get().await {
        match ctx.sync_nodes(workers).await {
            Ok(retry) => {
                for service_key in retry {
                    ctx.service_queue.add(&service_key);
                }
                ctx.node_queue.forget(&key);
            }
            Err(e) => {
                error!(node = %key, error = %e, "Error syncing nodes, retrying with exponential backoff");
                ctx.node_queue.add_rate_limited(&key);
            }
        }
        ctx.node_queue.done(&key);
    }
}

struct InformerSources {
    client: Client,
    writers: Writers,
    service_resync: Duration,
    node_resync: Duration,
    endpoint_slice_resync: Duration,
}

impl InformerSources {
    fn spawn(self, ctx: &Arc<Context>) -> Vec<JoinHandle<()>> {
        let InformerSources {
            client,
            writers,
            service_resync,
            node_resync,
            endpoint_slice_resync,
        } = self;

        let services = {
            let ctx = ctx.clone();
            Informer::new(Api::<Service>::all(client.clone()), writers.services, service_resync).run(
                move |n| match n {
                    Notification::Added(svc) => ctx.handle_event(ClusterEvent::ServiceAdded(svc)),
                    Notification::Updated { old, new } => {
                        ctx.handle_event(ClusterEvent::ServiceUpdated { old, new })
                    }
                    // Services with a load balancer keep the finalizer, their
                    // deletion arrives as an update first.
                    Notification::Deleted(_) => {}
                },
            )
        };

        let nodes = {
            let ctx = ctx.clone();
            Informer::new(Api::<Node>::all(client.clone()), writers.nodes, node_resync).run(
                move |n| match n {
                    Notification::Added(node) => ctx.handle_event(ClusterEvent::NodeAdded(node)),
                    Notification::Updated { old, new } => {
                        ctx.handle_event(ClusterEvent::NodeUpdated { old, new })
                    }
                    Notification::Deleted(node) => ctx.handle_event(ClusterEvent::NodeDeleted(node)),
                },
            )
        };

        let endpoint_slices = {
            let ctx = ctx.clone();
            Informer::new(
                Api::<EndpointSlice>::all(client),
                writers.endpoint_slices,
                endpoint_slice_resync,
            )
            .run(move |n| match n {
                Notification::Added(eps) => ctx.handle_event(ClusterEvent::EndpointSliceAdded(eps)),
                Notification::Updated { old, new } => {
                    ctx.handle_event(ClusterEvent::EndpointSliceUpdated { old, new })
                }
                Notification::Deleted(_) => {}
            })
        };

        vec![
            tokio::spawn(services),
            tokio::spawn(nodes),
            tokio::spawn(endpoint_slices),
        ]
    }
}

/// Controller keeps provider load balancers in line with Services
pub struct Controller {
    ctx: Arc<Context>,
    informers: Option<InformerSources>,
}

impl Controller {
    /// Build a controller that watches the cluster behind `client`
    pub fn new(
        client: Client,
        cloud: Option<Arc<dyn Cloud>>,
        config: &ControllerConfig,
        metrics: ControllerMetrics,
    ) -> Result<Self> {
        let (stores, writers) = stores();
        let parts = ControllerParts {
            cloud,
            cluster: Arc::new(KubeClusterClient::new(
                client.clone(),
                &config.cluster_info_namespace,
                &config.cluster_info_name,
            )),
            recorder: Arc::new(KubeEventRecorder::new(client.clone())),
            stores,
            gates: config.feature_gates(),
            metrics,
        };
        let mut controller = Self::from_parts(parts)?;
        controller.informers = Some(InformerSources {
            client,
            writers,
            service_resync: config.service_resync_period(),
            node_resync: config.node_resync_period(),
            endpoint_slice_resync: config.endpoint_slice_resync_period(),
        });
        Ok(controller)
    }

    /// Build a controller over externally fed stores
    pub fn from_parts(parts: ControllerParts) -> Result<Self> {
        let cloud = parts.cloud.ok_or(ControllerError::NoCloudProvider)?;
        let balancer = cloud
            .load_balancer()
            .ok_or_else(|| ControllerError::LoadBalancerUnsupported(cloud.provider_name().to_string()))?;

        let ctx = Context {
            provider_name: cloud.provider_name().to_string(),
            balancer,
            cluster: parts.cluster,
            recorder: parts.recorder,
            stores: parts.stores,
            cache: ServiceCache::new(),
            last_synced: LastSyncedNodes::new(),
            service_queue: WorkQueue::new("service"),
            node_queue: WorkQueue::new("node"),
            endpoint_slice_queue: WorkQueue::new("endpointslice"),
            gates: parts.gates,
            metrics: parts.metrics,
        };
        Ok(Self {
            ctx: Arc::new(ctx),
            informers: None,
        })
    }

    pub fn context(&self) -> Arc<Context> {
        self.ctx.clone()
    }

    pub fn service_queue(&self) -> WorkQueue {
        self.ctx.service_queue.clone()
    }

    pub fn node_queue(&self) -> WorkQueue {
        self.ctx.node_queue.clone()
    }

    /// Run until `shutdown` completes.
    ///
    /// Waits for all stores to sync before starting `workers` service workers
    /// and the single node worker. On shutdown the queues stop handing out
    /// keys and in-flight syncs finish before this returns.
    pub async fn run<F>(self, shutdown: F, workers: usize) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Controller { ctx, informers } = self;
        let workers = workers.max(1);
        info!(provider = %ctx.provider_name, workers, "Starting service controller");

        let informer_tasks = match informers {
            Some(sources) => sources.spawn(&ctx),
            None => Vec::new(),
        };
        let stop_informers = || {
            for task in &informer_tasks {
                task.abort();
            }
        };

        tokio::pin!(shutdown);
        let ready = tokio::select! {
            _ = &mut shutdown => None,
            ready = ctx.stores.wait_until_ready() => Some(ready),
        };
        let startup = match ready {
            None => {
                info!("Shutdown requested before caches synced");
                ctx.shut_down_queues();
                stop_informers();
                return Ok(());
            }
            Some(ready) => match ready {
                Ok(()) => ctx.check_cluster_info().await,
                Err(e) => Err(e),
            },
        };
        if let Err(e) = startup {
            ctx.shut_down_queues();
            stop_informers();
            return Err(e);
        }
        info!("Caches synced, starting workers");

        let mut handles: Vec<JoinHandle<()>> = (0..workers)
            .map(|_| tokio::spawn(service_worker(ctx.clone())))
            .collect();
        handles.push(tokio::spawn(node_worker(ctx.clone(), workers)));

        shutdown.await;
        info!("Shutting down service controller");
        ctx.shut_down_queues();
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task failed");
            }
        }
        stop_informers();
        Ok(())
    }
}
