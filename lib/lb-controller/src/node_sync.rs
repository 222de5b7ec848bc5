//! Pushing node set changes to existing load balancers

use crate::controller::Context;
use crate::recorder::{actions, reasons};
use crate::Result;
use futures::stream::{self, StreamExt};
use k8s_openapi::api::core::v1::{Node, Service};
use kube::runtime::events::EventType;
use lb_api::service::{self, service_key};
use lb_cloud::CloudError;
use lb_core::predicates::{filter_with_predicates, nodes_sufficiently_equal, predicates_for_service};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info};

/// Node names included in events before the list is cut short
const MAX_LOGGED_NODE_NAMES: usize = 20;

impl Context {
    /// Update the backends of every cached load balancer service.
    ///
    /// Returns the keys of services whose update failed; those are retried
    /// through the service queue.
    pub async fn sync_nodes(&self, workers: usize) -> Result<HashSet<String>> {
        let start = Instant::now();
        let cluster = self.cluster.cluster_id().await?;
        let services = self.cache.all_services().await;
        info!(services = services.len(), "Syncing load balancer hosts");

        let syncs: Vec<_> = services
            .iter()
            .map(|svc| self.sync_node_set(&cluster, svc))
            .collect();
        let results: Vec<Option<String>> = stream::iter(syncs)
            .buffer_unordered(workers.max(1))
            .collect()
            .await;
        let retry: HashSet<String> = results.into_iter().flatten().collect();

        self.metrics
            .nodesync_latency_seconds
            .observe(start.elapsed().as_secs_f64());
        info!(failed = retry.len(), elapsed = ?start.elapsed(), "Finished syncing load balancer hosts");
        Ok(retry)
    }

    /// Returns the service key when the update has to be retried
    async fn sync_node_set(&self, cluster: &str, svc: &Arc<Service>) -> Option<String> {
        if !service::wants_load_balancer(svc) {
            return None;
        }
        let key = service_key(svc);
        let predicates = predicates_for_service(svc, &self.gates);
        let new_nodes = filter_with_predicates(&self.stores.nodes.state(), predicates);
        let old_nodes = filter_with_predicates(&self.last_synced.get(&key).await, predicates);
        // Recorded before the attempt so a failing service is retried through
        // the service queue rather than on every node change
        self.last_synced.store(&key, new_nodes.clone()).await;

        if nodes_sufficiently_equal(&old_nodes, &new_nodes) {
            debug!(%key, "Load balancer hosts unchanged");
            return None;
        }

        match self.update_load_balancer_hosts(cluster, svc, &new_nodes).await {
            Ok(()) => None,
            Err(e) => {
                error!(%key, error = %e, "Failed to update load balancer hosts");
                self.metrics.nodesync_error_total.inc();
                Some(key)
            }
        }
    }

    async fn update_load_balancer_hosts(
        &self,
        cluster: &str,
        svc: &Service,
        nodes: &[Arc<Node>],
    ) -> Result<()> {
        let start = Instant::now();
        self.metrics.loadbalancer_sync_total.inc();
        let result = self.push_hosts(cluster, svc, nodes).await;
        self.metrics
            .update_loadbalancer_host_latency_seconds
            .observe(start.elapsed().as_secs_f64());
        result
    }

    async fn push_hosts(&self, cluster: &str, svc: &Service, nodes: &[Arc<Node>]) -> Result<()> {
        let hosts: Vec<Node> = nodes.iter().map(|n| (**n).clone()).collect();
        let err = match self.balancer.update_load_balancer(cluster, svc, &hosts).await {
            Ok(()) => {
                if nodes.is_empty() {
                    self.record(
                        svc,
                        EventType::Warning,
                        reasons::UNAVAILABLE_LOAD_BALANCER,
                        actions::UPDATE_HOSTS,
                        "There are no available nodes for LoadBalancer".to_string(),
                    )
                    .await;
                } else {
                    self.record(
                        svc,
                        EventType::Normal,
                        reasons::UPDATED_LOAD_BALANCER,
                        actions::UPDATE_HOSTS,
                        "Updated load balancer with new hosts".to_string(),
                    )
                    .await;
                }
                return Ok(());
            }
            Err(CloudError::ImplementedElsewhere) => return Ok(()),
            Err(e) => e,
        };

        // A load balancer that no longer exists has nothing to update
        match self.balancer.get_load_balancer(cluster, svc).await {
            Ok(None) => Ok(()),
            Ok(Some(_)) => {
                self.record(
                    svc,
                    EventType::Warning,
                    reasons::UPDATE_LOAD_BALANCER_FAILED,
                    actions::UPDATE_HOSTS,
                    format!(
                        "Error updating load balancer with new hosts {:?} [node names limited, total number of nodes: {}], error: {}",
                        loggable_node_names(nodes),
                        nodes.len(),
                        err
                    ),
                )
                .await;
                Err(err.into())
            }
            Err(get_err) => {
                error!(service = %service_key(svc), error = %get_err, "Failed to check if load balancer exists");
                Err(err.into())
            }
        }
    }
}

/// Sorted node names, cut off after a fixed count with a trailing summary
pub fn loggable_node_names(nodes: &[Arc<Node>]) -> Vec<String> {
    let mut names: Vec<String> = nodes
        .iter()
        .map(|n| n.metadata.name.clone().unwrap_or_default())
        .collect();
    names.sort();
    if names.len() > MAX_LOGGED_NODE_NAMES {
        let more = names.len() - MAX_LOGGED_NODE_NAMES;
        names.truncate(MAX_LOGGED_NODE_NAMES);
        names.push(format!("<{more} more>"));
    }
    names
}
