//! Prometheus metrics for the service controller

use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
use std::sync::Arc;

const SUBSYSTEM: &str = "service_controller";

/// Latency buckets from 1s up to roughly 17 minutes
fn latency_buckets() -> Vec<f64> {
    prometheus::exponential_buckets(1.0, 2.0, 11).unwrap_or_else(|_| prometheus::DEFAULT_BUCKETS.to_vec())
}

/// Metrics collected by the node sync loop
#[derive(Clone)]
pub struct ControllerMetrics {
    /// Time taken to sync all load balancers after a node change
    pub nodesync_latency_seconds: Histogram,
    /// Time taken to push a new node set to one load balancer
    pub update_loadbalancer_host_latency_seconds: Histogram,
    /// Load balancer backend updates attempted
    pub loadbalancer_sync_total: Counter,
    /// Node sync passes that failed for a service
    pub nodesync_error_total: Counter,
    pub registry: Arc<Registry>,
}

impl ControllerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let nodesync_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "nodesync_latency_seconds",
                "A metric measuring the latency for nodesync which updates loadbalancer hosts on cluster node updates.",
            )
            .subsystem(SUBSYSTEM)
            .buckets(latency_buckets()),
        )?;

        let update_loadbalancer_host_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "update_loadbalancer_host_latency_seconds",
                "A metric measuring the latency for updating each load balancer hosts.",
            )
            .subsystem(SUBSYSTEM)
            .buckets(latency_buckets()),
        )?;

        let loadbalancer_sync_total = Counter::with_opts(
            prometheus::Opts::new(
                "loadbalancer_sync_total",
                "A metric counting the amount of times any load balancer has been configured, as an effect of service/node changes on the cluster",
            )
            .subsystem(SUBSYSTEM),
        )?;

        let nodesync_error_total = Counter::with_opts(
            prometheus::Opts::new(
                "nodesync_error_total",
                "A metric counting the amount of times any load balancer has been configured and errored, as an effect of node changes on the cluster",
            )
            .subsystem(SUBSYSTEM),
        )?;

        registry.register(Box::new(nodesync_latency_seconds.clone()))?;
        registry.register(Box::new(update_loadbalancer_host_latency_seconds.clone()))?;
        registry.register(Box::new(loadbalancer_sync_total.clone()))?;
        registry.register(Box::new(nodesync_error_total.clone()))?;

        Ok(Self {
            nodesync_latency_seconds,
            update_loadbalancer_host_latency_seconds,
            loadbalancer_sync_total,
            nodesync_error_total,
            registry,
        })
    }

    /// Gather all metrics in Prometheus text format
    pub fn gather(&self) -> crate::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = vec![];
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
