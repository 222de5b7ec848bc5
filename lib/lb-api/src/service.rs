//! Service helpers: load-balancer intent, identifiers and status

use crate::meta;
use k8s_openapi::api::core::v1::{LoadBalancerIngress, LoadBalancerStatus, Service};

/// Finalizer that keeps a Service around until its load balancer is gone
pub const LOAD_BALANCER_CLEANUP_FINALIZER: &str = "service.kubernetes.io/load-balancer-cleanup";

/// Annotation holding the provider identifier of the load balancer to ensure
pub const ANNOTATION_LOAD_BALANCER_ID: &str = "inspur.com/load-balancer-id";

/// Annotation holding a previous load balancer identifier that must be torn down
pub const ANNOTATION_LOAD_BALANCER_OLD_ID: &str = "inspur.com/load-balancer-old-id";

pub const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";
pub const EXTERNAL_TRAFFIC_POLICY_LOCAL: &str = "Local";

/// `namespace/name` key used by queues, caches and the tracker
pub fn service_key(service: &Service) -> String {
    let name = service.metadata.name.as_deref().unwrap_or_default();
    match service.metadata.namespace.as_deref() {
        Some(ns) if !ns.is_empty() => format!("{ns}/{name}"),
        _ => name.to_string(),
    }
}

pub fn service_type(service: &Service) -> Option<&str> {
    service.spec.as_ref().and_then(|s| s.type_.as_deref())
}

/// A Service wants a provider load balancer when it is of type LoadBalancer
/// and has not opted into another implementation through loadBalancerClass.
pub fn wants_load_balancer(service: &Service) -> bool {
    match service.spec.as_ref() {
        Some(spec) => {
            spec.type_.as_deref() == Some(SERVICE_TYPE_LOAD_BALANCER)
                && spec.load_balancer_class.is_none()
        }
        None => false,
    }
}

pub fn has_lb_finalizer(service: &Service) -> bool {
    meta::has_finalizer(&service.metadata, LOAD_BALANCER_CLEANUP_FINALIZER)
}

/// Whether the load balancer must be torn down as indicated by the finalizer:
/// the Service is being deleted or is no longer of type LoadBalancer.
pub fn needs_cleanup(service: &Service) -> bool {
    if !has_lb_finalizer(service) {
        return false;
    }
    if meta::is_deleting(&service.metadata) {
        return true;
    }
    service_type(service) != Some(SERVICE_TYPE_LOAD_BALANCER)
}

/// Services the controller has anything to do with
pub fn is_managed(service: &Service) -> bool {
    wants_load_balancer(service) || needs_cleanup(service)
}

/// Pending teardown of a load balancer recorded under the old identifier
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Migration {
    None,
    Pending { old_id: String },
}

/// Both provider identifiers a Service may carry.
///
/// Empty annotation values are treated as absent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoadBalancerIds {
    pub current: Option<String>,
    pub old: Option<String>,
}

impl LoadBalancerIds {
    pub fn from_service(service: &Service) -> Self {
        let read = |key| {
            meta::annotation(&service.metadata, key)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        Self {
            current: read(ANNOTATION_LOAD_BALANCER_ID),
            old: read(ANNOTATION_LOAD_BALANCER_OLD_ID),
        }
    }

    pub fn migration(&self) -> Migration {
        match &self.old {
            Some(old_id) => Migration::Pending {
                old_id: old_id.clone(),
            },
            None => Migration::None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.old.is_none()
    }
}

/// Last published load balancer status, empty when none was published
pub fn load_balancer_status(service: &Service) -> LoadBalancerStatus {
    service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.clone())
        .unwrap_or_default()
}

/// Compare two statuses by ingress ip, hostname and ip mode, in order
pub fn load_balancer_status_equal(l: &LoadBalancerStatus, r: &LoadBalancerStatus) -> bool {
    let empty = Vec::new();
    let lhs = l.ingress.as_ref().unwrap_or(&empty);
    let rhs = r.ingress.as_ref().unwrap_or(&empty);
    lhs.len() == rhs.len() && lhs.iter().zip(rhs).all(|(a, b)| ingress_equal(a, b))
}

fn ingress_equal(lhs: &LoadBalancerIngress, rhs: &LoadBalancerIngress) -> bool {
    lhs.ip == rhs.ip && lhs.hostname == rhs.hostname && lhs.ip_mode == rhs.ip_mode
}
