//! EndpointSlice helpers

use crate::meta;
use k8s_openapi::api::discovery::v1::EndpointSlice;

/// Label linking an EndpointSlice to the Service it backs
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

/// Finalizer keeping an EndpointSlice until the load balancer stops using it
pub const LOAD_BALANCER_CLEANUP_FINALIZER: &str = "endpointslice.kubernetes.io/load-balancer-cleanup";

pub const ADDRESS_TYPE_IPV4: &str = "IPv4";
pub const ADDRESS_TYPE_IPV6: &str = "IPv6";

/// Name of the owning Service, if the slice is labelled with a non-empty one
pub fn owning_service(eps: &EndpointSlice) -> Option<&str> {
    eps.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(SERVICE_NAME_LABEL))
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}

pub fn supports_ip_protocol(eps: &EndpointSlice) -> bool {
    eps.address_type == ADDRESS_TYPE_IPV4 || eps.address_type == ADDRESS_TYPE_IPV6
}

pub fn has_lb_finalizer(eps: &EndpointSlice) -> bool {
    meta::has_finalizer(&eps.metadata, LOAD_BALANCER_CLEANUP_FINALIZER)
}

/// A slice holding our finalizer that is being deleted must be released
pub fn needs_cleanup(eps: &EndpointSlice) -> bool {
    has_lb_finalizer(eps) && meta::is_deleting(&eps.metadata)
}

/// Whether a change to the slice affects load balancer membership.
///
/// Slices of other address families never matter; otherwise any change of
/// address type, ports or endpoints does.
pub fn needs_update(old: &EndpointSlice, new: &EndpointSlice) -> bool {
    if !supports_ip_protocol(old) && !supports_ip_protocol(new) {
        return false;
    }
    old.address_type != new.address_type || old.ports != new.ports || old.endpoints != new.endpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::discovery::v1::Endpoint;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use std::collections::BTreeMap;

    fn eps(address_type: &str, addresses: &[&str]) -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some("web-abc".to_string()),
                namespace: Some("default".to_string()),
                labels: Some(BTreeMap::from([(SERVICE_NAME_LABEL.to_string(), "web".to_string())])),
                ..Default::default()
            },
            address_type: address_type.to_string(),
            endpoints: vec![Endpoint {
                addresses: addresses.iter().map(|a| a.to_string()).collect(),
                ..Default::default()
            }],
            ports: None,
        }
    }

    #[test]
    fn test_owning_service() {
        let mut slice = eps(ADDRESS_TYPE_IPV4, &["10.0.0.1"]);
        assert_eq!(owning_service(&slice), Some("web"));

        slice.metadata.labels = Some(BTreeMap::from([(SERVICE_NAME_LABEL.to_string(), String::new())]));
        assert_eq!(owning_service(&slice), None);
    }

    #[test]
    fn test_needs_update() {
        let old = eps(ADDRESS_TYPE_IPV4, &["10.0.0.1"]);
        assert!(!needs_update(&old, &old.clone()));
        assert!(needs_update(&old, &eps(ADDRESS_TYPE_IPV4, &["10.0.0.2"])));

        let fqdn_old = eps("FQDN", &["a.example.com"]);
        let fqdn_new = eps("FQDN", &["b.example.com"]);
        assert!(!needs_update(&fqdn_old, &fqdn_new));
    }

    #[test]
    fn test_needs_cleanup_requires_finalizer_and_deletion() {
        let mut slice = eps(ADDRESS_TYPE_IPV6, &["fd00::1"]);
        slice.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(!needs_cleanup(&slice));

        slice.metadata.finalizers = Some(vec![LOAD_BALANCER_CLEANUP_FINALIZER.to_string()]);
        assert!(needs_cleanup(&slice));
    }
}
