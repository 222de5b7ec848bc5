//! Service state cache keyed by `namespace/name`

use k8s_openapi::api::core::v1::Service;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Last observed state of a service the controller has synced.
///
/// The cached object is what a later deletion works from when the Service
/// has already disappeared from the cluster.
#[derive(Clone, Debug, Default)]
pub struct CachedService {
    pub state: Option<Arc<Service>>,
}

impl CachedService {
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            state: Some(service),
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.state.as_ref().and_then(|s| s.metadata.uid.as_deref())
    }
}

/// ServiceCache maps service keys to their last synced state
pub struct ServiceCache {
    services: Arc<RwLock<HashMap<String, CachedService>>>,
}

impl ServiceCache {
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, key: &str) -> Option<CachedService> {
        let services = self.services.read().await;
        services.get(key).cloned()
    }

    /// Get the entry for `key`, inserting an empty one if absent
    pub async fn get_or_create(&self, key: &str) -> CachedService {
        let mut services = self.services.write().await;
        services.entry(key.to_string()).or_default().clone()
    }

    pub async fn set(&self, key: &str, service: CachedService) {
        let mut services = self.services.write().await;
        services.insert(key.to_string(), service);
    }

    pub async fn delete(&self, key: &str) {
        let mut services = self.services.write().await;
        if services.remove(key).is_some() {
            debug!("Removed service {} from cache", key);
        }
    }

    pub async fn list_keys(&self) -> Vec<String> {
        let services = self.services.read().await;
        services.keys().cloned().collect()
    }

    /// Every cached service state; entries created but never filled are skipped
    pub async fn all_services(&self) -> Vec<Arc<Service>> {
        let services = self.services.read().await;
        services.values().filter_map(|c| c.state.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        let services = self.services.read().await;
        services.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for ServiceCache {
    fn default() -> Self {
        Self::new()
    }
}
