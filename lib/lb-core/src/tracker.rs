//! Last node set pushed to the provider for each service

use k8s_openapi::api::core::v1::Node;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// LastSyncedNodes remembers, per service key, the backends of the last
/// update attempt. It is written whether or not the attempt succeeded.
#[derive(Default)]
pub struct LastSyncedNodes {
    nodes: Mutex<HashMap<String, Vec<Arc<Node>>>>,
}

impl LastSyncedNodes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the recorded set for `key`
    pub async fn store(&self, key: &str, nodes: Vec<Arc<Node>>) {
        let mut map = self.nodes.lock().await;
        map.insert(key.to_string(), nodes);
    }

    /// The recorded set for `key`, empty if nothing was recorded yet
    pub async fn get(&self, key: &str) -> Vec<Arc<Node>> {
        let map = self.nodes.lock().await;
        map.get(key).cloned().unwrap_or_default()
    }

    pub async fn forget(&self, key: &str) {
        let mut map = self.nodes.lock().await;
        map.remove(key);
    }
}
