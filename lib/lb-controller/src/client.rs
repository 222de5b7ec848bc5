//! Writes to the cluster and cluster info lookups
//!
//! Patches are JSON merge patches (RFC 7386) computed between a stored object
//! and an edited copy of it; only `metadata` and, for Services, `status` are
//! compared. An empty diff sends nothing.
//!
//! Merge patches replace lists such as `metadata.finalizers` whole, so every
//! patch carries the resourceVersion it was computed from. The server answers
//! 409 when the object moved on and the pass is retried from a fresh copy.

use crate::{ControllerError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

const CLUSTER_ID_KEY: &str = "clusterId";
const CNI_KEY: &str = "cni";

/// Contents of the cluster info config map
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterInfo {
    pub cluster_id: Option<String>,
    pub cni: Option<String>,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Patch `metadata` and `status` of `old` to match `new`, returning the
    /// server's copy (or `new` when nothing changed)
    async fn patch_service(&self, old: &Service, new: &Service) -> Result<Service>;

    async fn patch_endpoint_slice(
        &self,
        old: &EndpointSlice,
        new: &EndpointSlice,
    ) -> Result<EndpointSlice>;

    /// `None` when the cluster info config map does not exist
    async fn cluster_info(&self) -> Result<Option<ClusterInfo>>;

    /// The cluster identifier handed to the provider on every call
    async fn cluster_id(&self) -> Result<String> {
        self.cluster_info()
            .await?
            .and_then(|info| info.cluster_id)
            .filter(|id| !id.is_empty())
            .ok_or(ControllerError::ClusterIdMissing)
    }
}

/// ClusterClient backed by the Kubernetes API
pub struct KubeClusterClient {
    client: Client,
    info_namespace: String,
    info_name: String,
}

impl KubeClusterClient {
    pub fn new(client: Client, info_namespace: &str, info_name: &str) -> Self {
        Self {
            client,
            info_namespace: info_namespace.to_string(),
            info_name: info_name.to_string(),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn patch_service(&self, old: &Service, new: &Service) -> Result<Service> {
        let Some(patch) = service_patch(old, new)? else {
            return Ok(new.clone());
        };
        let namespace = old.namespace().unwrap_or_default();
        let name = old.name_any();
        debug!(service = %format!("{}/{}", namespace, name), %patch, "Patching service");

        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace);
        let patched = api
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(patched)
    }

    async fn patch_endpoint_slice(
        &self,
        old: &EndpointSlice,
        new: &EndpointSlice,
    ) -> Result<EndpointSlice> {
        let Some(patch) = endpoint_slice_patch(old, new)? else {
            return Ok(new.clone());
        };
        let namespace = old.namespace().unwrap_or_default();
        let name = old.name_any();
        debug!(endpointslice = %format!("{}/{}", namespace, name), %patch, "Patching endpoint slice");

        let api: Api<EndpointSlice> = Api::namespaced(self.client.clone(), &namespace);
        let patched = api
            .patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(patched)
    }

    async fn cluster_info(&self) -> Result<Option<ClusterInfo>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &self.info_namespace);
        let Some(config_map) = api.get_opt(&self.info_name).await? else {
            return Ok(None);
        };
        let data = config_map.data.unwrap_or_default();
        Ok(Some(ClusterInfo {
            cluster_id: data.get(CLUSTER_ID_KEY).cloned(),
            cni: data.get(CNI_KEY).cloned(),
        }))
    }
}

fn service_patch(old: &Service, new: &Service) -> Result<Option<Value>> {
    let patch = merge_patch_of(&[
        ("metadata", diff_field(&old.metadata, &new.metadata)?),
        ("status", diff_field(&old.status, &new.status)?),
    ]);
    Ok(patch.map(|p| with_resource_version(p, &old.metadata)))
}

fn endpoint_slice_patch(old: &EndpointSlice, new: &EndpointSlice) -> Result<Option<Value>> {
    let patch = merge_patch_of(&[("metadata", diff_field(&old.metadata, &new.metadata)?)]);
    Ok(patch.map(|p| with_resource_version(p, &old.metadata)))
}

/// Pin the patch to the version of the object it was computed from
fn with_resource_version(mut patch: Value, meta: &ObjectMeta) -> Value {
    let Some(version) = meta.resource_version.as_ref() else {
        return patch;
    };
    if let Value::Object(fields) = &mut patch {
        let metadata = fields
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = metadata {
            metadata.insert("resourceVersion".to_string(), Value::String(version.clone()));
        }
    }
    patch
}

fn diff_field<T: Serialize>(old: &T, new: &T) -> Result<Option<Value>> {
    let old = serde_json::to_value(old)?;
    let new = serde_json::to_value(new)?;
    Ok(merge_patch(&old, &new))
}

fn merge_patch_of(fields: &[(&str, Option<Value>)]) -> Option<Value> {
    let patch: Map<String, Value> = fields
        .iter()
        .filter_map(|(name, diff)| diff.clone().map(|d| (name.to_string(), d)))
        .collect();
    (!patch.is_empty()).then_some(Value::Object(patch))
}

/// Merge patch turning `old` into `new`, `None` when they are equal.
///
/// Objects are diffed key by key with removed keys set to null; any other
/// value, arrays included, is replaced whole.
pub fn merge_patch(old: &Value, new: &Value) -> Option<Value> {
    if old == new {
        return None;
    }
    let (Value::Object(old_map), Value::Object(new_map)) = (old, new) else {
        return Some(new.clone());
    };

    let mut patch = Map::new();
    for (key, new_value) in new_map {
        match old_map.get(key) {
            Some(old_value) => {
                if let Some(diff) = merge_patch(old_value, new_value) {
                    patch.insert(key.clone(), diff);
                }
            }
            None => {
                patch.insert(key.clone(), new_value.clone());
            }
        }
    }
    for key in old_map.keys() {
        if !new_map.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }
    Some(Value::Object(patch))
}
