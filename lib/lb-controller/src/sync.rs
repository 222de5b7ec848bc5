//! Load balancer lifecycle for a single service
//!
//! A pass either ensures the load balancer named by the current identifier
//! annotation or, once the service no longer wants one, deletes every load
//! balancer it references. A load balancer named by the old identifier is
//! always deleted and the annotation dropped afterwards.
//!
//! Finalizers are added to the service and its endpoint slices before any
//! provider call so an interrupted pass can be resumed, and are only removed
//! once the provider side is gone.

use crate::controller::Context;
use crate::recorder::{actions, reasons};
use crate::{ControllerError, Result};
use k8s_openapi::api::core::v1::{LoadBalancerStatus, Service, ServiceStatus};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::runtime::events::EventType;
use kube::Resource;
use lb_api::service::{self, LoadBalancerIds, Migration};
use lb_api::{endpoint_slice, meta};
use lb_cloud::CloudError;
use lb_core::key::split_key;
use lb_core::CachedService;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// What a pass did to the provider load balancer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadBalancerOperation {
    Delete,
    Ensure,
}

impl Context {
    /// Reconcile the service stored under `key`
    pub async fn sync_service(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        let (namespace, name) = split_key(key)?;
        let cluster = self.cluster.cluster_id().await?;

        let result = match self.stores.service(namespace.unwrap_or_default(), name) {
            None => self.process_service_deletion(&cluster, key).await,
            Some(svc) => {
                let slices = self
                    .stores
                    .endpoint_slices_for(namespace.unwrap_or_default(), name);
                self.process_service_create_or_update(&cluster, svc, key, &slices)
                    .await
            }
        };
        debug!(%key, elapsed = ?start.elapsed(), "Finished syncing service");
        result
    }

    /// The service is gone from the cluster; clean up what the cache remembers
    async fn process_service_deletion(&self, cluster: &str, key: &str) -> Result<()> {
        let Some(cached) = self.cache.get(key).await else {
            return Ok(());
        };
        if let Some(state) = cached.state.as_deref() {
            info!(%key, "Service has been deleted, cleaning up load balancer resources");
            self.delete_referenced_load_balancers(cluster, state).await?;
        }
        self.forget_service(key).await;
        Ok(())
    }

    async fn process_service_create_or_update(
        &self,
        cluster: &str,
        svc: Arc<Service>,
        key: &str,
        slices: &[Arc<EndpointSlice>],
    ) -> Result<()> {
        let cached = self.cache.get_or_create(key).await;
        if let Some(stale) = cached.state.as_deref() {
            if stale.metadata.uid != svc.metadata.uid {
                info!(%key, "Service was re-created, deleting load balancers of the previous instance");
                self.delete_referenced_load_balancers(cluster, stale).await?;
            }
        }
        // A later deletion works from the cached copy
        self.cache.set(key, CachedService::new(svc.clone())).await;

        match self.sync_load_balancer_if_needed(cluster, &svc, key, slices).await {
            Ok(LoadBalancerOperation::Delete) => {
                self.forget_service(key).await;
                Ok(())
            }
            Ok(LoadBalancerOperation::Ensure) => Ok(()),
            Err(e) => {
                self.record(
                    &svc,
                    EventType::Warning,
                    reasons::SYNC_LOAD_BALANCER_FAILED,
                    actions::SYNC_LOAD_BALANCER,
                    format!("Error syncing load balancer: {e}"),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn forget_service(&self, key: &str) {
        self.cache.delete(key).await;
        self.last_synced.forget(key).await;
    }

    /// Delete the load balancers named by both identifier annotations
    async fn delete_referenced_load_balancers(&self, cluster: &str, svc: &Service) -> Result<()> {
        let ids = LoadBalancerIds::from_service(svc);
        if let Some(id) = ids.current.as_deref() {
            self.delete_load_balancer(cluster, svc, id).await?;
        }
        if let Some(id) = ids.old.as_deref() {
            self.delete_load_balancer(cluster, svc, id).await?;
        }
        Ok(())
    }

    async fn delete_load_balancer(&self, cluster: &str, svc: &Service, lb_id: &str) -> Result<()> {
        match self.balancer.ensure_load_balancer_deleted(cluster, svc, lb_id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(%lb_id, "Load balancer already deleted");
                Ok(())
            }
            Err(e) => {
                self.record(
                    svc,
                    EventType::Warning,
                    reasons::DELETE_LOAD_BALANCER_FAILED,
                    actions::DELETE_LOAD_BALANCER,
                    format!("Error deleting load balancer: {e}"),
                )
                .await;
                Err(e.into())
            }
        }
    }

    async fn sync_load_balancer_if_needed(
        &self,
        cluster: &str,
        svc: &Service,
        key: &str,
        slices: &[Arc<EndpointSlice>],
    ) -> Result<LoadBalancerOperation> {
        let previous_status = service::load_balancer_status(svc);
        let ids = LoadBalancerIds::from_service(svc);
        let deleting = meta::is_deleting(&svc.metadata);
        let mut working = svc.clone();
        let mut new_status: Option<LoadBalancerStatus> = None;

        let op = if !service::wants_load_balancer(svc) || service::needs_cleanup(svc) {
            LoadBalancerOperation::Delete
        } else {
            LoadBalancerOperation::Ensure
        };

        match op {
            // The finalizer goes on before any provider call, so without it
            // there is no load balancer of ours to tear down
            LoadBalancerOperation::Delete if !service::has_lb_finalizer(svc) => {
                debug!(%key, "Service has no load balancer finalizer, skipping provider cleanup");
            }
            LoadBalancerOperation::Delete => {
                info!(%key, "Deleting load balancer");
                new_status = Some(LoadBalancerStatus::default());
                if let Some(id) = ids.old.as_deref() {
                    self.delete_load_balancer(cluster, svc, id).await?;
                }
                if let Some(id) = ids.current.as_deref() {
                    self.delete_load_balancer(cluster, svc, id).await?;
                }

                if service::needs_cleanup(svc) {
                    working = self
                        .patch_service(working, |s| {
                            meta::remove_finalizer(&mut s.metadata, service::LOAD_BALANCER_CLEANUP_FINALIZER)
                        })
                        .await?;
                }
                if !deleting {
                    working = self
                        .patch_service(working, |s| {
                            meta::remove_annotation(&mut s.metadata, service::ANNOTATION_LOAD_BALANCER_ID)
                        })
                        .await?;
                }
                self.record(
                    svc,
                    EventType::Normal,
                    reasons::DELETED_LOAD_BALANCER,
                    actions::DELETE_LOAD_BALANCER,
                    "Deleted load balancer".to_string(),
                )
                .await;
            }
            LoadBalancerOperation::Ensure => {
                info!(%key, "Ensuring load balancer");
                working = self
                    .patch_service(working, |s| {
                        meta::add_finalizer(&mut s.metadata, service::LOAD_BALANCER_CLEANUP_FINALIZER)
                    })
                    .await?;
                for eps in slices {
                    self.patch_endpoint_slice(eps, |e| {
                        meta::add_finalizer(&mut e.metadata, endpoint_slice::LOAD_BALANCER_CLEANUP_FINALIZER)
                    })
                    .await?;
                }

                if let Migration::Pending { old_id } = ids.migration() {
                    info!(%key, %old_id, "Deleting load balancer recorded under the old identifier");
                    let deleted = self.delete_load_balancer(cluster, svc, &old_id).await;
                    new_status = Some(LoadBalancerStatus::default());
                    deleted?;
                }

                if let Some(id) = ids.current.as_deref() {
                    let endpoint_slices: Vec<EndpointSlice> =
                        slices.iter().map(|eps| (**eps).clone()).collect();
                    match self
                        .balancer
                        .ensure_load_balancer(cluster, &working, None, &endpoint_slices, id)
                        .await
                    {
                        Ok(Some(status)) => new_status = Some(status),
                        Ok(None) => return Err(ControllerError::EmptyLoadBalancerStatus),
                        Err(CloudError::ImplementedElsewhere) => {
                            debug!(%key, provider = %self.provider_name, "Load balancer is implemented by a different controller");
                            return Ok(op);
                        }
                        Err(e) if e.is_conflict() => {
                            self.record(
                                svc,
                                EventType::Warning,
                                reasons::CONFLICT,
                                actions::SYNC_LOAD_BALANCER,
                                e.to_string().to_lowercase(),
                            )
                            .await;
                            return Ok(op);
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
            }
        }

        for eps in slices.iter().filter(|eps| endpoint_slice::needs_cleanup(eps)) {
            self.patch_endpoint_slice(eps, |e| {
                meta::remove_finalizer(&mut e.metadata, endpoint_slice::LOAD_BALANCER_CLEANUP_FINALIZER)
            })
            .await?;
        }

        if !deleting {
            working = self
                .patch_service(working, |s| {
                    meta::remove_annotation(&mut s.metadata, service::ANNOTATION_LOAD_BALANCER_OLD_ID)
                })
                .await?;
        }

        if let Some(status) = new_status {
            if !service::load_balancer_status_equal(&previous_status, &status) {
                debug!(%key, ?previous_status, new_status = ?status, "Updating load balancer status");
                let patched = self
                    .patch_service(working, |s| {
                        s.status
                            .get_or_insert_with(ServiceStatus::default)
                            .load_balancer = Some(status);
                        true
                    })
                    .await;
                match patched {
                    Ok(_) => {}
                    // The service can disappear right after its finalizer is removed
                    Err(e) if e.is_not_found() => debug!(%key, "Service gone before status update"),
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(op)
    }

    /// Patch `current` with the edits made by `edit`, returning the server copy.
    /// Nothing is sent when `edit` reports no change.
    async fn patch_service<F>(&self, current: Service, edit: F) -> Result<Service>
    where
        F: FnOnce(&mut Service) -> bool,
    {
        let mut updated = current.clone();
        if !edit(&mut updated) {
            return Ok(current);
        }
        self.cluster.patch_service(&current, &updated).await
    }

    async fn patch_endpoint_slice<F>(&self, current: &EndpointSlice, edit: F) -> Result<()>
    where
        F: FnOnce(&mut EndpointSlice) -> bool,
    {
        let mut updated = current.clone();
        if !edit(&mut updated) {
            return Ok(());
        }
        self.cluster.patch_endpoint_slice(current, &updated).await?;
        Ok(())
    }

    pub(crate) async fn record(
        &self,
        svc: &Service,
        type_: EventType,
        reason: &str,
        action: &str,
        message: String,
    ) {
        self.recorder
            .record(&svc.object_ref(&()), type_, reason, action, message)
            .await;
    }
}
