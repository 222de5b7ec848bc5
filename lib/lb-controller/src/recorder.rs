//! Kubernetes Event recording
//!
//! Thin wrapper over `kube::runtime::events::Recorder`. Events are
//! fire-and-forget: a failed write is logged and never affects
//! reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use lb_api::CONTROLLER_NAME;
use tracing::warn;

/// Event reasons shown under REASON in `kubectl get events`
pub mod reasons {
    pub const DELETED_LOAD_BALANCER: &str = "DeletedLoadBalancer";
    pub const DELETE_LOAD_BALANCER_FAILED: &str = "DeleteLoadBalancerFailed";
    pub const SYNC_LOAD_BALANCER_FAILED: &str = "SyncLoadBalancerFailed";
    pub const UPDATED_LOAD_BALANCER: &str = "UpdatedLoadBalancer";
    pub const UPDATE_LOAD_BALANCER_FAILED: &str = "UpdateLoadBalancerFailed";
    pub const UNAVAILABLE_LOAD_BALANCER: &str = "UnAvailableLoadBalancer";
    /// Provider reported a conflicting load balancer configuration
    pub const CONFLICT: &str = "conflict";
}

/// What the controller was doing when the event happened
pub mod actions {
    pub const SYNC_LOAD_BALANCER: &str = "SyncLoadBalancer";
    pub const DELETE_LOAD_BALANCER: &str = "DeleteLoadBalancer";
    pub const UPDATE_HOSTS: &str = "UpdateHosts";
}

#[async_trait]
pub trait EventRecorder: Send + Sync {
    async fn record(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        message: String,
    );
}

/// Publishes events through the kube runtime recorder
pub struct KubeEventRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeEventRecorder {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: CONTROLLER_NAME.to_string(),
                instance: None,
            },
        }
    }
}

#[async_trait]
impl EventRecorder for KubeEventRecorder {
    async fn record(
        &self,
        object: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        message: String,
    ) {
        let recorder = Recorder::new(self.client.clone(), self.reporter.clone(), object.clone());
        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message),
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(
                reason,
                action,
                object = ?object.name,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Drops every event
pub struct NoopEventRecorder;

#[async_trait]
impl EventRecorder for NoopEventRecorder {
    async fn record(
        &self,
        _object: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _message: String,
    ) {
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorders_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KubeEventRecorder>();
        assert_send_sync::<NoopEventRecorder>();
    }

    #[tokio::test]
    async fn test_noop_recorder_accepts_runtime_event_types() {
        let recorder: &dyn EventRecorder = &NoopEventRecorder;
        recorder
            .record(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::SYNC_LOAD_BALANCER_FAILED,
                actions::SYNC_LOAD_BALANCER,
                "boom".to_string(),
            )
            .await;
    }
}
