//! Controller configuration
//!
//! Loaded from the YAML file named by `SERVICE_CONTROLLER_CONFIG` when set,
//! then overridden by individual environment variables.

use crate::{ControllerError, Result};
use lb_core::FeatureGates;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "SERVICE_CONTROLLER_CONFIG";
pub const WORKERS_ENV: &str = "SERVICE_CONTROLLER_WORKERS";
pub const CLOUD_PROVIDER_ENV: &str = "SERVICE_CONTROLLER_CLOUD_PROVIDER";
pub const METRICS_ADDR_ENV: &str = "SERVICE_CONTROLLER_METRICS_ADDR";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    /// Number of services allowed to sync concurrently
    pub workers: usize,
    pub cluster_info_namespace: String,
    pub cluster_info_name: String,
    /// Name of a registered provider; there is no default
    pub cloud_provider: String,
    pub metrics_addr: String,
    pub stable_load_balancer_node_set: bool,
    pub service_resync_seconds: u64,
    pub node_resync_seconds: u64,
    pub endpoint_slice_resync_seconds: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            cluster_info_namespace: "kube-system".to_string(),
            cluster_info_name: "icks-cluster-info".to_string(),
            cloud_provider: String::new(),
            metrics_addr: "0.0.0.0:10258".to_string(),
            stable_load_balancer_node_set: true,
            service_resync_seconds: 30,
            node_resync_seconds: 100,
            endpoint_slice_resync_seconds: 900,
        }
    }
}

impl ControllerConfig {
    /// Load from the file named by the environment, apply overrides and validate
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::from_yaml(&contents)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents)
            .map_err(|e| ControllerError::InvalidConfig(format!("invalid configuration file: {e}")))
    }

    /// Apply overrides found through `lookup`, normally the process environment
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(WORKERS_ENV) {
            self.workers = value.parse().map_err(|e| {
                ControllerError::InvalidConfig(format!("Invalid {WORKERS_ENV} value: {e}"))
            })?;
        }

        if let Some(value) = lookup(CLOUD_PROVIDER_ENV) {
            self.cloud_provider = value;
        }

        if let Some(value) = lookup(METRICS_ADDR_ENV) {
            self.metrics_addr = value;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ControllerError::InvalidConfig(
                "workers must be at least 1".to_string(),
            ));
        }
        if self.cloud_provider.is_empty() {
            return Err(ControllerError::InvalidConfig(
                format!("cloud provider must be set (config field cloudProvider or {CLOUD_PROVIDER_ENV})"),
            ));
        }
        self.metrics_socket_addr()?;
        Ok(())
    }

    pub fn metrics_socket_addr(&self) -> Result<SocketAddr> {
        self.metrics_addr.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("Invalid metrics address {:?}: {e}", self.metrics_addr))
        })
    }

    pub fn feature_gates(&self) -> FeatureGates {
        FeatureGates {
            stable_load_balancer_node_set: self.stable_load_balancer_node_set,
        }
    }

    pub fn service_resync_period(&self) -> Duration {
        Duration::from_secs(self.service_resync_seconds)
    }

    pub fn node_resync_period(&self) -> Duration {
        Duration::from_secs(self.node_resync_seconds)
    }

    pub fn endpoint_slice_resync_period(&self) -> Duration {
        Duration::from_secs(self.endpoint_slice_resync_seconds)
    }
}
