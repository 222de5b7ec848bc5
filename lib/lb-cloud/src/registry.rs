//! Cloud provider registry keyed by provider name

use crate::fake::{FakeCloud, FAKE_PROVIDER_NAME};
use crate::{Cloud, RegistryError};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{info, warn};

/// Builds a provider instance
pub type CloudFactory = fn() -> Result<Arc<dyn Cloud>, crate::CloudError>;

fn providers() -> &'static RwLock<HashMap<String, CloudFactory>> {
    static PROVIDERS: OnceLock<RwLock<HashMap<String, CloudFactory>>> = OnceLock::new();
    PROVIDERS.get_or_init(|| {
        let mut builtin: HashMap<String, CloudFactory> = HashMap::new();
        builtin.insert(FAKE_PROVIDER_NAME.to_string(), fake_factory);
        RwLock::new(builtin)
    })
}

fn fake_factory() -> Result<Arc<dyn Cloud>, crate::CloudError> {
    warn!("Using the in-memory fake provider, no real load balancers will be managed");
    Ok(Arc::new(FakeCloud::new()))
}

/// Make a provider available under `name`
pub fn register_cloud_provider(name: &str, factory: CloudFactory) -> Result<(), RegistryError> {
    let mut registry = providers().write().unwrap_or_else(|e| e.into_inner());
    if registry.contains_key(name) {
        return Err(RegistryError::Duplicate(name.to_string()));
    }
    registry.insert(name.to_string(), factory);
    info!("Registered cloud provider {}", name);
    Ok(())
}

pub fn is_registered(name: &str) -> bool {
    let registry = providers().read().unwrap_or_else(|e| e.into_inner());
    registry.contains_key(name)
}

/// Build the provider registered under `name`
pub fn init_cloud_provider(name: &str) -> Result<Arc<dyn Cloud>, RegistryError> {
    let factory = {
        let registry = providers().read().unwrap_or_else(|e| e.into_inner());
        registry
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::Unknown(name.to_string()))?
    };
    let cloud = factory().map_err(|source| RegistryError::Init {
        name: name.to_string(),
        source,
    })?;
    info!("Initialized cloud provider {}", cloud.provider_name());
    Ok(cloud)
}
