use std::time::Duration;
use thiserror::Error;

/// Errors returned by provider load balancer calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    /// The provider leaves this service to another implementation; the call
    /// was a no-op and the controller has nothing to record
    #[error("load balancer is implemented elsewhere")]
    ImplementedElsewhere,

    #[error("load balancer not found")]
    NotFound,

    #[error("load balancer conflict: {0}")]
    Conflict(String),

    /// Retry after the given delay without growing the backoff
    #[error("retry requested after {after:?}: {message}")]
    Retry { after: Duration, message: String },

    #[error("provider API error: {0}")]
    Api(String),
}

impl CloudError {
    /// Conflicts are reported either as their own variant or as a provider
    /// message mentioning one
    pub fn is_conflict(&self) -> bool {
        match self {
            CloudError::Conflict(_) => true,
            other => other.to_string().to_ascii_lowercase().contains("conflict"),
        }
    }

    /// Providers without a dedicated variant report absence in the message
    pub fn is_not_found(&self) -> bool {
        match self {
            CloudError::NotFound => true,
            CloudError::Api(message) => message.to_ascii_lowercase().contains("not found"),
            _ => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            CloudError::Retry { after, .. } => Some(*after),
            _ => None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("cloud provider {0:?} was registered twice")]
    Duplicate(String),

    #[error("unknown cloud provider {0:?}")]
    Unknown(String),

    #[error("cloud provider {name:?} could not be initialized: {source}")]
    Init {
        name: String,
        #[source]
        source: CloudError,
    },
}
