//! Reconciliation engine building blocks
//!
//! This library provides:
//! - Service state cache and last-synced node tracker
//! - Node eligibility predicates
//! - Rate limited, deduplicating work queues
//! - Classification of cluster notifications into queue keys

pub mod cache;
pub mod error;
pub mod events;
pub mod feature;
pub mod key;
pub mod predicates;
pub mod queue;
pub mod rate_limiter;
pub mod tracker;

pub use cache::{CachedService, ServiceCache};
pub use error::{CoreError, Result};
pub use events::{classify, ClusterEvent, Decision};
pub use feature::FeatureGates;
pub use queue::WorkQueue;
pub use rate_limiter::ExponentialFailureRateLimiter;
pub use tracker::LastSyncedNodes;
