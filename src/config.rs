//! Operator configuration
//!
//! Values here are process-wide and come from CLI flags or environment
//! variables (see `main.rs`). Tests build them with [`OperatorConfig::default`].

use std::time::Duration;

use crate::retry::RetryConfig;
use crate::DEFAULT_TRANSPORT_ADAPTER_IMAGE;

/// How long to wait before the next pass, per pipeline outcome
#[derive(Clone, Debug, PartialEq)]
pub struct RequeuePolicy {
    /// References could not be resolved
    pub refs_failed: Duration,
    /// A child resource could not be applied
    pub apply_failed: Duration,
    /// Children applied but pods are not available
    pub not_ready: Duration,
    /// Everything ready; periodic drift check
    pub ready: Duration,
}

impl Default for RequeuePolicy {
    fn default() -> Self {
        Self {
            refs_failed: Duration::from_secs(30),
            apply_failed: Duration::from_secs(15),
            not_ready: Duration::from_secs(10),
            ready: Duration::from_secs(300),
        }
    }
}

/// Configuration shared by all reconcile passes
#[derive(Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Image of the init container that carries the stdio transport adapter
    pub transport_adapter_image: String,
    /// Retry bound for reference lookups and child writes
    pub retry: RetryConfig,
    /// Requeue intervals
    pub requeue: RequeuePolicy,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            transport_adapter_image: DEFAULT_TRANSPORT_ADAPTER_IMAGE.to_string(),
            retry: RetryConfig::default(),
            requeue: RequeuePolicy::default(),
        }
    }
}

impl OperatorConfig {
    /// Override the transport adapter image
    pub fn with_transport_adapter_image(mut self, image: impl Into<String>) -> Self {
        self.transport_adapter_image = image.into();
        self
    }

    /// Override the retry bound
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
