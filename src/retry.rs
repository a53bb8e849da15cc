//! Retry utilities with bounded exponential backoff and jitter.
//!
//! Reconcile passes call the API server for reference lookups and child
//! resource writes. Those calls can fail transiently (write conflicts, a
//! just-created object not visible yet, throttling). Each call site wraps its
//! unit of work in [`retry_with_backoff_if`] with a bounded [`RetryConfig`];
//! exhausting the bound surfaces as a `False` condition on the MCPServer and
//! the next watch event or requeue starts a fresh pass.
//!
//! # Example
//!
//! ```ignore
//! use mcp_operator::retry::{retry_with_backoff_if, RetryConfig};
//!
//! let keys = retry_with_backoff_if(
//!     &RetryConfig::default(),
//!     "get_secret",
//!     Error::is_transient,
//!     || lookup.secret_keys("default", "api-token"),
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

/// Bounded retry policy for operations that may fail transiently.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one (minimum 1)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }

    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self::with_max_attempts(1)
    }
}

/// Execute an async operation, retrying only errors `is_retryable` accepts.
///
/// A non-retryable error is returned immediately. A retryable error is
/// retried with exponential backoff (jittered 0.5x to 1.5x) until
/// `max_attempts` is reached, then the last error is returned.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !is_retryable(&e) {
                    return Err(e);
                }

                if attempt >= max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                // Add jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}
