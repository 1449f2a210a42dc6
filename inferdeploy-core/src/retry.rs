//! Bounded exponential backoff for platform calls.
//!
//! Only errors for which [`PlatformError::is_retryable`] holds are retried;
//! structural errors (bad names, missing artifacts, denied permissions)
//! return immediately.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use crate::error::PlatformError;

/// Retry policy applied at the platform adapter boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 disables retrying).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }
}

fn default_max_retries() -> u32 {
    4
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    20_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

/// Execute a platform call, retrying transient failures with backoff.
pub async fn with_retry<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, PlatformError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, PlatformError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                if !e.is_retryable() || attempt >= config.max_retries {
                    if attempt > 0 {
                        tracing::error!(
                            operation = %operation_name,
                            attempts = attempt + 1,
                            error = %e,
                            "Platform call failed after retries"
                        );
                    }
                    return Err(e);
                }

                let backoff_ms = compute_backoff(config, attempt, &e);
                tracing::warn!(
                    operation = %operation_name,
                    attempt = attempt + 1,
                    max = config.max_retries,
                    backoff_ms = backoff_ms,
                    error = %e,
                    "Retrying after transient platform error"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}

/// Backoff for `attempt`, respecting a server-provided retry-after.
fn compute_backoff(config: &RetryConfig, attempt: u32, err: &PlatformError) -> u64 {
    let computed = compute_exponential_backoff(config, attempt);
    match err {
        PlatformError::Throttled {
            retry_after_secs: Some(secs),
            ..
        } => (secs * 1000).min(config.max_backoff_ms).max(computed),
        _ => computed,
    }
}

fn compute_exponential_backoff(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config.initial_backoff_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_backoff_ms as f64) as u64;
    if config.jitter {
        let jitter = (capped as f64 * 0.25 * rand::thread_rng().gen_range(0.0..1.0)) as u64;
        capped + jitter
    } else {
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ResourceKind;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            max_backoff_ms: 5,
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    fn throttled() -> PlatformError {
        PlatformError::Throttled {
            message: "Rate exceeded".into(),
            retry_after_secs: None,
        }
    }

    #[test]
    fn test_compute_backoff_exponential() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(compute_exponential_backoff(&config, 0), 500);
        assert_eq!(compute_exponential_backoff(&config, 1), 1000);
        assert_eq!(compute_exponential_backoff(&config, 2), 2000);
    }

    #[test]
    fn test_compute_backoff_respects_cap() {
        let config = RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 3000,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        assert_eq!(compute_exponential_backoff(&config, 2), 3000);
        assert_eq!(compute_exponential_backoff(&config, 10), 3000);
    }

    #[test]
    fn test_retry_after_is_honoured_but_capped() {
        let config = RetryConfig {
            jitter: false,
            ..Default::default()
        };
        let err = PlatformError::Throttled {
            message: "slow down".into(),
            retry_after_secs: Some(3),
        };
        assert_eq!(compute_backoff(&config, 0, &err), 3000);

        let err = PlatformError::Throttled {
            message: "slow down".into(),
            retry_after_secs: Some(3600),
        };
        assert_eq!(compute_backoff(&config, 0, &err), config.max_backoff_ms);
    }

    #[tokio::test]
    async fn test_succeeds_after_throttling() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result = with_retry(&fast_config(3), "DescribeEndpoint", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(throttled())
                } else {
                    Ok("InService")
                }
            }
        })
        .await;
        assert_eq!(result, Ok("InService"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = with_retry(&fast_config(2), "CreateEndpoint", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(throttled())
            }
        })
        .await;
        assert!(matches!(result, Err(PlatformError::Throttled { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_structural_error_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let result: Result<(), _> = with_retry(&fast_config(5), "DeleteEndpointConfig", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::not_found(
                    ResourceKind::EndpointConfig,
                    "Could not find endpoint configuration",
                ))
            }
        })
        .await;
        assert!(result.unwrap_err().is_not_found());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    proptest! {
        #[test]
        fn prop_backoff_never_exceeds_cap_plus_jitter(
            attempt in 0u32..40,
            initial in 1u64..5_000,
            cap in 1u64..120_000,
        ) {
            let config = RetryConfig {
                max_retries: 10,
                initial_backoff_ms: initial,
                max_backoff_ms: cap,
                backoff_multiplier: 2.0,
                jitter: true,
            };
            let delay = compute_exponential_backoff(&config, attempt);
            prop_assert!(delay <= cap + cap / 4);
        }
    }
}
