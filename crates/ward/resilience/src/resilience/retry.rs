//! Retry with exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use super::registry::CircuitBreakerRegistry;
use crate::classifier::ErrorClassifier;
use crate::config::RetryConfig;
use crate::error::CallError;
use crate::ledger::ErrorLedger;

/// Ledger source for failures of operations run without a breaker.
pub const UNGUARDED_SOURCE: &str = "retry-executor";

/// Runs operations with bounded retries, optionally through a named breaker.
pub struct RetryExecutor {
    breakers: Arc<CircuitBreakerRegistry>,
    ledger: Arc<ErrorLedger>,
    classifier: Arc<ErrorClassifier>,
}

impl RetryExecutor {
    pub(crate) fn new(
        breakers: Arc<CircuitBreakerRegistry>,
        ledger: Arc<ErrorLedger>,
        classifier: Arc<ErrorClassifier>,
    ) -> Self {
        Self {
            breakers,
            ledger,
            classifier,
        }
    }

    /// Run `op` up to `config.max_retries + 1` times.
    ///
    /// When `breaker` names a breaker (created with defaults if absent) each
    /// attempt goes through it and a [`CallError::CircuitOpen`] ends the call
    /// immediately. Only the last attempt's error is returned.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        mut op: F,
        config: &RetryConfig,
        breaker: Option<&str>,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let breaker = breaker.map(|name| self.breakers.guard(name, None));
        let operation = breaker
            .as_ref()
            .map(|b| b.name().to_string())
            .unwrap_or_else(|| UNGUARDED_SOURCE.to_string());

        let mut retry = 0u32;
        loop {
            let outcome = match &breaker {
                Some(breaker) => breaker.execute(|| op()).await,
                None => match op().await {
                    Ok(value) => Ok(value),
                    Err(error) => {
                        self.ledger
                            .record(self.classifier.classify_failure(&operation, &error));
                        Err(CallError::Operation(error))
                    }
                },
            };

            let error = match outcome {
                Ok(value) => {
                    if retry > 0 {
                        debug!(
                            operation = %operation,
                            attempts = retry + 1,
                            "Operation succeeded after retry"
                        );
                    }
                    return Ok(value);
                }
                Err(e @ CallError::CircuitOpen(_)) => {
                    debug!(operation = %operation, "Circuit open, not retrying");
                    return Err(e);
                }
                Err(e) => e,
            };

            if retry >= config.max_retries {
                warn!(
                    operation = %operation,
                    attempts = retry + 1,
                    error = %error,
                    "Retries exhausted"
                );
                return Err(error);
            }

            let delay = backoff_delay(config, retry);
            debug!(
                operation = %operation,
                retry = retry + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying after failure"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let delay = config.delay_for(retry);
    if config.jitter {
        let factor = rand::thread_rng().gen_range(0.5..=1.0);
        delay.mul_f64(factor)
    } else {
        delay
    }
}
