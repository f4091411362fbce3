//! Bounded retry with exponential backoff, and adapter error normalization.

use std::future::Future;
use std::time::Instant;
use strata_adapters::AdapterError;
use strata_core::{Error, ErrorKind, Result, RetryPolicy};
use tracing::debug;

/// Translate an adapter failure into the shared taxonomy.
pub fn normalize(err: AdapterError) -> Error {
    match err {
        AdapterError::Unavailable { adapter, message } => Error::unavailable(adapter, message),
        AdapterError::NotFound(what) => Error::NotFound(what),
        AdapterError::Conflict(what) => Error::Conflict(what),
        AdapterError::Unknown { adapter, message } => {
            Error::Internal(format!("{}: {}", adapter, message))
        }
    }
}

/// Retries only transient unavailability. Used where a `Conflict` is a real answer.
pub fn unavailable_only(err: &Error) -> bool {
    err.kind() == ErrorKind::Unavailable
}

/// One abstraction's retry loop.
#[derive(Clone, Debug)]
pub struct Retrier {
    component: &'static str,
    policy: RetryPolicy,
}

impl Retrier {
    pub fn new(component: &'static str, policy: RetryPolicy) -> Self {
        Self { component, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Retry anything [`Error::is_retryable`] accepts.
    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.run_with(operation, Error::is_retryable, f).await
    }

    pub async fn run_with<T, F, Fut, P>(&self, operation: &str, retryable: P, mut f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&Error) -> bool,
    {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);

        let attempts = async {
            let mut attempt = 1;
            loop {
                match f().await {
                    Ok(value) => return Ok(value),
                    Err(e) if attempt < max_attempts && retryable(&e) => {
                        let delay = self.policy.backoff_for(attempt);
                        debug!(
                            "{}.{} attempt {}/{} failed ({}), retrying in {:?}",
                            self.component, operation, attempt, max_attempts, e, delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        match self.policy.timeout() {
            Some(limit) => tokio::time::timeout(limit, attempts)
                .await
                .map_err(|_| Error::Timeout {
                    operation: format!("{}.{}", self.component, operation),
                    elapsed_ms: started.elapsed().as_millis() as u64,
                })?,
            None => attempts.await,
        }
    }
}
