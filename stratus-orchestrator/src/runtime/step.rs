//! Step executor
//!
//! Invokes one action under a [`StepOptions`]: every attempt is bounded by
//! the timeout, retryable failures are retried after the policy's delay, and
//! a cancellation request aborts both the attempt and the wait.

use std::future::Future;

use stratus_core::error::ActionError;
use stratus_core::retry::StepOptions;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct StepExecutor {
    cancel: watch::Receiver<bool>,
}

impl StepExecutor {
    pub fn new(cancel: watch::Receiver<bool>) -> Self {
        Self { cancel }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once cancellation is requested; never resolves otherwise
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        let closed = cancel.wait_for(|requested| *requested).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }

    /// Runs `invoke` until it succeeds, fails for good, or the saga is cancelled
    pub async fn run<T, F, Fut>(
        &self,
        step: &str,
        options: StepOptions,
        invoke: F,
    ) -> Result<T, ActionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        self.execute(step, options, invoke, true).await
    }

    /// Like [`run`](Self::run) but ignores cancellation; used for compensation
    pub async fn run_to_completion<T, F, Fut>(
        &self,
        step: &str,
        options: StepOptions,
        invoke: F,
    ) -> Result<T, ActionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        self.execute(step, options, invoke, false).await
    }

    async fn execute<T, F, Fut>(
        &self,
        step: &str,
        options: StepOptions,
        mut invoke: F,
        cancellable: bool,
    ) -> Result<T, ActionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ActionError>>,
    {
        let max_attempts = options.retry.maximum_attempts;
        let mut attempt = 0;

        loop {
            attempt += 1;

            if cancellable && self.is_cancelled() {
                return Err(cancelled_error(step));
            }

            let call = tokio::time::timeout(options.timeout, invoke());
            let outcome = if cancellable {
                tokio::select! {
                    outcome = call => outcome,
                    _ = self.cancelled() => return Err(cancelled_error(step)),
                }
            } else {
                call.await
            };

            let error = match outcome {
                Ok(Ok(value)) => {
                    if attempt > 1 {
                        debug!("Step '{}' succeeded on attempt {}", step, attempt);
                    }
                    return Ok(value);
                }
                Ok(Err(error)) => error,
                Err(_) => ActionError::timeout(format!(
                    "'{}' did not finish within {}s",
                    step,
                    options.timeout.as_secs_f64()
                )),
            };

            if !error.is_retryable() || !options.retry.should_retry(attempt) {
                return Err(error);
            }

            let delay = options.retry.delay_after(attempt);
            warn!(
                "Step '{}' attempt {}/{} failed: {}; retrying in {:?}",
                step, attempt, max_attempts, error, delay
            );

            if cancellable {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.cancelled() => return Err(cancelled_error(step)),
                }
            } else {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

fn cancelled_error(step: &str) -> ActionError {
    ActionError::cancelled(format!("cancelled during '{}'", step))
}
