//! Remote operation poller: the single convergence-wait primitive.
//!
//! A [`StateWait`] calls a refresh function until it reports one of the
//! target labels, reports a label that is neither pending nor target, fails,
//! or the timeout elapses. Scaling convergence, asynchronous service-instance
//! operations and the shutdown grace wait are all expressed with it.
//!
//! Time is read from `tokio::time`, so tests running with a paused clock
//! advance through poll intervals instantly.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::debug;

use crate::error::{DeployError, DeployResult};

const LABEL_TRUE: &str = "true";
const LABEL_FALSE: &str = "false";

/// Parameterized wait for a remote state change.
#[derive(Debug, Clone)]
pub struct StateWait {
    operation: String,
    pending: Vec<String>,
    target: Vec<String>,
    timeout: Duration,
    poll_interval: Duration,
    delay: Duration,
}

impl StateWait {
    /// A wait described by `operation` in logs and errors.
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            pending: Vec::new(),
            target: Vec::new(),
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            delay: Duration::ZERO,
        }
    }

    /// A wait on a boolean condition: pending while `false`, done on `true`.
    pub fn condition(operation: impl Into<String>) -> Self {
        Self::new(operation)
            .pending(&[LABEL_FALSE])
            .target(&[LABEL_TRUE])
    }

    pub fn pending(mut self, labels: &[&str]) -> Self {
        self.pending = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn target(mut self, labels: &[&str]) -> Self {
        self.target = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Pause before the first refresh. Counts against the timeout.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Poll `refresh` until it yields a target label.
    ///
    /// `refresh` returns the observed value and its status label. Errors from
    /// `refresh` end the wait immediately.
    pub async fn wait<T, F, Fut>(&self, mut refresh: F) -> DeployResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DeployResult<(T, String)>>,
    {
        let deadline = Instant::now() + self.timeout;
        if !self.delay.is_zero() {
            sleep(self.delay.min(self.timeout)).await;
        }

        let mut polls = 0u32;
        loop {
            let (value, label) = refresh().await?;
            polls += 1;

            if self.target.iter().any(|t| *t == label) {
                debug!(operation = %self.operation, polls, %label, "wait complete");
                return Ok(value);
            }
            if !self.pending.iter().any(|p| *p == label) {
                return Err(DeployError::OperationFailed {
                    operation: self.operation.clone(),
                    reason: format!("unexpected state {label:?}"),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DeployError::Timeout {
                    operation: self.operation.clone(),
                    timeout: self.timeout,
                });
            }
            debug!(operation = %self.operation, polls, %label, "still pending");
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    /// Poll a boolean `check` until it returns true.
    pub async fn until<F, Fut>(&self, mut check: F) -> DeployResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = DeployResult<bool>>,
    {
        self.wait(|| {
            let fut = check();
            async move {
                let done = fut.await?;
                let label = if done { LABEL_TRUE } else { LABEL_FALSE };
                Ok(((), label.to_string()))
            }
        })
        .await
    }
}
