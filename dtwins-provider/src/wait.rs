//! Deadline token and the long-running operation waiter.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{AsyncOperation, DigitalTwinsApi, OperationStatus};
use crate::error::{Error, Result, Scope};

/// Absolute deadline plus a cancellation token.
///
/// Every remote call and every poll sleep of one lifecycle operation is raced
/// against it. Expiry or cancellation leaves remote work running.
#[derive(Debug, Clone)]
pub struct Deadline {
    started: Instant,
    at: Instant,
    cancel: CancellationToken,
}

impl Deadline {
    pub fn after(timeout: Duration, cancel: CancellationToken) -> Self {
        let started = Instant::now();
        Self {
            started,
            at: started + timeout,
            cancel,
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Run `fut` unless the deadline passes or the token is cancelled first.
    pub async fn run<F, T>(&self, scope: &Scope, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled { scope: scope.clone() }),
            _ = tokio::time::sleep_until(self.at) => Err(self.expired(scope)),
            out = fut => Ok(out),
        }
    }

    fn expired(&self, scope: &Scope) -> Error {
        Error::Timeout {
            scope: scope.clone(),
            waited: self.elapsed(),
        }
    }
}

/// Delay between status polls.
pub trait PollStrategy: Send + Sync + fmt::Debug {
    /// Delay before poll number `attempt`, starting at 1.
    fn delay(&self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedInterval(pub Duration);

impl PollStrategy for FixedInterval {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    pub initial: Duration,
    pub max: Duration,
    pub factor: u32,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
            factor: 2,
        }
    }
}

impl PollStrategy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        self.initial
            .saturating_mul(self.factor.saturating_pow(exp))
            .min(self.max)
    }
}

/// Polls an [`AsyncOperation`] to a terminal status.
pub struct Waiter<A> {
    api: Arc<A>,
    strategy: Arc<dyn PollStrategy>,
}

impl<A: DigitalTwinsApi> Waiter<A> {
    pub fn new(api: Arc<A>, strategy: Arc<dyn PollStrategy>) -> Self {
        Self { api, strategy }
    }

    /// Block until `operation` is terminal or `deadline` ends.
    ///
    /// Terminal statuses are recorded on the handle, so waiting on an already
    /// finished operation returns the same outcome without polling.
    pub async fn wait(
        &self,
        scope: &Scope,
        operation: &mut AsyncOperation,
        deadline: &Deadline,
    ) -> Result<()> {
        let mut attempt = 0u32;
        loop {
            let retry_after = match operation.status() {
                OperationStatus::Succeeded => return Ok(()),
                OperationStatus::Failed { reason } => {
                    return Err(Error::OperationFailed {
                        scope: scope.clone(),
                        reason: reason.clone(),
                    });
                }
                OperationStatus::InProgress { retry_after } => *retry_after,
            };

            attempt += 1;
            let delay = retry_after.unwrap_or_else(|| self.strategy.delay(attempt));
            // Sleeps past the deadline resolve as a timeout inside `run`
            deadline.run(scope, tokio::time::sleep(delay)).await?;

            debug!(
                reference = operation.reference(),
                attempt,
                kind = ?operation.kind(),
                "Polling operation"
            );
            let status = deadline
                .run(scope, self.api.poll(operation))
                .await?
                .map_err(|source| Error::RemoteQuery {
                    scope: scope.clone(),
                    source,
                })?;
            operation.record(status);
        }
    }
}
