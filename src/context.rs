//! Caller-side call context: cancellation and deadlines.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Per-call context supplied by the caller.
///
/// Cancelling the token or passing the deadline stops the call at the next
/// suspension point (a send or a backoff sleep) with [`Error::Cancelled`] or
/// [`Error::DeadlineExceeded`].
///
/// # Examples
///
/// ```no_run
/// use mirako::{CallContext, Client};
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), mirako::Error> {
/// let client = Client::builder().api_key("my-key").build()?;
/// let token = CancellationToken::new();
/// let ctx = CallContext::with_cancellation(token.clone()).with_timeout(Duration::from_secs(10));
///
/// let request = client.request(http::Method::GET, "/v1/avatar/status");
/// let response = client.execute_with(&ctx, &request).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context cancelled through `token`.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancel: token,
            deadline: None,
        }
    }

    /// Sets an absolute deadline for the whole call, retries included.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Sets a deadline `timeout` from now.
    ///
    /// A timeout too large to represent leaves the call without a deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.with_deadline(deadline),
            None => self,
        }
    }

    /// The token observed by this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns `true` once the token has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fails if the call has already been cancelled or its deadline has passed.
    pub(crate) fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(Error::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    /// Drives `fut` to completion unless the call is cancelled or times out first.
    pub(crate) async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            _ = wait_for(self.deadline) => Err(Error::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }

    /// Sleeps for `duration`, waking early with an error on cancellation.
    pub(crate) async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(tokio::time::sleep(duration)).await
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// The view of a single physical attempt handed to decorators and tracers.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    call: &'a CallContext,
    attempt: usize,
    max_attempts: usize,
}

impl<'a> RequestContext<'a> {
    pub(crate) fn new(call: &'a CallContext, attempt: usize, max_attempts: usize) -> Self {
        Self {
            call,
            attempt,
            max_attempts,
        }
    }

    /// The caller's context for the whole logical call.
    pub fn call(&self) -> &'a CallContext {
        self.call
    }

    /// The 1-based number of this attempt.
    pub fn attempt(&self) -> usize {
        self.attempt
    }

    /// The most attempts this call can make.
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Returns `true` for every attempt after the first.
    pub fn is_retry(&self) -> bool {
        self.attempt > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes_without_cancellation() {
        let ctx = CallContext::new();
        let start = Instant::now();
        ctx.sleep(Duration::from_secs(5)).await.unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_cancellation() {
        let token = CancellationToken::new();
        let ctx = CallContext::with_cancellation(token.clone());

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let start = Instant::now();
        let result = ctx.sleep(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted_by_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::from_secs(2));
        let result = ctx.sleep(Duration::from_secs(30)).await;
        assert!(matches!(result, Err(Error::DeadlineExceeded)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_timeout_means_no_deadline() {
        let ctx = CallContext::new().with_timeout(Duration::MAX);
        assert_eq!(ctx.deadline(), None);
        assert!(ctx.check().is_ok());

        let ctx = CallContext::new().with_timeout(Duration::from_secs(1));
        assert!(ctx.deadline().is_some());
    }

    #[tokio::test]
    async fn test_check_reports_cancellation_first() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = CallContext::with_cancellation(token).with_deadline(Instant::now());
        assert!(matches!(ctx.check(), Err(Error::Cancelled)));
        assert!(CallContext::new().check().is_ok());
    }

    #[test]
    fn test_request_context_attempts() {
        let call = CallContext::new();
        let first = RequestContext::new(&call, 1, 4);
        let third = RequestContext::new(&call, 3, 4);
        assert!(!first.is_retry());
        assert!(third.is_retry());
        assert_eq!(third.max_attempts(), 4);
    }
}
