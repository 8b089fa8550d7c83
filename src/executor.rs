//! The retrying executor: turns one logical call into one or more physical
//! attempts.
//!
//! For each attempt the executor copies the caller's request, runs the
//! decorator chain over the copy, sends it through the [`Transport`] and
//! classifies the outcome. Retryable outcomes have their bodies drained and are
//! followed by a cancelable backoff sleep. When attempts run out, the most
//! recent outcome is returned: a retryable response as `Ok`, a transport
//! failure as `Err`.

use std::fmt;
use std::sync::Arc;

use tokio::time::Instant;

use crate::{
    context::{CallContext, RequestContext},
    decorate::DecoratorChain,
    observe::{Logger, NoopLogger, NoopTracer, Tracer},
    request::OutboundRequest,
    retry::{classify, AttemptOutcome, RetryOnTransient, RetryPolicy, RetryPredicate},
    transport::{Transport, TransportError},
    Error, Response, Result,
};

/// Sends requests through a transport, decorating and retrying as configured.
///
/// Without a retry policy every call is a single unconditional send.
///
/// # Examples
///
/// ```no_run
/// use mirako::{CallContext, OutboundRequest, RetryPolicy, RetryingExecutor};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), mirako::Error> {
/// let executor = RetryingExecutor::new(Arc::new(reqwest::Client::new()))
///     .with_retry_policy(RetryPolicy::default());
///
/// let request = OutboundRequest::new(http::Method::GET, "https://mirako.co/v1/status".parse()?);
/// let response = executor.execute(&CallContext::new(), &request).await?;
/// println!("{} after {} attempts", response.status(), response.attempts());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RetryingExecutor {
    transport: Arc<dyn Transport>,
    chain: DecoratorChain,
    retry_policy: Option<RetryPolicy>,
    retry_predicate: Arc<dyn RetryPredicate>,
    logger: Arc<dyn Logger>,
    tracer: Arc<dyn Tracer>,
}

impl fmt::Debug for RetryingExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryingExecutor")
            .field("chain", &self.chain)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl RetryingExecutor {
    /// Creates an executor with no decorators, no retry policy and null observers.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            chain: DecoratorChain::new(),
            retry_policy: None,
            retry_predicate: Arc::new(RetryOnTransient),
            logger: Arc::new(NoopLogger),
            tracer: Arc::new(NoopTracer),
        }
    }

    /// Sets the decorator chain run before every attempt.
    pub fn with_chain(mut self, chain: DecoratorChain) -> Self {
        self.chain = chain;
        self
    }

    /// Enables the retry loop.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Replaces the predicate that decides which outcomes are retried.
    pub fn with_retry_predicate(mut self, predicate: Arc<dyn RetryPredicate>) -> Self {
        self.retry_predicate = predicate;
        self
    }

    /// Sets the logger used for retry messages.
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    /// Sets the tracer notified of every received response.
    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    /// The configured retry policy, if any.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.retry_policy.as_ref()
    }

    /// Executes one logical call.
    ///
    /// # Errors
    ///
    /// - [`Error::DecorationError`] if a decorator rejects the request.
    /// - [`Error::Cancelled`] / [`Error::DeadlineExceeded`] if `ctx` stops the call.
    /// - [`Error::Transport`] if the final attempt got no response.
    ///
    /// Responses with retryable statuses are returned as `Ok` once retries are
    /// exhausted.
    pub async fn execute(&self, ctx: &CallContext, request: &OutboundRequest) -> Result<Response> {
        let started = Instant::now();
        match &self.retry_policy {
            None => self.send_once(ctx, request, started).await,
            Some(policy) => self.send_with_retry(ctx, request, policy, started).await,
        }
    }

    async fn send_once(
        &self,
        ctx: &CallContext,
        request: &OutboundRequest,
        started: Instant,
    ) -> Result<Response> {
        ctx.check()?;
        let attempt_ctx = RequestContext::new(ctx, 1, 1);
        let response = self.attempt(&attempt_ctx, request).await??;
        Ok(response.finish(1, started.elapsed()))
    }

    async fn send_with_retry(
        &self,
        ctx: &CallContext,
        request: &OutboundRequest,
        policy: &RetryPolicy,
        started: Instant,
    ) -> Result<Response> {
        let max_retries = policy.max_retries();
        let max_attempts = policy.max_attempts();
        let mut retry = 0;

        ctx.check()?;

        loop {
            if retry > 0 {
                let delay = policy.delay_for_retry(retry);
                self.logger.log(format_args!(
                    "Retrying request after {:?} (attempt {}/{})",
                    delay, retry, max_retries
                ));
                tracing::info!(
                    delay_ms = delay.as_millis(),
                    retry = retry,
                    max_retries = max_retries,
                    method = %request.method(),
                    url = %request.url(),
                    "Retrying request after delay"
                );
                ctx.sleep(delay).await?;
            }

            let attempt = retry + 1;
            let attempt_ctx = RequestContext::new(ctx, attempt, max_attempts);
            let result = self.attempt(&attempt_ctx, request).await?;

            let failure = match classify(result, self.retry_predicate.as_ref(), attempt) {
                AttemptOutcome::Success(response) => {
                    return Ok(response.finish(attempt, started.elapsed()));
                }
                AttemptOutcome::FatalFailure(error) => {
                    tracing::warn!(
                        error = %error,
                        attempt = attempt,
                        "Transport error is not retryable"
                    );
                    return Err(Error::Transport(error));
                }
                AttemptOutcome::RetryableFailure(failure) => failure,
            };

            if retry >= max_retries {
                tracing::warn!(
                    attempts = attempt,
                    method = %request.method(),
                    url = %request.url(),
                    "Retries exhausted, returning last outcome"
                );
                self.logger
                    .log(format_args!("Giving up after {} attempts", attempt));
                return failure
                    .into_result()
                    .map(|response| response.finish(attempt, started.elapsed()));
            }

            tracing::warn!(failure = ?failure, attempt = attempt, "Request attempt failed");
            ctx.run(failure.release()).await?;
            retry += 1;
        }
    }

    /// Runs one physical attempt.
    ///
    /// The outer `Result` carries fatal errors (decoration, cancellation); the
    /// inner one is the transport's own outcome.
    async fn attempt(
        &self,
        ctx: &RequestContext<'_>,
        request: &OutboundRequest,
    ) -> Result<std::result::Result<Response, TransportError>> {
        let mut outbound = request.clone();
        self.chain.decorate(ctx, &mut outbound)?;

        tracing::debug!(
            method = %outbound.method(),
            url = %outbound.url(),
            attempt = ctx.attempt(),
            "Executing HTTP request"
        );

        let result = ctx.call().run(self.transport.send(&outbound)).await?;

        match &result {
            Ok(response) => {
                tracing::info!(
                    status = response.status().as_u16(),
                    attempt = ctx.attempt(),
                    "Received HTTP response"
                );
                self.tracer.trace_response(ctx, response);
            }
            Err(error) => {
                tracing::debug!(error = %error, attempt = ctx.attempt(), "Transport failed");
            }
        }

        Ok(result)
    }
}
