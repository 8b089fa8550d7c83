//! Retry policy, backoff computation and attempt classification.
//!
//! A [`RetryPolicy`] says how many times to retry and how long to wait between
//! attempts. A [`RetryPredicate`] says which outcomes are worth retrying.
//! [`classify`] combines the two into an [`AttemptOutcome`] for each attempt.

use std::time::Duration;

use http::StatusCode;
use rand::Rng;

use crate::{transport::TransportError, Error, Response, Result};

/// Exponential backoff settings, fixed at client construction.
///
/// The k-th retry (k ≥ 1) waits `min(max_backoff, initial_backoff * backoff_factor^(k-1))`.
///
/// # Examples
///
/// ```
/// use mirako::RetryPolicy;
/// use std::time::Duration;
///
/// // 3 retries, 1s, 2s, 4s ... capped at 30s
/// let default = RetryPolicy::default();
/// assert_eq!(default.max_retries(), 3);
/// assert_eq!(default.backoff(3), Duration::from_secs(4));
///
/// let quick = RetryPolicy::builder()
///     .max_retries(5)
///     .initial_backoff(Duration::from_millis(100))
///     .max_backoff(Duration::from_secs(2))
///     .build()
///     .unwrap();
/// assert_eq!(quick.backoff(10), Duration::from_secs(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: usize,
    initial_backoff: Duration,
    max_backoff: Duration,
    backoff_factor: f64,
    jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// Creates a validated policy without jitter.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if `initial_backoff` is zero,
    /// `max_backoff < initial_backoff`, or `backoff_factor` is not a finite
    /// number ≥ 1.0.
    pub fn new(
        max_retries: usize,
        initial_backoff: Duration,
        max_backoff: Duration,
        backoff_factor: f64,
    ) -> Result<Self> {
        let policy = Self {
            max_retries,
            initial_backoff,
            max_backoff,
            backoff_factor,
            jitter: false,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// Creates a builder starting from the defaults.
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::default()
    }

    fn validate(&self) -> Result<()> {
        if self.initial_backoff.is_zero() {
            return Err(Error::ConfigurationError(
                "initial backoff must be greater than zero".to_string(),
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(Error::ConfigurationError(format!(
                "max backoff ({:?}) must not be less than initial backoff ({:?})",
                self.max_backoff, self.initial_backoff
            )));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::ConfigurationError(format!(
                "backoff factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(())
    }

    /// Maximum number of retries after the first attempt.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    /// Maximum number of physical attempts (`max_retries + 1`).
    pub fn max_attempts(&self) -> usize {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the first retry.
    pub fn initial_backoff(&self) -> Duration {
        self.initial_backoff
    }

    /// Upper bound on any single delay.
    pub fn max_backoff(&self) -> Duration {
        self.max_backoff
    }

    /// Growth factor between consecutive delays.
    pub fn backoff_factor(&self) -> f64 {
        self.backoff_factor
    }

    /// Whether delays are randomized.
    pub fn jitter(&self) -> bool {
        self.jitter
    }

    /// Returns the un-jittered delay before the given retry.
    ///
    /// `retry` is 1-based: 1 is the first retry. Returns zero for `0`. The
    /// result is clamped to [`max_backoff`](Self::max_backoff) and never
    /// overflows, whatever the retry number.
    pub fn backoff(&self, retry: usize) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(retry - 1).unwrap_or(i32::MAX);
        let nanos = self.initial_backoff.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        let max_nanos = self.max_backoff.as_nanos() as f64;

        if !nanos.is_finite() || nanos >= max_nanos {
            self.max_backoff
        } else {
            Duration::from_nanos(nanos.round() as u64)
        }
    }

    /// Returns the delay the executor actually waits before the given retry.
    ///
    /// With jitter enabled this is a random value between 50% and 100% of
    /// [`backoff`](Self::backoff); otherwise it is exactly `backoff`.
    pub fn delay_for_retry(&self, retry: usize) -> Duration {
        let delay = self.backoff(retry);
        if self.jitter {
            let jitter_factor = rand::thread_rng().gen_range(0.5..=1.0);
            delay.mul_f64(jitter_factor).min(self.max_backoff)
        } else {
            delay
        }
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    max_retries: Option<usize>,
    initial_backoff: Option<Duration>,
    max_backoff: Option<Duration>,
    backoff_factor: Option<f64>,
    jitter: Option<bool>,
}

impl RetryPolicyBuilder {
    /// Sets the maximum number of retries.
    pub fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    /// Sets the delay before the first retry.
    pub fn initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = Some(initial_backoff);
        self
    }

    /// Sets the cap on any single delay.
    pub fn max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = Some(max_backoff);
        self
    }

    /// Sets the growth factor between delays.
    pub fn backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = Some(backoff_factor);
        self
    }

    /// Enables random jitter (50%–100% of each delay).
    pub fn jitter(mut self, jitter: bool) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Builds and validates the policy.
    ///
    /// # Errors
    ///
    /// See [`RetryPolicy::new`].
    pub fn build(self) -> Result<RetryPolicy> {
        let default = RetryPolicy::default();
        let policy = RetryPolicy {
            max_retries: self.max_retries.unwrap_or(default.max_retries),
            initial_backoff: self.initial_backoff.unwrap_or(default.initial_backoff),
            max_backoff: self.max_backoff.unwrap_or(default.max_backoff),
            backoff_factor: self.backoff_factor.unwrap_or(default.backoff_factor),
            jitter: self.jitter.unwrap_or(default.jitter),
        };
        policy.validate()?;
        Ok(policy)
    }
}

/// Returns `true` for statuses treated as transient: 429 and 500–599.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Decides whether an attempt's outcome is worth retrying.
///
/// `attempt` is the 1-based number of the attempt that produced the outcome.
///
/// # Examples
///
/// ```
/// use http::StatusCode;
/// use mirako::RetryPredicate;
///
/// /// Only retry 503s.
/// struct RetryOn503;
///
/// impl RetryPredicate for RetryOn503 {
///     fn should_retry_status(&self, status: StatusCode, _attempt: usize) -> bool {
///         status == StatusCode::SERVICE_UNAVAILABLE
///     }
/// }
/// ```
pub trait RetryPredicate: Send + Sync {
    /// Whether a response with `status` should be retried.
    fn should_retry_status(&self, status: StatusCode, attempt: usize) -> bool;

    /// Whether a transport failure should be retried. Defaults to `true`.
    fn should_retry_error(&self, error: &TransportError, attempt: usize) -> bool {
        let _ = (error, attempt);
        true
    }
}

/// Retries 429, every 5xx, and every transport failure. The default predicate.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryOnTransient;

impl RetryPredicate for RetryOnTransient {
    fn should_retry_status(&self, status: StatusCode, _attempt: usize) -> bool {
        is_retryable_status(status)
    }
}

/// Why a retryable attempt failed.
#[derive(Debug)]
pub enum AttemptFailure {
    /// A response arrived with a retryable status.
    Status(Response),
    /// No response arrived.
    Transport(TransportError),
}

impl AttemptFailure {
    /// Releases anything held by the failure, draining a discarded body.
    pub(crate) async fn release(self) {
        match self {
            AttemptFailure::Status(response) => {
                let discarded = response.into_body().drain().await;
                tracing::trace!(discarded_bytes = discarded, "Released retried response body");
            }
            AttemptFailure::Transport(_) => {}
        }
    }

    /// Converts the failure into the call's final result.
    pub(crate) fn into_result(self) -> Result<Response> {
        match self {
            AttemptFailure::Status(response) => Ok(response),
            AttemptFailure::Transport(error) => Err(Error::Transport(error)),
        }
    }
}

/// The classified result of one physical attempt.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// A response the caller should receive as-is.
    Success(Response),
    /// A transient failure; retry if attempts remain.
    RetryableFailure(AttemptFailure),
    /// A transport failure the predicate refused to retry.
    FatalFailure(TransportError),
}

/// Classifies one attempt's transport result.
pub fn classify(
    result: std::result::Result<Response, TransportError>,
    predicate: &dyn RetryPredicate,
    attempt: usize,
) -> AttemptOutcome {
    match result {
        Ok(response) if predicate.should_retry_status(response.status(), attempt) => {
            AttemptOutcome::RetryableFailure(AttemptFailure::Status(response))
        }
        Ok(response) => AttemptOutcome::Success(response),
        Err(error) if predicate.should_retry_error(&error, attempt) => {
            AttemptOutcome::RetryableFailure(AttemptFailure::Transport(error))
        }
        Err(error) => AttemptOutcome::FatalFailure(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportErrorKind;
    use http::HeaderMap;

    fn response(status: u16) -> Response {
        Response::new(StatusCode::from_u16(status).unwrap(), HeaderMap::new(), "")
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries(), 3);
        assert_eq!(policy.max_attempts(), 4);
        assert_eq!(policy.initial_backoff(), Duration::from_secs(1));
        assert_eq!(policy.max_backoff(), Duration::from_secs(30));
        assert_eq!(policy.backoff_factor(), 2.0);
        assert!(!policy.jitter());
    }

    #[test]
    fn test_exponential_backoff_delays() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_secs(10),
            2.0,
        )
        .unwrap();

        assert_eq!(policy.backoff(0), Duration::ZERO);
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(800));
        assert_eq!(policy.backoff(5), Duration::from_millis(1600));
        assert_eq!(policy.backoff(8), Duration::from_millis(10_000));
    }

    #[test]
    fn test_fractional_factor() {
        let policy =
            RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1), 1.5).unwrap();
        assert_eq!(policy.backoff(2), Duration::from_millis(150));
        assert_eq!(policy.backoff(3), Duration::from_millis(225));
    }

    #[test]
    fn test_factor_one_is_constant() {
        let policy =
            RetryPolicy::new(5, Duration::from_millis(250), Duration::from_secs(1), 1.0).unwrap();
        for retry in 1..=5 {
            assert_eq!(policy.backoff(retry), Duration::from_millis(250));
        }
    }

    #[test]
    fn test_backoff_never_exceeds_max() {
        let policy = RetryPolicy::default();
        for retry in 1..2_000 {
            let delay = policy.backoff(retry);
            let expected = Duration::from_secs(1)
                .checked_mul(2u32.saturating_pow(retry as u32 - 1))
                .map_or(Duration::from_secs(30), |d| d.min(Duration::from_secs(30)));
            assert_eq!(delay, expected, "retry {}", retry);
            assert!(delay <= policy.max_backoff());
        }
        assert_eq!(policy.backoff(usize::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::builder()
            .initial_backoff(Duration::from_millis(100))
            .max_backoff(Duration::from_millis(400))
            .jitter(true)
            .build()
            .unwrap();

        for retry in 1..20 {
            let delay = policy.delay_for_retry(retry).as_secs_f64();
            let base = policy.backoff(retry).as_secs_f64();
            assert!(delay <= base + 1e-6);
            assert!(delay >= base * 0.5 - 1e-6);
        }
    }

    #[test]
    fn test_invalid_policies_are_rejected() {
        let zero_initial = RetryPolicy::new(1, Duration::ZERO, Duration::from_secs(1), 2.0);
        assert!(matches!(zero_initial, Err(Error::ConfigurationError(_))));

        let inverted = RetryPolicy::builder()
            .initial_backoff(Duration::from_secs(5))
            .max_backoff(Duration::from_secs(1))
            .build();
        assert!(matches!(inverted, Err(Error::ConfigurationError(_))));

        let shrinking = RetryPolicy::builder().backoff_factor(0.5).build();
        assert!(matches!(shrinking, Err(Error::ConfigurationError(_))));

        let nan = RetryPolicy::builder().backoff_factor(f64::NAN).build();
        assert!(matches!(nan, Err(Error::ConfigurationError(_))));
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::from_u16(599).unwrap()));
        assert!(!is_retryable_status(StatusCode::OK));
        assert!(!is_retryable_status(StatusCode::MOVED_PERMANENTLY));
        assert!(!is_retryable_status(StatusCode::NOT_FOUND));
        assert!(!is_retryable_status(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_retryable_status(StatusCode::from_u16(600).unwrap()));
    }

    #[test]
    fn test_classify_with_default_predicate() {
        let predicate = RetryOnTransient;

        assert!(matches!(
            classify(Ok(response(200)), &predicate, 1),
            AttemptOutcome::Success(_)
        ));
        assert!(matches!(
            classify(Ok(response(404)), &predicate, 1),
            AttemptOutcome::Success(_)
        ));
        assert!(matches!(
            classify(Ok(response(429)), &predicate, 1),
            AttemptOutcome::RetryableFailure(AttemptFailure::Status(_))
        ));
        assert!(matches!(
            classify(Ok(response(502)), &predicate, 1),
            AttemptOutcome::RetryableFailure(AttemptFailure::Status(_))
        ));

        let err = TransportError::new(TransportErrorKind::Connect, "refused");
        assert!(matches!(
            classify(Err(err), &predicate, 1),
            AttemptOutcome::RetryableFailure(AttemptFailure::Transport(_))
        ));
    }

    #[test]
    fn test_classify_fatal_transport_error() {
        struct NeverRetryErrors;
        impl RetryPredicate for NeverRetryErrors {
            fn should_retry_status(&self, status: StatusCode, _attempt: usize) -> bool {
                is_retryable_status(status)
            }
            fn should_retry_error(&self, _error: &TransportError, _attempt: usize) -> bool {
                false
            }
        }

        let err = TransportError::new(TransportErrorKind::Other, "tls handshake");
        assert!(matches!(
            classify(Err(err), &NeverRetryErrors, 1),
            AttemptOutcome::FatalFailure(_)
        ));
    }
}
