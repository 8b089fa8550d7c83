//! Error types for the request pipeline.
//!
//! Fatal conditions (configuration, decoration, cancellation) stop a call at the
//! point they occur. Transport failures are retried by the executor and only
//! surface here once the retry policy is exhausted.

use http::{HeaderMap, StatusCode};

use crate::transport::TransportError;

/// A boxed error used at trait seams where implementors pick their own error type.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The main error type for API calls.
///
/// # Examples
///
/// ```no_run
/// use mirako::{Client, Error};
///
/// # async fn example() -> Result<(), Error> {
/// let client = Client::builder().api_key("my-key").build()?;
///
/// match client.get("/v1/voice/profiles").await {
///     Ok(response) => println!("status {}", response.status()),
///     Err(Error::Transport(err)) => eprintln!("network failure: {}", err),
///     Err(e) if e.is_cancellation() => eprintln!("call was cancelled"),
///     Err(e) => eprintln!("other error: {}", e),
/// }
/// # Ok(())
/// # }
/// ```
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid configuration was provided.
    ///
    /// Raised while building the client (missing credential, invalid retry
    /// policy, invalid header values). Never retried.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A request decorator rejected the outbound request.
    ///
    /// Decoration failures are logic or configuration problems rather than
    /// transient faults, so the call fails immediately without retrying.
    #[error("Decorator `{decorator}` rejected the request: {source}")]
    DecorationError {
        /// Name of the decorator that failed
        decorator: String,
        /// The error returned by the decorator
        #[source]
        source: BoxError,
    },

    /// The transport failed without producing a response.
    ///
    /// When a retry policy is configured this is only returned after every
    /// attempt has been used and the last attempt also failed at the transport.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The caller cancelled the call.
    #[error("Request cancelled")]
    Cancelled,

    /// The caller's deadline elapsed before the call completed.
    #[error("Request deadline exceeded")]
    DeadlineExceeded,

    /// The server returned a non-2xx HTTP status code.
    ///
    /// The executor never produces this on its own; retry-exhausted responses
    /// are returned as normal responses. It is created by
    /// [`Response::error_for_status`](crate::Response::error_for_status).
    #[error("HTTP error {status}: {raw_response}")]
    HttpError {
        /// The HTTP status code
        status: StatusCode,
        /// The raw response body
        raw_response: String,
        /// The response headers
        headers: HeaderMap,
    },

    /// Failed to deserialize the response body into the expected type.
    #[error("Failed to deserialize response (status {status}): {serde_error}")]
    DeserializationFailed {
        /// The raw response body that failed to deserialize
        raw_response: String,
        /// The serde error message
        serde_error: String,
        /// The HTTP status code
        status: StatusCode,
    },

    /// Failed to serialize the request body.
    #[error("Failed to serialize request: {0}")]
    SerializationFailed(String),

    /// An invalid URL was provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Returns `true` if this error describes a transient condition.
    ///
    /// Transport failures and `HttpError`s carrying 429 or a 5xx status are
    /// transient. Everything else is not.
    ///
    /// # Examples
    ///
    /// ```
    /// use mirako::Error;
    /// use http::StatusCode;
    ///
    /// let err = Error::HttpError {
    ///     status: StatusCode::TOO_MANY_REQUESTS,
    ///     raw_response: "slow down".to_string(),
    ///     headers: http::HeaderMap::new(),
    /// };
    /// assert!(err.is_retryable());
    ///
    /// assert!(!Error::Cancelled.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::HttpError { status, .. } => crate::retry::is_retryable_status(*status),
            Error::ConfigurationError(_) => false,
            Error::DecorationError { .. } => false,
            Error::Cancelled => false,
            Error::DeadlineExceeded => false,
            Error::DeserializationFailed { .. } => false,
            Error::SerializationFailed(_) => false,
            Error::InvalidUrl(_) => false,
        }
    }

    /// Returns `true` if the call was stopped by caller-side cancellation or deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }

    /// Returns the HTTP status code if this error has one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::HttpError { status, .. } => Some(*status),
            Error::DeserializationFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the raw response body if this error has one.
    pub fn raw_response(&self) -> Option<&str> {
        match self {
            Error::HttpError { raw_response, .. } => Some(raw_response),
            Error::DeserializationFailed { raw_response, .. } => Some(raw_response),
            _ => None,
        }
    }
}

/// A specialized `Result` type for API calls.
pub type Result<T> = std::result::Result<T, Error>;
