//! Responses and their bodies.
//!
//! A [`Response`] is returned as-is by the executor whatever its status: status
//! inspection is the caller's job. [`Response::error_for_status`] and
//! [`Response::json`] cover the common follow-up steps while preserving the raw
//! body for debugging.

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use futures::Stream;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::{
    error::BoxError,
    transport::{TransportError, TransportErrorKind},
    Error, Result,
};

/// A response body, either fully buffered or streamed from the transport.
///
/// Dropping a `Body` releases whatever it holds (for `reqwest`, the pooled
/// connection). [`Body::drain`] reads it to the end first so the connection can
/// be reused.
pub struct Body {
    kind: BodyKind,
}

enum BodyKind {
    Full(Bytes),
    Stream(BoxStream<'static, std::result::Result<Bytes, BoxError>>),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Self::from(Bytes::new())
    }

    /// Wraps a stream of byte chunks.
    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError> + 'static,
    {
        Self {
            kind: BodyKind::Stream(stream.map_err(|e| -> BoxError { e.into() }).boxed()),
        }
    }

    /// Reads the whole body.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportErrorKind::Body`] error if a chunk fails to arrive.
    pub async fn bytes(self) -> std::result::Result<Bytes, TransportError> {
        match self.kind {
            BodyKind::Full(bytes) => Ok(bytes),
            BodyKind::Stream(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk.map_err(|e| TransportError::new(TransportErrorKind::Body, e))?;
                    buf.extend_from_slice(&chunk);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Reads and discards the rest of the body, then releases it.
    ///
    /// Read errors end the drain early; the body is released either way.
    /// Returns the number of bytes discarded.
    pub async fn drain(self) -> usize {
        match self.kind {
            BodyKind::Full(bytes) => bytes.len(),
            BodyKind::Stream(mut stream) => {
                let mut discarded = 0;
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(chunk) => discarded += chunk.len(),
                        Err(e) => {
                            tracing::debug!(error = %e, "Stopped draining response body");
                            break;
                        }
                    }
                }
                discarded
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BodyKind::Full(bytes) => f.debug_tuple("Body").field(&bytes.len()).finish(),
            BodyKind::Stream(_) => f.write_str("Body(<stream>)"),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self {
            kind: BodyKind::Full(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from(Bytes::from(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::from(Bytes::from(text))
    }
}

impl From<&'static str> for Body {
    fn from(text: &'static str) -> Self {
        Self::from(Bytes::from_static(text.as_bytes()))
    }
}

/// The final response of a logical call.
///
/// # Examples
///
/// ```no_run
/// use mirako::Client;
/// use serde::Deserialize;
///
/// #[derive(Deserialize)]
/// struct Profile {
///     id: String,
/// }
///
/// # async fn example() -> Result<(), mirako::Error> {
/// let client = Client::builder().api_key("my-key").build()?;
///
/// let response = client.get("/v1/voice/profiles/abc").await?;
/// println!("Status: {}", response.status());
/// println!("Attempts: {}", response.attempts());
/// println!("Took {:?}", response.latency());
///
/// let profile: Profile = response.error_for_status().await?.json().await?;
/// println!("Profile: {}", profile.id);
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Body,
    attempts: usize,
    latency: Duration,
}

impl Response {
    /// Creates a response, typically from inside a [`Transport`](crate::Transport).
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Body>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
            attempts: 1,
            latency: Duration::ZERO,
        }
    }

    /// Records how many attempts the call took and how long it ran in total.
    pub(crate) fn finish(mut self, attempts: usize, latency: Duration) -> Self {
        self.attempts = attempts;
        self.latency = latency;
        self
    }

    /// The HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns a header value by name, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The number of physical attempts made for this call.
    pub fn attempts(&self) -> usize {
        self.attempts
    }

    /// Returns `true` if the call needed more than one attempt.
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }

    /// Total time from the start of the call until this response arrived,
    /// including backoff sleeps.
    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Consumes the response and returns its body.
    pub fn into_body(self) -> Body {
        self.body
    }

    /// Reads the whole body.
    pub async fn bytes(self) -> Result<Bytes> {
        Ok(self.body.bytes().await?)
    }

    /// Reads the whole body as text, replacing invalid UTF-8.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeserializationFailed`] with the raw body and serde
    /// message when the body does not match `T`.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let status = self.status;
        let bytes = self.body.bytes().await?;

        serde_json::from_slice::<T>(&bytes).map_err(|e| {
            let raw_response = String::from_utf8_lossy(&bytes).into_owned();
            tracing::error!(
                error = %e,
                status = status.as_u16(),
                raw_response = %raw_response,
                "Failed to deserialize response"
            );
            Error::DeserializationFailed {
                raw_response,
                serde_error: e.to_string(),
                status,
            }
        })
    }

    /// Turns a non-2xx response into [`Error::HttpError`], reading the body
    /// into the error. 2xx responses pass through untouched.
    pub async fn error_for_status(self) -> Result<Self> {
        if self.status.is_success() {
            return Ok(self);
        }

        let status = self.status;
        let headers = self.headers;
        let raw_response = match self.body.bytes().await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(_) => String::new(),
        };

        if status.is_client_error() {
            tracing::error!(status = status.as_u16(), response = %raw_response, "Client error (4xx)");
        } else if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), response = %raw_response, "Server error (5xx)");
        }

        Err(Error::HttpError {
            status,
            raw_response,
            headers,
        })
    }
}
