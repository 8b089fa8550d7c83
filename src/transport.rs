//! The transport seam: anything that can physically send an [`OutboundRequest`].
//!
//! The executor never talks to the network directly. It hands fully decorated
//! requests to a [`Transport`] and receives either a [`Response`] or a
//! [`TransportError`]. `reqwest::Client` is the default implementation; tests
//! and callers with special needs can plug in their own.

use std::fmt;

use async_trait::async_trait;
use futures::TryStreamExt;

use crate::{error::BoxError, request::OutboundRequest, response::Body, Response};

/// Sends a fully formed request and returns the response or a low-level failure.
///
/// Implementations must not retry on their own; retries are the executor's job.
///
/// # Examples
///
/// ```
/// use async_trait::async_trait;
/// use http::{HeaderMap, StatusCode};
/// use mirako::{OutboundRequest, Response, Transport, TransportError};
///
/// struct AlwaysOk;
///
/// #[async_trait]
/// impl Transport for AlwaysOk {
///     async fn send(&self, _request: &OutboundRequest) -> Result<Response, TransportError> {
///         Ok(Response::new(StatusCode::OK, HeaderMap::new(), "{}"))
///     }
/// }
/// ```
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends the request once.
    async fn send(&self, request: &OutboundRequest) -> Result<Response, TransportError>;
}

#[async_trait]
impl Transport for reqwest::Client {
    async fn send(&self, request: &OutboundRequest) -> Result<Response, TransportError> {
        let mut builder = self
            .request(request.method().clone(), request.url().clone())
            .headers(request.headers().clone());

        if !request.body().is_empty() {
            builder = builder.body(request.body().clone());
        }

        let response = builder.send().await?;
        Ok(Response::from(response))
    }
}

impl From<reqwest::Response> for Response {
    fn from(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let stream = response.bytes_stream().map_err(|e| -> BoxError { Box::new(e) });
        Response::new(status, headers, Body::from_stream(stream))
    }
}

/// Broad category of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The connection could not be established.
    Connect,
    /// The request or response timed out.
    Timeout,
    /// Reading the response body failed.
    Body,
    /// Any other failure reported by the transport.
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportErrorKind::Connect => "connection failed",
            TransportErrorKind::Timeout => "timed out",
            TransportErrorKind::Body => "body read failed",
            TransportErrorKind::Other => "transport failure",
        };
        f.write_str(label)
    }
}

/// A failure where no response was obtained.
#[derive(thiserror::Error, Debug)]
#[error("{kind}: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    /// Creates a transport error of the given kind wrapping `source`.
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    /// Returns the failure category.
    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    /// Returns `true` if this was a timeout.
    pub fn is_timeout(&self) -> bool {
        self.kind == TransportErrorKind::Timeout
    }

    /// Returns `true` if the connection could not be established.
    pub fn is_connect(&self) -> bool {
        self.kind == TransportErrorKind::Connect
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else {
            TransportErrorKind::Other
        };
        Self::new(kind, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_helpers() {
        let timeout = TransportError::new(TransportErrorKind::Timeout, "deadline");
        assert!(timeout.is_timeout());
        assert!(!timeout.is_connect());
        assert_eq!(timeout.kind(), TransportErrorKind::Timeout);
        assert_eq!(timeout.to_string(), "timed out: deadline");
    }

    #[test]
    fn test_source_is_preserved() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TransportError::new(TransportErrorKind::Connect, io);
        let source = std::error::Error::source(&err).expect("source should be set");
        assert_eq!(source.to_string(), "refused");
    }
}
