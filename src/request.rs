//! The outbound request handed to the pipeline.

use bytes::Bytes;
use http::{header::CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, Method};
use serde::Serialize;
use url::Url;

use crate::{Error, Result};

/// A fully formed HTTP request: method, URL, headers and body.
///
/// Method, URL and body are fixed once the value is built; only headers can be
/// changed through a `&mut OutboundRequest`, which is what decorators receive.
///
/// # Examples
///
/// ```
/// use mirako::OutboundRequest;
/// use http::Method;
/// use url::Url;
///
/// # fn example() -> Result<(), mirako::Error> {
/// let request = OutboundRequest::new(Method::POST, Url::parse("https://mirako.co/v1/tts")?)
///     .with_header("x-request-id", "abc")?
///     .with_json(&serde_json::json!({ "text": "hello" }))?;
///
/// assert_eq!(request.headers()["content-type"], "application/json");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: Bytes,
}

impl OutboundRequest {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Adds a header to the request.
    ///
    /// # Errors
    ///
    /// Returns an error if the header name or value is invalid.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl AsRef<str>) -> Result<Self> {
        let name = HeaderName::try_from(name.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header name: {}", e)))?;
        let value = HeaderValue::try_from(value.as_ref())
            .map_err(|e| Error::ConfigurationError(format!("Invalid header value: {}", e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Appends a query parameter to the URL.
    pub fn with_query_param(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.url
            .query_pairs_mut()
            .append_pair(key.as_ref(), value.as_ref());
        self
    }

    /// Sets a raw body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `body` as JSON and sets `Content-Type: application/json`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SerializationFailed`] if `body` cannot be serialized.
    pub fn with_json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self> {
        let json = serde_json::to_vec(body).map_err(|e| Error::SerializationFailed(e.to_string()))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = Bytes::from(json);
        Ok(self)
    }

    /// The HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Mutable access to the request headers.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The request body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }
}
