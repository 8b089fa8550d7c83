//! The API client and its builder.
//!
//! The [`Client`] is the main entry point. Use [`ClientBuilder`] to supply the
//! credential and the optional settings; everything is fixed once
//! [`ClientBuilder::build`] returns.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use serde::Serialize;
use url::Url;

use crate::{
    context::CallContext,
    decorate::{AuthDecorator, DecoratorChain, LoggingDecorator, RequestDecorator, TracingDecorator},
    executor::RetryingExecutor,
    observe::{Logger, NoopLogger, NoopTracer, Tracer},
    request::OutboundRequest,
    retry::{RetryPolicy, RetryPredicate},
    transport::Transport,
    Error, Response, Result,
};

/// The API root used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://mirako.co";

/// Timeout applied by the default `reqwest` transport.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Environment variable read by [`Client::from_env`] for the API key.
pub const API_KEY_ENV: &str = "MIRAKO_API_KEY";

/// Environment variable read by [`Client::from_env`] for an optional base URL.
pub const BASE_URL_ENV: &str = "MIRAKO_BASE_URL";

/// An API client that authenticates, decorates and retries every call.
///
/// The client is cheap to clone and safe to share across tasks; its
/// configuration is read-only after construction.
///
/// # Examples
///
/// ```no_run
/// use mirako::{Client, RetryPolicy, TracingLogger};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize)]
/// struct SpeechRequest {
///     text: String,
///     voice_profile_id: String,
/// }
///
/// #[derive(Deserialize)]
/// struct Speech {
///     id: String,
/// }
///
/// # async fn example() -> Result<(), mirako::Error> {
/// let client = Client::builder()
///     .api_key("my-key")
///     .retry_policy(RetryPolicy::default())
///     .logger(TracingLogger)
///     .build()?;
///
/// let body = SpeechRequest {
///     text: "Hello, welcome to Mirako AI!".to_string(),
///     voice_profile_id: "your-voice-profile-id".to_string(),
/// };
/// let speech: Speech = client
///     .post("/v1/speech/tts", &body)
///     .await?
///     .error_for_status()
///     .await?
///     .json()
///     .await?;
/// println!("Generated {}", speech.id);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    base_url: Url,
    executor: RetryingExecutor,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.inner.base_url.as_str())
            .field("executor", &self.inner.executor)
            .finish()
    }
}

impl Client {
    /// Creates a new `ClientBuilder`.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Creates a client from the environment.
    ///
    /// Reads the API key from `MIRAKO_API_KEY` and, if set, the base URL from
    /// `MIRAKO_BASE_URL`. Other settings keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the key is missing or blank, or
    /// [`Error::InvalidUrl`] if the base URL does not parse.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| {
            Error::ConfigurationError(format!("missing {} environment variable", API_KEY_ENV))
        })?;

        let mut builder = Self::builder().api_key(api_key);
        if let Ok(base_url) = std::env::var(BASE_URL_ENV) {
            if !base_url.trim().is_empty() {
                builder = builder.base_url(base_url.trim())?;
            }
        }
        builder.build()
    }

    /// The base URL requests are resolved against.
    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    /// The retry policy, if retries are enabled.
    pub fn retry_policy(&self) -> Option<&RetryPolicy> {
        self.inner.executor.retry_policy()
    }

    /// Starts a request for `path`, resolved under the base URL's path.
    ///
    /// A query string in `path` is kept.
    ///
    /// # Examples
    ///
    /// ```
    /// use mirako::Client;
    /// use http::Method;
    ///
    /// # fn example() -> Result<(), mirako::Error> {
    /// let client = Client::builder()
    ///     .api_key("my-key")
    ///     .base_url("https://api.example.com/v2/")?
    ///     .build()?;
    ///
    /// let request = client.request(Method::GET, "/avatars?page=2");
    /// assert_eq!(request.url().as_str(), "https://api.example.com/v2/avatars?page=2");
    /// # Ok(())
    /// # }
    /// ```
    pub fn request(&self, method: Method, path: &str) -> OutboundRequest {
        let (path, query) = match path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path, None),
        };

        let mut url = self.inner.base_url.clone();
        let joined = format!(
            "{}/{}",
            url.path().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        url.set_path(&joined);
        url.set_query(query);

        OutboundRequest::new(method, url)
    }

    /// Executes a request with a default (never cancelled) context.
    pub async fn execute(&self, request: &OutboundRequest) -> Result<Response> {
        self.execute_with(&CallContext::new(), request).await
    }

    /// Executes a request under the caller's context.
    ///
    /// See [`RetryingExecutor::execute`] for the error contract.
    pub async fn execute_with(
        &self,
        ctx: &CallContext,
        request: &OutboundRequest,
    ) -> Result<Response> {
        self.inner.executor.execute(ctx, request).await
    }

    /// Sends a GET request to `path`.
    pub async fn get(&self, path: &str) -> Result<Response> {
        self.execute(&self.request(Method::GET, path)).await
    }

    /// Sends a DELETE request to `path`.
    pub async fn delete(&self, path: &str) -> Result<Response> {
        self.execute(&self.request(Method::DELETE, path)).await
    }

    /// Sends a POST request to `path` with a JSON body.
    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let request = self.request(Method::POST, path).with_json(body)?;
        self.execute(&request).await
    }

    /// Sends a PUT request to `path` with a JSON body.
    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let request = self.request(Method::PUT, path).with_json(body)?;
        self.execute(&request).await
    }

    /// Sends a PATCH request to `path` with a JSON body.
    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let request = self.request(Method::PATCH, path).with_json(body)?;
        self.execute(&request).await
    }
}

/// Builder for configuring and creating a [`Client`].
///
/// Only the credential is required. Without a retry policy every call is a
/// single send.
///
/// # Examples
///
/// ```no_run
/// use mirako::{ClientBuilder, RetryPolicy};
/// use std::time::Duration;
///
/// # fn example() -> Result<(), mirako::Error> {
/// let client = ClientBuilder::new()
///     .api_key("my-key")
///     .base_url("https://staging.mirako.co")?
///     .timeout(Duration::from_secs(30))
///     .retry_policy(
///         RetryPolicy::builder()
///             .max_retries(5)
///             .initial_backoff(Duration::from_millis(200))
///             .build()?,
///     )
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct ClientBuilder {
    api_key: Option<String>,
    base_url: Option<Url>,
    transport: Option<Arc<dyn Transport>>,
    timeout: Duration,
    retry_policy: Option<RetryPolicy>,
    retry_predicate: Option<Arc<dyn RetryPredicate>>,
    logger: Arc<dyn Logger>,
    tracer: Arc<dyn Tracer>,
    decorators: Vec<Arc<dyn RequestDecorator>>,
}

impl ClientBuilder {
    /// Creates a new `ClientBuilder` with default settings.
    pub fn new() -> Self {
        Self {
            api_key: None,
            base_url: None,
            transport: None,
            timeout: DEFAULT_TIMEOUT,
            retry_policy: None,
            retry_predicate: None,
            logger: Arc::new(NoopLogger),
            tracer: Arc::new(NoopTracer),
            decorators: Vec::new(),
        }
    }

    /// Sets the API key sent as `Authorization: Bearer <key>`.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Alias for [`api_key`](Self::api_key).
    pub fn bearer_token(self, token: impl Into<String>) -> Self {
        self.api_key(token)
    }

    /// Overrides the API root (default [`DEFAULT_BASE_URL`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid.
    pub fn base_url(mut self, url: impl AsRef<str>) -> Result<Self> {
        self.base_url = Some(Url::parse(url.as_ref())?);
        Ok(self)
    }

    /// Replaces the transport. When set, [`timeout`](Self::timeout) has no effect.
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Uses a preconfigured `reqwest::Client` as the transport.
    pub fn http_client(self, client: reqwest::Client) -> Self {
        self.transport(client)
    }

    /// Sets the timeout of the default transport (default 60s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables retries with the given policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Replaces the predicate deciding which outcomes are retried.
    ///
    /// By default 429, 5xx and transport failures are retried.
    pub fn retry_predicate(mut self, predicate: impl RetryPredicate + 'static) -> Self {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    /// Enables request logging.
    pub fn logger(mut self, logger: impl Logger + 'static) -> Self {
        self.logger = Arc::new(logger);
        self
    }

    /// Enables request/response tracing.
    pub fn tracer(mut self, tracer: impl Tracer + 'static) -> Self {
        self.tracer = Arc::new(tracer);
        self
    }

    /// Adds a decorator. Decorators run after authentication and before the
    /// logging and tracing decorators, in the order they were added.
    pub fn decorator(mut self, decorator: impl RequestDecorator + 'static) -> Self {
        self.decorators.push(Arc::new(decorator));
        self
    }

    /// Builds the configured `Client`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if no API key was provided or the
    /// default HTTP client cannot be created.
    pub fn build(self) -> Result<Client> {
        let api_key = self
            .api_key
            .ok_or_else(|| Error::ConfigurationError("API key is required".to_string()))?;
        let auth = AuthDecorator::bearer(api_key)?;

        let base_url = match self.base_url {
            Some(url) => url,
            None => Url::parse(DEFAULT_BASE_URL)?,
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => {
                let http_client = reqwest::Client::builder()
                    .timeout(self.timeout)
                    .build()
                    .map_err(|e| {
                        Error::ConfigurationError(format!("Failed to build HTTP client: {}", e))
                    })?;
                Arc::new(http_client)
            }
        };

        let mut chain = DecoratorChain::new();
        chain.push(Arc::new(auth));
        for decorator in self.decorators {
            chain.push(decorator);
        }
        chain.push(Arc::new(LoggingDecorator::new(self.logger.clone())));
        chain.push(Arc::new(TracingDecorator::new(self.tracer.clone())));

        let mut executor = RetryingExecutor::new(transport)
            .with_chain(chain)
            .with_logger(self.logger)
            .with_tracer(self.tracer);
        if let Some(policy) = self.retry_policy {
            executor = executor.with_retry_policy(policy);
        }
        if let Some(predicate) = self.retry_predicate {
            executor = executor.with_retry_predicate(predicate);
        }

        tracing::debug!(base_url = %base_url, executor = ?executor, "Built API client");

        Ok(Client {
            inner: Arc::new(ClientInner { base_url, executor }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_requires_api_key() {
        match Client::builder().build() {
            Err(Error::ConfigurationError(message)) => assert_eq!(message, "API key is required"),
            other => panic!("Expected ConfigurationError, got {:?}", other),
        }
    }

    #[test]
    fn test_build_rejects_blank_api_key() {
        let result = Client::builder().api_key("  ").build();
        assert!(matches!(result, Err(Error::ConfigurationError(_))));
    }

    #[test]
    fn test_defaults() {
        let client = Client::builder().api_key("sk-test").build().unwrap();
        assert_eq!(client.base_url().as_str(), "https://mirako.co/");
        assert!(client.retry_policy().is_none());
    }

    #[test]
    fn test_invalid_base_url() {
        let result = Client::builder().base_url("not a url");
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }

    #[test]
    fn test_request_joins_paths() {
        let client = Client::builder()
            .api_key("sk-test")
            .base_url("https://api.example.com/base")
            .unwrap()
            .build()
            .unwrap();

        let request = client.request(Method::GET, "v1/voice/profiles");
        assert_eq!(
            request.url().as_str(),
            "https://api.example.com/base/v1/voice/profiles"
        );

        let root = Client::builder().api_key("sk-test").build().unwrap();
        let request = root.request(Method::POST, "/v1/image/generate?async=true");
        assert_eq!(
            request.url().as_str(),
            "https://mirako.co/v1/image/generate?async=true"
        );
        assert_eq!(request.method(), &Method::POST);
    }

    #[test]
    fn test_retry_policy_is_kept() {
        let client = Client::builder()
            .api_key("sk-test")
            .retry_policy(RetryPolicy::default())
            .build()
            .unwrap();
        assert_eq!(client.retry_policy(), Some(&RetryPolicy::default()));
    }
}
