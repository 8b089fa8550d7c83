//! The request decorator chain.
//!
//! Decorators run in registration order on every physical attempt, each
//! receiving the attempt's [`RequestContext`] and a mutable request. Only
//! headers can be changed; method, URL and body are read-only through
//! [`OutboundRequest`]. The first decorator error aborts the call with
//! [`Error::DecorationError`], which is never retried.

use std::fmt;
use std::sync::Arc;

use http::{header::AUTHORIZATION, HeaderValue};

use crate::{
    context::RequestContext,
    error::BoxError,
    observe::{Logger, Tracer},
    request::OutboundRequest,
    Error, Result,
};

/// Edits an outbound request before it is sent.
///
/// Implementations must be idempotent: the executor runs the chain again on a
/// fresh copy of the caller's request for each retry.
///
/// # Examples
///
/// ```
/// use http::HeaderValue;
/// use mirako::{BoxError, OutboundRequest, RequestContext, RequestDecorator};
///
/// struct ClientVersion;
///
/// impl RequestDecorator for ClientVersion {
///     fn decorate(&self, _ctx: &RequestContext<'_>, request: &mut OutboundRequest) -> Result<(), BoxError> {
///         request
///             .headers_mut()
///             .insert("x-client-version", HeaderValue::from_static("1.0"));
///         Ok(())
///     }
/// }
/// ```
pub trait RequestDecorator: Send + Sync {
    /// Edits the request. Returning an error fails the call.
    fn decorate(
        &self,
        ctx: &RequestContext<'_>,
        request: &mut OutboundRequest,
    ) -> std::result::Result<(), BoxError>;

    /// A name used in error messages.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// A decorator built from a closure. See [`decorator_fn`].
#[derive(Clone)]
pub struct FnDecorator<F> {
    f: F,
}

/// Wraps a closure as a [`RequestDecorator`].
///
/// # Examples
///
/// ```
/// use http::HeaderValue;
/// use mirako::decorate::decorator_fn;
///
/// let decorator = decorator_fn(|ctx, request| {
///     let attempt = HeaderValue::from(ctx.attempt());
///     request.headers_mut().insert("x-attempt", attempt);
///     Ok(())
/// });
/// ```
pub fn decorator_fn<F>(f: F) -> FnDecorator<F>
where
    F: Fn(&RequestContext<'_>, &mut OutboundRequest) -> std::result::Result<(), BoxError>
        + Send
        + Sync,
{
    FnDecorator { f }
}

impl<F> RequestDecorator for FnDecorator<F>
where
    F: Fn(&RequestContext<'_>, &mut OutboundRequest) -> std::result::Result<(), BoxError>
        + Send
        + Sync,
{
    fn decorate(
        &self,
        ctx: &RequestContext<'_>,
        request: &mut OutboundRequest,
    ) -> std::result::Result<(), BoxError> {
        (self.f)(ctx, request)
    }

    fn name(&self) -> &str {
        "decorator_fn"
    }
}

/// An ordered list of decorators.
#[derive(Clone, Default)]
pub struct DecoratorChain {
    decorators: Vec<Arc<dyn RequestDecorator>>,
}

impl fmt::Debug for DecoratorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.decorators.iter().map(|d| d.name()))
            .finish()
    }
}

impl DecoratorChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a decorator; it runs after every decorator already in the chain.
    pub fn push(&mut self, decorator: Arc<dyn RequestDecorator>) {
        self.decorators.push(decorator);
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, decorator: impl RequestDecorator + 'static) -> Self {
        self.push(Arc::new(decorator));
        self
    }

    /// Number of decorators.
    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    /// Returns `true` if the chain has no decorators.
    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }

    /// Runs every decorator in order, stopping at the first error.
    pub fn decorate(&self, ctx: &RequestContext<'_>, request: &mut OutboundRequest) -> Result<()> {
        for decorator in &self.decorators {
            decorator
                .decorate(ctx, request)
                .map_err(|source| Error::DecorationError {
                    decorator: decorator.name().to_string(),
                    source,
                })?;
        }
        Ok(())
    }
}

/// Sets `Authorization: Bearer <credential>` on every attempt.
#[derive(Clone)]
pub struct AuthDecorator {
    value: HeaderValue,
}

impl fmt::Debug for AuthDecorator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthDecorator")
            .field("value", &"<redacted>")
            .finish()
    }
}

impl AuthDecorator {
    /// Creates an auth decorator from an API key or bearer token.
    ///
    /// A `Bearer ` prefix is added unless the credential already has one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the credential is blank or is
    /// not a valid header value.
    pub fn bearer(credential: impl AsRef<str>) -> Result<Self> {
        let credential = credential.as_ref().trim();
        if credential.is_empty() || credential.eq_ignore_ascii_case("bearer") {
            return Err(Error::ConfigurationError("API key is required".to_string()));
        }

        let has_scheme = credential
            .get(..7)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("bearer "));
        let authorization = if has_scheme {
            credential.to_string()
        } else {
            format!("Bearer {}", credential)
        };

        let mut value = HeaderValue::try_from(authorization)
            .map_err(|e| Error::ConfigurationError(format!("Invalid API key: {}", e)))?;
        value.set_sensitive(true);
        Ok(Self { value })
    }
}

impl RequestDecorator for AuthDecorator {
    fn decorate(
        &self,
        _ctx: &RequestContext<'_>,
        request: &mut OutboundRequest,
    ) -> std::result::Result<(), BoxError> {
        request.headers_mut().insert(AUTHORIZATION, self.value.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "auth"
    }
}

/// Emits `Request: <METHOD> <URL>` to a [`Logger`].
#[derive(Clone)]
pub struct LoggingDecorator {
    logger: Arc<dyn Logger>,
}

impl LoggingDecorator {
    /// Logs through `logger`.
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self { logger }
    }
}

impl RequestDecorator for LoggingDecorator {
    fn decorate(
        &self,
        _ctx: &RequestContext<'_>,
        request: &mut OutboundRequest,
    ) -> std::result::Result<(), BoxError> {
        self.logger
            .log(format_args!("Request: {} {}", request.method(), request.url()));
        Ok(())
    }

    fn name(&self) -> &str {
        "logging"
    }
}

/// Notifies a [`Tracer`] before the request is sent.
#[derive(Clone)]
pub struct TracingDecorator {
    tracer: Arc<dyn Tracer>,
}

impl TracingDecorator {
    /// Notifies `tracer`.
    pub fn new(tracer: Arc<dyn Tracer>) -> Self {
        Self { tracer }
    }
}

impl RequestDecorator for TracingDecorator {
    fn decorate(
        &self,
        ctx: &RequestContext<'_>,
        request: &mut OutboundRequest,
    ) -> std::result::Result<(), BoxError> {
        self.tracer.trace_request(ctx, request);
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::CallContext;
    use http::Method;
    use std::sync::Mutex;
    use url::Url;

    fn request() -> OutboundRequest {
        OutboundRequest::new(Method::GET, Url::parse("https://mirako.co/v1/avatar").unwrap())
    }

    #[derive(Default)]
    struct Captured(Mutex<Vec<String>>);

    impl Logger for Captured {
        fn log(&self, message: fmt::Arguments<'_>) {
            self.0.lock().unwrap().push(message.to_string());
        }
    }

    #[test]
    fn test_auth_adds_bearer_prefix() {
        let call = CallContext::new();
        let ctx = RequestContext::new(&call, 1, 1);
        let mut req = request();

        AuthDecorator::bearer("sk-123").unwrap().decorate(&ctx, &mut req).unwrap();

        let value = &req.headers()[AUTHORIZATION];
        assert_eq!(value, "Bearer sk-123");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_auth_keeps_existing_prefix() {
        let call = CallContext::new();
        let ctx = RequestContext::new(&call, 1, 1);
        let mut req = request();

        AuthDecorator::bearer("Bearer sk-123").unwrap().decorate(&ctx, &mut req).unwrap();
        assert_eq!(req.headers()[AUTHORIZATION], "Bearer sk-123");
    }

    #[test]
    fn test_auth_rejects_blank_credential() {
        assert!(matches!(AuthDecorator::bearer(""), Err(Error::ConfigurationError(_))));
        assert!(matches!(AuthDecorator::bearer("   "), Err(Error::ConfigurationError(_))));
        assert!(matches!(AuthDecorator::bearer("key\nwith newline"), Err(Error::ConfigurationError(_))));
    }

    #[test]
    fn test_auth_is_idempotent() {
        let call = CallContext::new();
        let ctx = RequestContext::new(&call, 1, 1);
        let auth = AuthDecorator::bearer("sk-123").unwrap();
        let mut req = request();

        auth.decorate(&ctx, &mut req).unwrap();
        auth.decorate(&ctx, &mut req).unwrap();
        assert_eq!(req.headers().get_all(AUTHORIZATION).iter().count(), 1);
    }

    #[test]
    fn test_chain_runs_in_order_and_stops_on_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let marker = |tag: &'static str, seen: Arc<Mutex<Vec<&'static str>>>| {
            decorator_fn(move |_ctx, _req| {
                seen.lock().unwrap().push(tag);
                Ok(())
            })
        };

        let chain = DecoratorChain::new()
            .with(marker("first", seen.clone()))
            .with(marker("second", seen.clone()))
            .with(decorator_fn(|_ctx, _req| Err("rejected".into())))
            .with(marker("never", seen.clone()));

        let call = CallContext::new();
        let ctx = RequestContext::new(&call, 1, 1);
        let result = chain.decorate(&ctx, &mut request());

        match result {
            Err(Error::DecorationError { decorator, source }) => {
                assert_eq!(decorator, "decorator_fn");
                assert_eq!(source.to_string(), "rejected");
            }
            other => panic!("Expected DecorationError, got {:?}", other),
        }
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_logging_decorator_formats_method_and_url() {
        let logger = Arc::new(Captured::default());
        let call = CallContext::new();
        let ctx = RequestContext::new(&call, 1, 1);

        LoggingDecorator::new(logger.clone())
            .decorate(&ctx, &mut request())
            .unwrap();

        assert_eq!(
            *logger.0.lock().unwrap(),
            vec!["Request: GET https://mirako.co/v1/avatar".to_string()]
        );
    }
}
