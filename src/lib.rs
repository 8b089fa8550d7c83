//! # Mirako - API client core
//!
//! This crate wraps an HTTP transport with the cross-cutting handling every
//! Mirako API call needs: bearer authentication, logging and tracing hooks, and
//! retries with capped exponential backoff.
//!
//! ## Quick Start
//!
//! ```no_run
//! use mirako::{Client, RetryPolicy};
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Avatar {
//!     id: String,
//!     status: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), mirako::Error> {
//!     let client = Client::builder()
//!         .api_key(std::env::var("MIRAKO_API_KEY").unwrap_or_default())
//!         .retry_policy(RetryPolicy::default())
//!         .build()?;
//!
//!     let avatar: Avatar = client
//!         .get("/v1/avatar/abc")
//!         .await?
//!         .error_for_status()
//!         .await?
//!         .json()
//!         .await?;
//!     println!("Avatar {} is {}", avatar.id, avatar.status);
//!
//!     Ok(())
//! }
//! ```
//!
//! ## How a call runs
//!
//! Each logical call becomes one or more physical attempts. For every attempt
//! the [`RetryingExecutor`] copies the caller's [`OutboundRequest`], runs the
//! [`DecoratorChain`] over the copy (auth, custom decorators, logging, tracing),
//! and sends it through the [`Transport`]. Responses with status 429 or 5xx and
//! transport failures are retried until the [`RetryPolicy`] runs out; the last
//! outcome is then returned as-is. A 5xx that survives every retry is an
//! `Ok(Response)`, so check the status (or call
//! [`Response::error_for_status`]).
//!
//! ## Cancellation
//!
//! ```no_run
//! use mirako::{CallContext, Client, Error, RetryPolicy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Error> {
//! let client = Client::builder()
//!     .api_key("my-key")
//!     .retry_policy(RetryPolicy::default())
//!     .build()?;
//!
//! let ctx = CallContext::new().with_timeout(Duration::from_secs(5));
//! let request = client.request(http::Method::GET, "/v1/voice/profiles");
//! match client.execute_with(&ctx, &request).await {
//!     Ok(response) => println!("{}", response.status()),
//!     Err(Error::DeadlineExceeded) => eprintln!("gave up after 5s"),
//!     Err(e) => return Err(e),
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod context;
pub mod decorate;
mod error;
mod executor;
mod observe;
mod request;
mod response;
pub mod retry;
mod transport;

pub use client::{
    Client, ClientBuilder, API_KEY_ENV, BASE_URL_ENV, DEFAULT_BASE_URL, DEFAULT_TIMEOUT,
};
pub use context::{CallContext, RequestContext};
pub use decorate::{
    decorator_fn, AuthDecorator, DecoratorChain, LoggingDecorator, RequestDecorator,
    TracingDecorator,
};
pub use error::{BoxError, Error, Result};
pub use executor::RetryingExecutor;
pub use observe::{Logger, NoopLogger, NoopTracer, Tracer, TracingLogger};
pub use request::OutboundRequest;
pub use response::{Body, Response};
pub use retry::{
    classify, is_retryable_status, AttemptFailure, AttemptOutcome, RetryOnTransient, RetryPolicy,
    RetryPolicyBuilder, RetryPredicate,
};
pub use transport::{Transport, TransportError, TransportErrorKind};
