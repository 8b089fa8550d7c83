//! Observer capabilities: request logging and span-style tracing.
//!
//! Both default to null implementations, so an unconfigured client pays
//! nothing beyond a virtual call.

use std::fmt;

use crate::{context::RequestContext, request::OutboundRequest, Response};

/// A sink for human-readable pipeline messages.
///
/// Messages arrive as [`fmt::Arguments`] and are only formatted if the sink
/// chooses to.
///
/// # Examples
///
/// ```
/// use mirako::Logger;
/// use std::fmt;
///
/// struct Stderr;
///
/// impl Logger for Stderr {
///     fn log(&self, message: fmt::Arguments<'_>) {
///         eprintln!("[mirako] {}", message);
///     }
/// }
/// ```
pub trait Logger: Send + Sync {
    /// Receives one message.
    fn log(&self, message: fmt::Arguments<'_>);
}

/// Discards every message. The default logger.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _message: fmt::Arguments<'_>) {}
}

/// Forwards messages to `tracing` at `INFO` level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: fmt::Arguments<'_>) {
        tracing::info!(target: "mirako::request", "{}", message);
    }
}

/// Observes each physical attempt.
///
/// `trace_request` runs as the last step of decoration, right before the send.
/// `trace_response` runs when the transport returns a response, including
/// responses that are about to be retried.
pub trait Tracer: Send + Sync {
    /// Called before the request is sent.
    fn trace_request(&self, ctx: &RequestContext<'_>, request: &OutboundRequest) {
        let _ = (ctx, request);
    }

    /// Called after a response is received.
    fn trace_response(&self, ctx: &RequestContext<'_>, response: &Response) {
        let _ = (ctx, response);
    }
}

/// Ignores every notification. The default tracer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl Tracer for NoopTracer {}
