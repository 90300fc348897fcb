//! Context generation hooks for the two server variants.
//!
//! # Responsibilities
//! - Build the application context handed to a matched route's handler
//! - Adapt the logging-aware delegate to the plain dispatch path
//!
//! # Design Decisions
//! - Plain closures are delegates too, so small servers need no type
//! - The bridge carries the per-request span and logger, which is the only
//!   difference between the two dispatch paths

use std::sync::Arc;

use tracing::Span;

use crate::http::{Request, ResponseWriter};
use crate::observability::SharedRequestLogger;
use crate::session::Session;

/// Builds the context for a matched route.
pub trait HttpServerDelegate<Ctx, R>: Send + Sync + 'static {
    fn generate(
        &self,
        writer: ResponseWriter,
        request: Request,
        route: R,
        session: Box<dyn Session>,
    ) -> Ctx;
}

impl<Ctx, R, F> HttpServerDelegate<Ctx, R> for F
where
    F: Fn(ResponseWriter, Request, R, Box<dyn Session>) -> Ctx + Send + Sync + 'static,
{
    fn generate(
        &self,
        writer: ResponseWriter,
        request: Request,
        route: R,
        session: Box<dyn Session>,
    ) -> Ctx {
        self(writer, request, route, session)
    }
}

/// Delegate for the logging server variant.
pub trait LoggingHttpServerDelegate<Ctx, R>: Send + Sync + 'static {
    /// Create the logger that tracks this request until it finishes.
    fn request_logger(&self, request: &Request) -> SharedRequestLogger;

    /// Like [`HttpServerDelegate::generate`], plus the request span
    /// (carrying the request id) and the request logger.
    fn generate(
        &self,
        writer: ResponseWriter,
        request: Request,
        route: R,
        session: Box<dyn Session>,
        logger: Span,
        request_logger: SharedRequestLogger,
    ) -> Ctx;
}

/// Presents a [`LoggingHttpServerDelegate`] as a plain
/// [`HttpServerDelegate`] for one request.
pub struct DelegateBridge<Ctx, R> {
    delegate: Arc<dyn LoggingHttpServerDelegate<Ctx, R>>,
    logger: Span,
    request_logger: SharedRequestLogger,
}

impl<Ctx, R> DelegateBridge<Ctx, R> {
    pub fn new(
        delegate: Arc<dyn LoggingHttpServerDelegate<Ctx, R>>,
        logger: Span,
        request_logger: SharedRequestLogger,
    ) -> Self {
        Self {
            delegate,
            logger,
            request_logger,
        }
    }
}

impl<Ctx: 'static, R: 'static> HttpServerDelegate<Ctx, R> for DelegateBridge<Ctx, R> {
    fn generate(
        &self,
        writer: ResponseWriter,
        request: Request,
        route: R,
        session: Box<dyn Session>,
    ) -> Ctx {
        self.delegate.generate(
            writer,
            request,
            route,
            session,
            self.logger.clone(),
            self.request_logger.clone(),
        )
    }
}
