//! Ready-made route context for servers built on [`TableRouter`].
//!
//! [`TableRouter`]: crate::routing::TableRouter

use std::collections::HashMap;
use std::error::Error as StdError;

use axum::body::Body;
use tracing::{Level, Span};

use crate::http::delegate::{HttpServerDelegate, LoggingHttpServerDelegate};
use crate::http::error::{error_chain, write_unavailable};
use crate::http::{Request, RequestParts, ResponseWriter};
use crate::observability::{SharedRequestLogger, TracingRequestLogger};
use crate::routing::{MatchedRoute, Params};
use crate::session::{Session, SessionError};

/// Everything a route handler needs for one request.
pub struct RouteContext {
    pub writer: ResponseWriter,
    pub request: RequestParts,
    pub body: Body,
    /// Pattern of the matched route, e.g. `/users/:id`.
    pub pattern: String,
    pub params: Params,
    pub query: HashMap<String, String>,
    pub session: Box<dyn Session>,
    /// Request span; disabled for servers without logging.
    pub logger: Span,
    pub request_logger: Option<SharedRequestLogger>,
}

impl RouteContext {
    pub fn new(
        writer: ResponseWriter,
        request: Request,
        route: MatchedRoute<RouteContext>,
        session: Box<dyn Session>,
    ) -> Self {
        let (request, body) = request.into_parts();
        let query = request
            .uri
            .query()
            .map(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();
        let pattern = route.pattern().to_string();

        Self {
            writer,
            request,
            body,
            pattern,
            params: route.into_params(),
            query,
            session,
            logger: Span::none(),
            request_logger: None,
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// First value of a query parameter.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// Commit staged session values. A failure here should end the request
    /// with [`RouteContext::fail`].
    pub async fn save_session(&mut self) -> Result<(), SessionError> {
        self.session.save(&self.request, &self.writer).await
    }

    /// Log `error` with its causes and answer with the opaque 500.
    pub fn fail(&self, error: &(dyn StdError + 'static)) {
        let cause = error_chain(error);
        match &self.request_logger {
            Some(logger) => logger.log(Level::ERROR, &cause),
            None => self.logger.in_scope(|| tracing::error!(error = %cause, "Route failed")),
        }
        write_unavailable(&self.writer);
    }
}

/// Builds a [`RouteContext`] for [`HttpServer`](crate::http::HttpServer).
#[derive(Debug, Default, Clone, Copy)]
pub struct RouteDelegate;

impl HttpServerDelegate<RouteContext, MatchedRoute<RouteContext>> for RouteDelegate {
    fn generate(
        &self,
        writer: ResponseWriter,
        request: Request,
        route: MatchedRoute<RouteContext>,
        session: Box<dyn Session>,
    ) -> RouteContext {
        RouteContext::new(writer, request, route, session)
    }
}

/// Builds a [`RouteContext`] carrying the request span and logger, for
/// [`LoggingHttpServer`](crate::http::LoggingHttpServer).
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRouteDelegate;

impl LoggingHttpServerDelegate<RouteContext, MatchedRoute<RouteContext>> for LoggingRouteDelegate {
    fn request_logger(&self, request: &Request) -> SharedRequestLogger {
        std::sync::Arc::new(TracingRequestLogger::new(request))
    }

    fn generate(
        &self,
        writer: ResponseWriter,
        request: Request,
        route: MatchedRoute<RouteContext>,
        session: Box<dyn Session>,
        logger: Span,
        request_logger: SharedRequestLogger,
    ) -> RouteContext {
        RouteContext {
            logger,
            request_logger: Some(request_logger),
            ..RouteContext::new(writer, request, route, session)
        }
    }
}
