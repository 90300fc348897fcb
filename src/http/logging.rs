//! Server variant with request ids and per-request logging.
//!
//! # Data Flow
//! ```text
//! Request
//!     → request-id header (uuid v4) + request logger (timer started)
//!     → request span {request_id, method, path}
//!     → Dispatcher::serve_with_delegate (via DelegateBridge)
//!     → 404 / 500 mapping, failures logged inside the span
//!     → request logger: status, completion line, metrics
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use axum::response::Response;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tracing::{Instrument, Level};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::http::delegate::{DelegateBridge, LoggingHttpServerDelegate};
use crate::http::error::{error_chain, write_error, DispatchError};
use crate::http::server::Dispatcher;
use crate::http::transport::{HandleRequest, Transport};
use crate::http::{Request, ResponseWriter};
use crate::lifecycle::{Runner, ServeError, ShutdownError, ShutdownHook};
use crate::routing::Router;
use crate::session::SessionStore;

/// Response header carrying the id generated for each request.
pub const REQUEST_ID_HEADER: &str = "request-id";

/// HTTP server that tags every request with an id and logs its outcome.
pub struct LoggingHttpServer<Ctx, R: Router<Ctx>> {
    dispatcher: Arc<Dispatcher<Ctx, R>>,
    delegate: Arc<dyn LoggingHttpServerDelegate<Ctx, R::Matched>>,
    transport: Arc<Transport>,
}

impl<Ctx, R: Router<Ctx>> Clone for LoggingHttpServer<Ctx, R> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            delegate: Arc::clone(&self.delegate),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<Ctx, R> LoggingHttpServer<Ctx, R>
where
    Ctx: Send + 'static,
    R: Router<Ctx>,
{
    pub fn from_config<D>(
        config: &ServerConfig,
        store: Arc<dyn SessionStore>,
        router: R,
        delegate: D,
    ) -> Self
    where
        D: LoggingHttpServerDelegate<Ctx, R::Matched>,
    {
        Self {
            dispatcher: Arc::new(Dispatcher::new(store, router)),
            delegate: Arc::new(delegate),
            transport: Arc::new(Transport::new(
                config.listener.bind_address.clone(),
                config.timeouts.request(),
            )),
        }
    }

    pub fn with_listener(self, listener: TcpListener) -> Self {
        self.transport.set_listener(listener);
        self
    }

    pub fn router(&self) -> &R {
        self.dispatcher.router()
    }
}

#[async_trait]
impl<Ctx, R> HandleRequest for LoggingHttpServer<Ctx, R>
where
    Ctx: Send + 'static,
    R: Router<Ctx>,
{
    async fn handle(&self, request: Request) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let writer = ResponseWriter::new();
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            writer.insert_header(HeaderName::from_static(REQUEST_ID_HEADER), value);
        }

        let request_logger = self.delegate.request_logger(&request);
        request_logger.start_timer();

        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
        );
        let bridge = DelegateBridge::new(
            Arc::clone(&self.delegate),
            span.clone(),
            Arc::clone(&request_logger),
        );

        let result = self
            .dispatcher
            .serve_with_delegate(writer.clone(), request, &bridge)
            .instrument(span.clone())
            .await;

        span.in_scope(|| {
            if let Err(e) = &result {
                match e {
                    DispatchError::NoRoute => tracing::warn!("Could not find route"),
                    _ => request_logger.log(Level::ERROR, &error_chain(e)),
                }
                write_error(&writer, e);
            }
            request_logger.set_status(writer.status());
            request_logger.finish();
        });

        writer.into_response()
    }
}

#[async_trait]
impl<Ctx, R> Runner for LoggingHttpServer<Ctx, R>
where
    Ctx: Send + 'static,
    R: Router<Ctx>,
{
    async fn run(&self, on_shutdown: Vec<ShutdownHook>) -> Result<(), ServeError> {
        let result = self
            .transport
            .serve(Arc::new(self.clone()), on_shutdown)
            .await;
        if !matches!(result, Err(ServeError::AlreadyRunning)) {
            self.dispatcher.shutdown_store();
        }
        result
    }

    async fn shutdown(&self, deadline: Instant) -> Result<(), ShutdownError> {
        self.transport.shutdown(deadline).await
    }
}
