//! Request dispatch and the plain server variant.
//!
//! # Responsibilities
//! - Resolve the session, match the route, build the context, run the handler
//! - Map dispatch failures to 404/500 responses
//! - Drive the serving loop for the lifecycle coordinator
//! - Shut the session store down once serving ends
//!
//! # Design Decisions
//! - The session is resolved before routing, unmatched requests included
//! - Exactly one handler runs per request, and none on failure
//! - Error details never reach the client, only the logs

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::response::Response;
use tokio::net::TcpListener;
use tokio::time::Instant;

use crate::config::ServerConfig;
use crate::http::delegate::HttpServerDelegate;
use crate::http::error::{error_chain, write_error, DispatchError};
use crate::http::transport::{HandleRequest, Transport};
use crate::http::{Request, ResponseWriter};
use crate::lifecycle::{Runner, ServeError, ShutdownError, ShutdownHook};
use crate::routing::{Route, Router};
use crate::session::{SessionError, SessionStore};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Session resolution and route dispatch, shared by both server variants.
pub struct Dispatcher<Ctx, R> {
    store: Arc<dyn SessionStore>,
    router: R,
    store_closed: AtomicBool,
    _ctx: PhantomData<fn() -> Ctx>,
}

impl<Ctx, R> Dispatcher<Ctx, R>
where
    Ctx: 'static,
    R: Router<Ctx>,
{
    pub fn new(store: Arc<dyn SessionStore>, router: R) -> Self {
        Self {
            store,
            router,
            store_closed: AtomicBool::new(false),
            _ctx: PhantomData,
        }
    }

    pub fn router(&self) -> &R {
        &self.router
    }

    /// Dispatch one request. On error nothing has been written to `writer`
    /// and no handler has run.
    pub async fn serve_with_delegate<D>(
        &self,
        writer: ResponseWriter,
        request: Request,
        delegate: &D,
    ) -> Result<(), DispatchError>
    where
        D: HttpServerDelegate<Ctx, R::Matched> + ?Sized,
    {
        let (parts, body) = request.into_parts();
        let session = self
            .store
            .get(&parts)
            .await
            .map_err(|e| SessionError::new("unable to get session", e))?;

        let route = self
            .router
            .match_route(&parts.method, parts.uri.path())
            .map_err(|_| DispatchError::NoRoute)?;

        let handler = route.handler();
        let ctx = delegate.generate(writer, Request::from_parts(parts, body), route, session);
        handler(ctx).await;
        Ok(())
    }

    /// Shut the session store down. Only the first call reaches the store.
    pub fn shutdown_store(&self) {
        if !self.store_closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("Shutting down session store");
            self.store.shutdown();
        }
    }
}

/// HTTP server dispatching to routes through an [`HttpServerDelegate`].
pub struct HttpServer<Ctx, R: Router<Ctx>> {
    dispatcher: Arc<Dispatcher<Ctx, R>>,
    delegate: Arc<dyn HttpServerDelegate<Ctx, R::Matched>>,
    transport: Arc<Transport>,
}

impl<Ctx, R: Router<Ctx>> Clone for HttpServer<Ctx, R> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            delegate: Arc::clone(&self.delegate),
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<Ctx, R> HttpServer<Ctx, R>
where
    Ctx: Send + 'static,
    R: Router<Ctx>,
{
    /// Create a server listening on `bind_address` with default timeouts.
    pub fn new<D>(
        bind_address: impl Into<String>,
        store: Arc<dyn SessionStore>,
        router: R,
        delegate: D,
    ) -> Self
    where
        D: HttpServerDelegate<Ctx, R::Matched>,
    {
        Self {
            dispatcher: Arc::new(Dispatcher::new(store, router)),
            delegate: Arc::new(delegate),
            transport: Arc::new(Transport::new(bind_address.into(), DEFAULT_REQUEST_TIMEOUT)),
        }
    }

    pub fn from_config<D>(
        config: &ServerConfig,
        store: Arc<dyn SessionStore>,
        router: R,
        delegate: D,
    ) -> Self
    where
        D: HttpServerDelegate<Ctx, R::Matched>,
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

    /// Serve on an already bound listener instead of binding the address.
    pub fn with_listener(self, listener: TcpListener) -> Self {
        self.transport.set_listener(listener);
        self
    }

    pub fn router(&self) -> &R {
        self.dispatcher.router()
    }

    /// Dispatch one request, returning the error instead of writing it.
    pub async fn serve(&self, writer: ResponseWriter, request: Request) -> Result<(), DispatchError> {
        self.dispatcher
            .serve_with_delegate(writer, request, self.delegate.as_ref())
            .await
    }
}

#[async_trait]
impl<Ctx, R> HandleRequest for HttpServer<Ctx, R>
where
    Ctx: Send + 'static,
    R: Router<Ctx>,
{
    async fn handle(&self, request: Request) -> Response {
        let writer = ResponseWriter::new();
        if let Err(e) = self.serve(writer.clone(), request).await {
            if !matches!(e, DispatchError::NoRoute) {
                tracing::error!(error = %error_chain(&e), "Request dispatch failed");
            }
            write_error(&writer, &e);
        }
        writer.into_response()
    }
}

#[async_trait]
impl<Ctx, R> Runner for HttpServer<Ctx, R>
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
