//! Listener and serving loop shared by both server variants.
//!
//! # Responsibilities
//! - Bind (or adopt a pre-bound listener) and serve with Axum
//! - Stop accepting on shutdown and wait for in-flight requests
//! - Run registered shutdown hooks exactly once
//!
//! # Design Decisions
//! - Every request lands in one fallback handler; routing is ours, not Axum's
//! - Shutdown before run makes the later run a no-op that reports closed
//! - Waiting for in-flight requests is bounded by the caller's deadline

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::response::Response;
use tokio::net::TcpListener;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::http::Request;
use crate::lifecycle::{ServeError, ShutdownError, ShutdownHook};

/// Turns one request into one response.
#[async_trait]
pub trait HandleRequest: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}

#[derive(Default)]
struct RunState {
    started: bool,
    hooks: Vec<ShutdownHook>,
}

pub(crate) struct Transport {
    bind_address: String,
    request_timeout: Duration,
    listener: Mutex<Option<TcpListener>>,
    closing: CancellationToken,
    finished: CancellationToken,
    state: Mutex<RunState>,
}

impl Transport {
    pub(crate) fn new(bind_address: String, request_timeout: Duration) -> Self {
        Self {
            bind_address,
            request_timeout,
            listener: Mutex::new(None),
            closing: CancellationToken::new(),
            finished: CancellationToken::new(),
            state: Mutex::new(RunState::default()),
        }
    }

    pub(crate) fn set_listener(&self, listener: TcpListener) {
        *self.listener.lock().unwrap_or_else(PoisonError::into_inner) = Some(listener);
    }

    fn state(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) async fn serve<H: HandleRequest>(
        &self,
        handler: Arc<H>,
        hooks: Vec<ShutdownHook>,
    ) -> Result<(), ServeError> {
        {
            let mut state = self.state();
            if self.closing.is_cancelled() {
                tracing::debug!("Shutdown requested before start, not serving");
                return Ok(());
            }
            if state.started {
                return Err(ServeError::AlreadyRunning);
            }
            state.started = true;
            state.hooks = hooks;
        }
        let _finished = self.finished.clone().drop_guard();

        let prebound = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let listener = match prebound {
            Some(listener) => listener,
            None => TcpListener::bind(&self.bind_address)
                .await
                .map_err(|source| ServeError::Bind {
                    address: self.bind_address.clone(),
                    source,
                })?,
        };

        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            request_timeout_secs = self.request_timeout.as_secs(),
            "HTTP server starting"
        );

        axum::serve(listener, self.app(handler))
            .with_graceful_shutdown(self.closing.clone().cancelled_owned())
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    #[allow(deprecated)]
    fn app<H: HandleRequest>(&self, handler: Arc<H>) -> axum::Router {
        axum::Router::new()
            .fallback(dispatch::<H>)
            .with_state(handler)
            .layer(TimeoutLayer::new(self.request_timeout))
            .layer(TraceLayer::new_for_http())
    }

    pub(crate) async fn shutdown(&self, deadline: Instant) -> Result<(), ShutdownError> {
        self.closing.cancel();
        let (started, hooks) = {
            let mut state = self.state();
            (state.started, std::mem::take(&mut state.hooks))
        };
        for hook in hooks {
            hook();
        }

        if !started {
            return Ok(());
        }
        time::timeout_at(deadline, self.finished.cancelled())
            .await
            .map_err(|_| ShutdownError::DeadlineExceeded)
    }
}

async fn dispatch<H: HandleRequest>(State(handler): State<Arc<H>>, request: Request) -> Response {
    handler.handle(request).await
}
