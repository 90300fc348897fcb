//! Contracts between the lifecycle coordinator and what it drives.

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::time::Instant;

use crate::lifecycle::ShutdownSignal;
use crate::session::BoxError;

/// Callback registered with [`Runner::run`] and invoked when shutdown begins.
pub type ShutdownHook = Box<dyn FnOnce() + Send + 'static>;

/// Background routine started alongside the serving loop.
///
/// Each routine gets its own subscription to the shared shutdown signal and
/// must return promptly once it fires.
pub type RunRoutine = Arc<dyn Fn(ShutdownSignal) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap an async closure as a [`RunRoutine`].
pub fn routine<F, Fut>(f: F) -> RunRoutine
where
    F: Fn(ShutdownSignal) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |signal: ShutdownSignal| -> BoxFuture<'static, ()> { Box::pin(f(signal)) })
}

/// The serving loop stopped for a reason other than a requested shutdown.
#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("serve loop failed: {0}")]
    Io(#[from] io::Error),

    #[error("server is already running")]
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("in-flight work did not finish before the shutdown deadline")]
    DeadlineExceeded,

    #[error("runner shutdown failed: {0}")]
    Failed(#[source] BoxError),
}

/// Something the lifecycle coordinator can start and stop, normally a server.
#[async_trait]
pub trait Runner: Send + Sync + 'static {
    /// Serve until shut down. `Ok(())` means the loop closed because a
    /// shutdown was requested; any `Err` is fatal.
    ///
    /// `on_shutdown` hooks are invoked once, when shutdown begins.
    async fn run(&self, on_shutdown: Vec<ShutdownHook>) -> Result<(), ServeError>;

    /// Stop accepting work and wait for in-flight work until `deadline`.
    async fn shutdown(&self, deadline: Instant) -> Result<(), ShutdownError>;
}

/// Customization points of the lifecycle.
///
/// Every method has a default, so `impl RunDelegate for T {}` is a valid
/// delegate that runs no extra routines and adds no behavior.
#[async_trait]
pub trait RunDelegate: Send + Sync + 'static {
    /// Routines started concurrently with the serving loop.
    fn routines(&self) -> Vec<RunRoutine> {
        Vec::new()
    }

    /// Wraps the serving loop. Must drive `run` to completion.
    async fn wrap_run(
        &self,
        run: BoxFuture<'_, Result<(), ServeError>>,
    ) -> Result<(), ServeError> {
        run.await
    }

    /// Wraps the shutdown sequence. Must drive `shutdown` to completion.
    async fn wrap_shutdown(
        &self,
        shutdown: BoxFuture<'_, Result<(), ShutdownError>>,
    ) -> Result<(), ShutdownError> {
        shutdown.await
    }
}

/// Delegate with no routines and pass-through wrappers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NilRunDelegate;

impl RunDelegate for NilRunDelegate {}

/// Delegate that logs the start and end of serving and shutdown.
#[derive(Default, Clone)]
pub struct LoggingRunDelegate {
    routines: Vec<RunRoutine>,
}

impl LoggingRunDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_routine(mut self, routine: RunRoutine) -> Self {
        self.routines.push(routine);
        self
    }
}

#[async_trait]
impl RunDelegate for LoggingRunDelegate {
    fn routines(&self) -> Vec<RunRoutine> {
        self.routines.clone()
    }

    async fn wrap_run(
        &self,
        run: BoxFuture<'_, Result<(), ServeError>>,
    ) -> Result<(), ServeError> {
        tracing::info!(routines = self.routines.len(), "Server starting");
        let result = run.await;
        match &result {
            Ok(()) => tracing::info!("Server closed"),
            Err(e) => tracing::error!(error = %e, "Server stopped unexpectedly"),
        }
        result
    }

    async fn wrap_shutdown(
        &self,
        shutdown: BoxFuture<'_, Result<(), ShutdownError>>,
    ) -> Result<(), ShutdownError> {
        let start = StdInstant::now();
        tracing::info!("Shutting down");
        let result = shutdown.await;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => tracing::info!(elapsed_ms, "Shutdown finished"),
            Err(e) => tracing::error!(error = %e, elapsed_ms, "Shutdown failed"),
        }
        result
    }
}
