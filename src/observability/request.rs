//! Per-request logging.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use axum::http::{Method, StatusCode};
use tracing::Level;

use crate::http::Request;
use crate::observability::metrics;

/// Accumulates facts about one request and emits a completion line.
pub trait RequestLogger: Send + Sync {
    fn start_timer(&self);
    fn set_status(&self, status: StatusCode);
    /// Mark the response as served from a cache.
    fn set_cached(&self, cached: bool);
    fn log(&self, level: Level, message: &str);
    /// Emit the completion line. Only the first call has an effect.
    fn finish(&self);
}

pub type SharedRequestLogger = Arc<dyn RequestLogger>;

#[derive(Debug, Default)]
struct State {
    started: Option<Instant>,
    status: Option<StatusCode>,
    cached: bool,
    finished: bool,
}

/// [`RequestLogger`] emitting `tracing` events and request metrics.
///
/// Events are attached to whatever span is current when they are emitted,
/// so callers enter the request span first.
#[derive(Debug)]
pub struct TracingRequestLogger {
    method: Method,
    path: String,
    state: Mutex<State>,
}

impl TracingRequestLogger {
    pub fn new(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.state().started.map(|started| started.elapsed())
    }
}

impl RequestLogger for TracingRequestLogger {
    fn start_timer(&self) {
        self.state().started = Some(Instant::now());
    }

    fn set_status(&self, status: StatusCode) {
        self.state().status = Some(status);
    }

    fn set_cached(&self, cached: bool) {
        self.state().cached = cached;
    }

    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(method = %self.method, path = %self.path, "{message}"),
            Level::WARN => tracing::warn!(method = %self.method, path = %self.path, "{message}"),
            Level::INFO => tracing::info!(method = %self.method, path = %self.path, "{message}"),
            Level::DEBUG => tracing::debug!(method = %self.method, path = %self.path, "{message}"),
            _ => tracing::trace!(method = %self.method, path = %self.path, "{message}"),
        }
    }

    fn finish(&self) {
        let (started, status, cached) = {
            let mut state = self.state();
            if state.finished {
                return;
            }
            state.finished = true;
            (
                state.started.unwrap_or_else(Instant::now),
                state.status.unwrap_or(StatusCode::OK),
                state.cached,
            )
        };

        let latency_ms = started.elapsed().as_millis() as u64;
        if status.is_server_error() {
            tracing::error!(
                method = %self.method,
                path = %self.path,
                status = status.as_u16(),
                latency_ms,
                cached,
                "Request failed"
            );
        } else {
            tracing::info!(
                method = %self.method,
                path = %self.path,
                status = status.as_u16(),
                latency_ms,
                cached,
                "Request completed"
            );
        }
        metrics::record_request(self.method.as_str(), status.as_u16(), started);
    }
}
