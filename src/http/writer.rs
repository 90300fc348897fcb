//! Buffered response writer handed to delegates and route handlers.
//!
//! # Responsibilities
//! - Collect status, headers and body written during one dispatch
//! - Convert the collected parts into an HTTP response afterwards
//!
//! # Design Decisions
//! - Cheap to clone; every clone writes into the same response
//! - The first explicit status wins, later ones are ignored with a warning
//! - Writing body bytes without a status implies 200 OK

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};

#[derive(Debug, Default)]
struct Buffered {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: Vec<u8>,
}

/// Response under construction for a single request.
#[derive(Debug, Clone, Default)]
pub struct ResponseWriter {
    inner: Arc<Mutex<Buffered>>,
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Buffered> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the response status. Only the first call has an effect.
    pub fn write_header(&self, status: StatusCode) {
        let mut buffered = self.lock();
        match buffered.status {
            None => buffered.status = Some(status),
            Some(existing) => {
                tracing::warn!(
                    existing = %existing,
                    ignored = %status,
                    "Superfluous write_header call"
                );
            }
        }
    }

    /// Append bytes to the response body.
    pub fn write(&self, bytes: impl AsRef<[u8]>) {
        let mut buffered = self.lock();
        buffered.status.get_or_insert(StatusCode::OK);
        buffered.body.extend_from_slice(bytes.as_ref());
    }

    /// Replace a response header.
    pub fn insert_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().headers.insert(name, value);
    }

    /// Add a response header, keeping existing values with the same name.
    pub fn append_header(&self, name: HeaderName, value: HeaderValue) {
        self.lock().headers.append(name, value);
    }

    /// Snapshot of the headers written so far.
    pub fn headers(&self) -> HeaderMap {
        self.lock().headers.clone()
    }

    /// Status that will be sent, 200 if nothing was written yet.
    pub fn status(&self) -> StatusCode {
        self.lock().status.unwrap_or(StatusCode::OK)
    }

    /// Whether a status has been committed.
    pub fn is_written(&self) -> bool {
        self.lock().status.is_some()
    }

    /// Take everything written so far and turn it into a response.
    ///
    /// Clones still held elsewhere (for example by a spawned task) keep
    /// writing into an empty buffer afterwards.
    pub fn into_response(self) -> Response<Body> {
        let buffered = std::mem::take(&mut *self.lock());
        let mut response = Response::new(Body::from(buffered.body));
        *response.status_mut() = buffered.status.unwrap_or(StatusCode::OK);
        *response.headers_mut() = buffered.headers;
        response
    }
}
