//! Session management subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (Cookie header)
//!     → SessionStore::get (always yields a session, new if no marker)
//!     → Session::set_value / get_value (staged in memory)
//!     → Session::save (commit to the store, Set-Cookie on the response)
//!
//! Shutdown:
//!     SessionStore::shutdown (stop background cleanup, refuse saves)
//! ```
//!
//! # Design Decisions
//! - Staged values only become visible to later requests after `save`
//! - Every request gets its own session object, never shared
//! - Persistence backend is pluggable behind `SessionStore`

pub mod memory;
pub mod null;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::http::{RequestParts, ResponseWriter};

pub use memory::{MemorySessionStore, SessionStoreError};
pub use null::NullSessionStore;

/// Boxed error used for causes coming from pluggable backends.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A session could not be retrieved or saved.
///
/// The message is safe to log; the underlying cause is available through
/// [`std::error::Error::source`].
#[derive(Debug, Error)]
#[error("{msg}")]
pub struct SessionError {
    msg: String,
    #[source]
    source: Option<BoxError>,
}

impl SessionError {
    pub fn new(msg: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self {
            msg: msg.into(),
            source: Some(source.into()),
        }
    }

    pub fn msg(msg: impl Into<String>) -> Self {
        Self {
            msg: msg.into(),
            source: None,
        }
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

/// A single session object, e.g. the user id tied to a cookie.
#[async_trait]
pub trait Session: Send + Sync {
    /// Stage a value. It does not become permanent (across requests) until
    /// [`Session::save`] is called. Last write wins per key.
    fn set_value(&mut self, key: &str, value: Value);

    /// Read a staged or previously saved value.
    fn get_value(&self, key: &str) -> Option<Value>;

    /// Commit staged values and write the session marker to the response.
    async fn save(&mut self, request: &RequestParts, writer: &ResponseWriter)
        -> Result<(), SessionError>;
}

/// Session lookup required by the server.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Return the session for the request. A session must be returned
    /// whether or not the request carries a session marker.
    async fn get(&self, request: &RequestParts) -> Result<Box<dyn Session>, BoxError>;

    /// Release backend resources. Called once when the server stops.
    fn shutdown(&self);
}
