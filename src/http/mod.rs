//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → transport.rs (Axum serve loop, timeout + trace layers)
//!     → server.rs / logging.rs (HandleRequest: one server variant)
//!     → Dispatcher: SessionStore::get → Router::match_route
//!     → delegate.rs (build the route context)
//!     → route handler writes into writer.rs (ResponseWriter)
//!     → error.rs (404 / 500 mapping on failure)
//!     → Send to client
//! ```
//!
//! # Design Decisions
//! - Routing and context types are supplied by the application
//! - Handlers write into a buffered writer, the response is built after
//!   the handler returns
//! - Both server variants share one dispatcher and one transport

pub mod context;
pub mod delegate;
pub mod error;
pub mod logging;
pub mod server;
mod transport;
pub mod writer;

pub use context::{LoggingRouteDelegate, RouteContext, RouteDelegate};
pub use delegate::{DelegateBridge, HttpServerDelegate, LoggingHttpServerDelegate};
pub use error::{DispatchError, UNAVAILABLE_MESSAGE};
pub use logging::{LoggingHttpServer, REQUEST_ID_HEADER};
pub use server::{Dispatcher, HttpServer};
pub use transport::HandleRequest;
pub use writer::ResponseWriter;

pub use axum::http::request::Parts as RequestParts;

/// Request type seen by dispatchers, delegates and session stores.
pub type Request = axum::http::Request<axum::body::Body>;
