//! Generic HTTP server scaffold: pluggable routing, sessions and request
//! context, with coordinated startup and bounded graceful shutdown.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod session;

pub use config::ServerConfig;
pub use http::{HttpServer, LoggingHttpServer, ResponseWriter, RouteContext};
pub use lifecycle::{Lifecycle, LifecycleError, Runner, Shutdown};
pub use routing::{route, Route, Router, TableRouter};
pub use session::{Session, SessionStore};
