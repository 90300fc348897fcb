//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Setup:
//!     TableRoute (method, pattern, handler)
//!     → router.rs (TableRouter::add_route, type checked)
//!     → table.rs (compiled pattern, specificity ordered)
//!     → Freeze as immutable router shared via Arc
//!
//! Per request:
//!     (method, path)
//!     → Router::match_route
//!     → Return: matched route (handler + captured params) or RouteError::NoRoute
//! ```
//!
//! # Design Decisions
//! - The server only depends on the `Router` and `Route` contracts below;
//!   any router can be used by wrapping it in an adapter
//! - Routes compiled at setup, immutable while serving (thread-safe without locks)
//! - Deterministic: same input always matches same route
//! - Explicit NoRoute rather than silent default

pub mod router;
pub mod table;

use std::future::Future;
use std::sync::Arc;

use axum::http::Method;
use futures_util::future::BoxFuture;
use thiserror::Error;

pub use router::{route, MatchedRoute, TableRoute, TableRouter};
pub use table::{Params, RouteTable};

/// Route handler operating on a request context.
///
/// Handlers do not return errors; failures are written to the response by
/// the handler itself.
pub type Handler<Ctx> = Arc<dyn Fn(Ctx) -> BoxFuture<'static, ()> + Send + Sync>;

/// Build a [`Handler`] from an async function or closure.
pub fn handler<Ctx, F, Fut>(f: F) -> Handler<Ctx>
where
    F: Fn(Ctx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    Ctx: 'static,
{
    Arc::new(move |ctx: Ctx| -> BoxFuture<'static, ()> { Box::pin(f(ctx)) })
}

/// Errors produced while registering or matching routes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// Nothing matched the method and path.
    #[error("could not find route")]
    NoRoute,

    /// The route's concrete type is not supported by the router.
    #[error("invalid route")]
    InvalidRoute,

    /// The path pattern could not be compiled.
    #[error("invalid route pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    /// A route with the same method and pattern already exists.
    #[error("route {method} {pattern} is already registered")]
    Conflict { method: Method, pattern: String },
}

/// What the router hands back to the server: something with a handler.
pub trait Route<Ctx>: Send + Sync + 'static {
    fn handler(&self) -> Handler<Ctx>;
}

/// Route organisation required by the server.
///
/// If a router does not fit this mold, wrap it in an adapter that does.
pub trait Router<Ctx>: Send + Sync + 'static {
    /// Route type returned by [`Router::match_route`]. It may carry match
    /// results such as captured path parameters.
    type Matched: Route<Ctx>;

    /// Add a route. The added route does *not* need to be the matched type,
    /// but routers may reject types they cannot store with
    /// [`RouteError::InvalidRoute`]. A failed call leaves the router unchanged.
    fn add_route<T>(&mut self, route: T) -> Result<(), RouteError>
    where
        T: Route<Ctx>;

    /// Match the method and path to a route, or fail with
    /// [`RouteError::NoRoute`].
    fn match_route(&self, method: &Method, path: &str) -> Result<Self::Matched, RouteError>;
}
