//! Router adapter over [`RouteTable`].
//!
//! # Responsibilities
//! - Satisfy the server's `Router` contract by delegating to an owned table
//! - Accept only `TableRoute` values, reject everything else
//! - Return matched routes carrying captured params
//!
//! # Design Decisions
//! - Route type checked at registration via `Any`, mirroring how any foreign
//!   router would be wrapped
//! - Matched routes share the registered route through an `Arc`

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::http::Method;

use crate::routing::table::{Params, RouteTable};
use crate::routing::{handler, Handler, Route, RouteError, Router};

/// A route understood by [`TableRouter`].
pub struct TableRoute<Ctx> {
    method: Method,
    path: String,
    handler: Handler<Ctx>,
}

impl<Ctx> TableRoute<Ctx> {
    pub fn new(method: Method, path: impl Into<String>, handler: Handler<Ctx>) -> Self {
        Self {
            method,
            path: path.into(),
            handler,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl<Ctx> fmt::Debug for TableRoute<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TableRoute")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl<Ctx: 'static> Route<Ctx> for TableRoute<Ctx> {
    fn handler(&self) -> Handler<Ctx> {
        Arc::clone(&self.handler)
    }
}

/// Create a [`TableRoute`] from a method, a path pattern and an async handler.
///
/// ```ignore
/// router.add_route(route(Method::GET, "/", |ctx: RouteContext| async move {
///     ctx.writer.write("OK");
/// }))?;
/// ```
pub fn route<Ctx, F, Fut>(method: Method, path: &str, f: F) -> TableRoute<Ctx>
where
    F: Fn(Ctx) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
    Ctx: 'static,
{
    TableRoute::new(method, path, handler(f))
}

/// The result of a successful match.
pub struct MatchedRoute<Ctx> {
    route: Arc<TableRoute<Ctx>>,
    pattern: String,
    params: Params,
}

impl<Ctx> MatchedRoute<Ctx> {
    pub fn method(&self) -> &Method {
        self.route.method()
    }

    /// The registered pattern that matched, e.g. `/users/:id`.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn into_params(self) -> Params {
        self.params
    }
}

impl<Ctx> fmt::Debug for MatchedRoute<Ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchedRoute")
            .field("route", &self.route)
            .field("params", &self.params)
            .finish()
    }
}

impl<Ctx: 'static> Route<Ctx> for MatchedRoute<Ctx> {
    fn handler(&self) -> Handler<Ctx> {
        self.route.handler()
    }
}

/// [`Router`] implementation backed by a [`RouteTable`].
pub struct TableRouter<Ctx> {
    table: RouteTable<Arc<TableRoute<Ctx>>>,
}

impl<Ctx> Default for TableRouter<Ctx> {
    fn default() -> Self {
        Self {
            table: RouteTable::new(),
        }
    }
}

impl<Ctx> TableRouter<Ctx> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl<Ctx: 'static> Router<Ctx> for TableRouter<Ctx> {
    type Matched = MatchedRoute<Ctx>;

    fn add_route<T>(&mut self, route: T) -> Result<(), RouteError>
    where
        T: Route<Ctx>,
    {
        let any: Box<dyn Any> = Box::new(route);
        let route = any
            .downcast::<TableRoute<Ctx>>()
            .map_err(|_| RouteError::InvalidRoute)?;

        let method = route.method.clone();
        let path = route.path.clone();
        self.table.insert(method.clone(), &path, Arc::from(route))?;

        tracing::debug!(method = %method, path = %path, "Route registered");
        Ok(())
    }

    fn match_route(&self, method: &Method, path: &str) -> Result<MatchedRoute<Ctx>, RouteError> {
        let (route, pattern, params) = self
            .table
            .lookup(method, path)
            .ok_or(RouteError::NoRoute)?;
        Ok(MatchedRoute {
            route: Arc::clone(route),
            pattern: pattern.to_string(),
            params,
        })
    }
}
