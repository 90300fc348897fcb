//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{Method, StatusCode};
use serde_json::Value;
use tokio::net::TcpListener;

use server_skeleton::http::RouteContext;
use server_skeleton::lifecycle::{Lifecycle, NilRunDelegate, Runner};
use server_skeleton::routing::{route, Router, TableRouter};

/// Bind an ephemeral port on localhost.
pub async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

/// Start `server` under a lifecycle with the given shutdown timeout.
pub fn start<R: Runner>(server: R, shutdown_timeout: Duration) -> Arc<Lifecycle<R>> {
    let lifecycle = Arc::new(
        Lifecycle::new(Arc::new(server), Arc::new(NilRunDelegate))
            .with_shutdown_timeout(shutdown_timeout),
    );
    lifecycle.start().unwrap();
    lifecycle
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Routes used across tests:
/// - `GET /` answers `OK`
/// - `GET /slow` answers after 300ms
/// - `GET /stuck` never answers
/// - `GET /visits` counts visits in the session
/// - `GET /users/:id` echoes the id and the `greeting` query parameter
pub fn router() -> TableRouter<RouteContext> {
    let mut router = TableRouter::new();
    router
        .add_route(route(Method::GET, "/", |ctx: RouteContext| async move {
            ctx.writer.write_header(StatusCode::OK);
            ctx.writer.write("OK");
        }))
        .unwrap();
    router
        .add_route(route(Method::GET, "/slow", |ctx: RouteContext| async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            ctx.writer.write("slow");
        }))
        .unwrap();
    router
        .add_route(route(Method::GET, "/stuck", |_ctx: RouteContext| {
            std::future::pending::<()>()
        }))
        .unwrap();
    router
        .add_route(route(Method::GET, "/visits", |mut ctx: RouteContext| async move {
            let visits = ctx
                .session
                .get_value("visits")
                .and_then(|v| v.as_u64())
                .unwrap_or(0)
                + 1;
            ctx.session.set_value("visits", Value::from(visits));
            if let Err(e) = ctx.save_session().await {
                ctx.fail(&e);
                return;
            }
            ctx.writer.write(visits.to_string());
        }))
        .unwrap();
    router
        .add_route(route(Method::GET, "/users/:id", |ctx: RouteContext| async move {
            let body = format!(
                "{} {}",
                ctx.query("greeting").unwrap_or("hello"),
                ctx.param("id").unwrap_or_default()
            );
            ctx.writer.write(body);
        }))
        .unwrap();
    router
}
