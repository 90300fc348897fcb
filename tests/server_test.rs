//! End-to-end tests for both server variants over real sockets.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::header;

use server_skeleton::config::ServerConfig;
use server_skeleton::http::{
    HttpServer, LoggingHttpServer, LoggingRouteDelegate, RequestParts, RouteDelegate,
    REQUEST_ID_HEADER, UNAVAILABLE_MESSAGE,
};
use server_skeleton::lifecycle::{LifecycleError, LifecycleState};
use server_skeleton::session::{
    BoxError, MemorySessionStore, NullSessionStore, Session, SessionStore,
};

mod common;

const SECRET: &str = "dGVzdC1zZWNyZXQtdGVzdC1zZWNyZXQtdGVzdC1zZWNyZXQ=";

struct UnavailableStore;

#[async_trait]
impl SessionStore for UnavailableStore {
    async fn get(&self, _: &RequestParts) -> Result<Box<dyn Session>, BoxError> {
        Err("dial tcp 10.1.2.3:6379: connection refused".into())
    }

    fn shutdown(&self) {}
}

#[tokio::test]
async fn test_root_route_answers_ok() {
    let (listener, addr) = common::bind().await;
    let server = HttpServer::from_config(
        &ServerConfig::default(),
        Arc::new(NullSessionStore),
        common::router(),
        RouteDelegate,
    )
    .with_listener(listener);
    let lifecycle = common::start(server, Duration::from_secs(5));

    let res = common::client()
        .get(format!("http://{}/", addr))
        .send()
        .await
        .expect("Server unreachable");
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "OK");

    let res = common::client()
        .get(format!("http://{}/users/42?greeting=hi", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "hi 42");

    lifecycle.shutdown().await.unwrap();
    assert_eq!(lifecycle.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (listener, addr) = common::bind().await;
    let server = HttpServer::from_config(
        &ServerConfig::default(),
        Arc::new(NullSessionStore),
        common::router(),
        RouteDelegate,
    )
    .with_listener(listener);
    let lifecycle = common::start(server, Duration::from_secs(5));

    let client = common::client();
    let res = client
        .get(format!("http://{}/does-not-exist", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let res = client.post(format!("http://{}/", addr)).send().await.unwrap();
    assert_eq!(res.status(), 404);

    lifecycle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_session_failure_is_opaque_500() {
    let (listener, addr) = common::bind().await;
    let server = HttpServer::from_config(
        &ServerConfig::default(),
        Arc::new(UnavailableStore),
        common::router(),
        RouteDelegate,
    )
    .with_listener(listener);
    let lifecycle = common::start(server, Duration::from_secs(5));

    let res = common::client()
        .get(format!("http://{}/", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    let body = res.text().await.unwrap();
    assert_eq!(body, UNAVAILABLE_MESSAGE);
    assert!(!body.contains("10.1.2.3"));

    lifecycle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_logging_server_sets_request_id() {
    let (listener, addr) = common::bind().await;
    let server = LoggingHttpServer::from_config(
        &ServerConfig::default(),
        Arc::new(NullSessionStore),
        common::router(),
        LoggingRouteDelegate,
    )
    .with_listener(listener);
    let lifecycle = common::start(server, Duration::from_secs(5));

    let client = common::client();
    let ok = client.get(format!("http://{}/", addr)).send().await.unwrap();
    let missing = client
        .get(format!("http://{}/missing", addr))
        .send()
        .await
        .unwrap();

    assert_eq!(ok.status(), 200);
    assert_eq!(missing.status(), 404);
    let first = ok.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string();
    let second = missing.headers()[REQUEST_ID_HEADER].to_str().unwrap().to_string();
    assert!(uuid::Uuid::parse_str(&first).is_ok());
    assert_ne!(first, second);

    lifecycle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_session_survives_across_requests() {
    let (listener, addr) = common::bind().await;
    let store = MemorySessionStore::new("sid", &[SECRET]).unwrap();
    let server = HttpServer::from_config(
        &ServerConfig::default(),
        Arc::new(store.clone()),
        common::router(),
        RouteDelegate,
    )
    .with_listener(listener);
    let lifecycle = common::start(server, Duration::from_secs(5));

    let client = common::client();
    let first = client
        .get(format!("http://{}/visits", addr))
        .send()
        .await
        .unwrap();
    let cookie = first.headers()[header::SET_COOKIE]
        .to_str()
        .unwrap()
        .split(';')
        .next()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("sid="));
    assert_eq!(first.text().await.unwrap(), "1");

    let second = client
        .get(format!("http://{}/visits", addr))
        .header(header::COOKIE, &cookie)
        .send()
        .await
        .unwrap();
    assert_eq!(second.text().await.unwrap(), "2");
    assert_eq!(store.len(), 1);

    lifecycle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_request() {
    let (listener, addr) = common::bind().await;
    let server = HttpServer::from_config(
        &ServerConfig::default(),
        Arc::new(NullSessionStore),
        common::router(),
        RouteDelegate,
    )
    .with_listener(listener);
    let lifecycle = common::start(server, Duration::from_secs(5));

    let pending = tokio::spawn(async move {
        common::client()
            .get(format!("http://{}/slow", addr))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    lifecycle.shutdown().await.unwrap();

    let res = pending.await.unwrap().expect("in-flight request dropped");
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "slow");
}

#[tokio::test]
async fn test_stuck_request_bounded_by_deadline() {
    let (listener, addr) = common::bind().await;
    let server = HttpServer::from_config(
        &ServerConfig::default(),
        Arc::new(NullSessionStore),
        common::router(),
        RouteDelegate,
    )
    .with_listener(listener);
    let deadline = Duration::from_millis(300);
    let lifecycle = common::start(server, deadline);

    let _stuck = tokio::spawn(async move {
        common::client()
            .get(format!("http://{}/stuck", addr))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    let result = lifecycle.shutdown().await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(LifecycleError::ShutdownTimedOut { .. })));
    assert!(elapsed >= deadline);
    assert!(elapsed < Duration::from_secs(5));
    assert_eq!(lifecycle.state(), LifecycleState::Failed);
}

#[tokio::test]
async fn test_failed_session_save_is_opaque_500() {
    let (listener, addr) = common::bind().await;
    let store = MemorySessionStore::new("sid", &[SECRET]).unwrap();
    let server = LoggingHttpServer::from_config(
        &ServerConfig::default(),
        Arc::new(store.clone()),
        common::router(),
        LoggingRouteDelegate,
    )
    .with_listener(listener);
    let lifecycle = common::start(server, Duration::from_secs(5));

    store.shutdown();
    let res = common::client()
        .get(format!("http://{}/visits", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 500);
    assert!(res.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(res.text().await.unwrap(), UNAVAILABLE_MESSAGE);
    assert!(store.is_empty());

    lifecycle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_no_new_connections_once_shutdown_begins() {
    let (listener, addr) = common::bind().await;
    let server = HttpServer::from_config(
        &ServerConfig::default(),
        Arc::new(NullSessionStore),
        common::router(),
        RouteDelegate,
    )
    .with_listener(listener);
    let lifecycle = common::start(server, Duration::from_secs(5));

    let in_flight = tokio::spawn(async move {
        common::client()
            .get(format!("http://{}/slow", addr))
            .send()
            .await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stopping = {
        let lifecycle = lifecycle.clone();
        tokio::spawn(async move { lifecycle.shutdown().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Still draining the slow request, but no longer accepting
    let refused = common::client()
        .get(format!("http://{}/", addr))
        .send()
        .await;
    assert!(refused.is_err());

    let res = in_flight.await.unwrap().expect("in-flight request dropped");
    assert_eq!(res.text().await.unwrap(), "slow");
    stopping.await.unwrap().unwrap();

    let after = common::client()
        .get(format!("http://{}/", addr))
        .send()
        .await;
    assert!(after.is_err());
}
