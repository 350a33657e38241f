//! REST endpoint tests driven through the router without a TCP server.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use plotcast_fanout::{ChannelConnection, FanoutHandle, FanoutManager};
use plotcast_server::{AppState, build_router};
use plotcast_types::{ConnectionId, Topic};
use serde_json::Value;
use tower::ServiceExt;

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let (fanout, _task) = FanoutHandle::spawn(FanoutManager::new(), 8);
    let router = build_router(Arc::new(AppState::new(fanout)));

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_stats_counts_tables() {
    let (fanout, _task) = FanoutHandle::spawn(FanoutManager::new(), 8);
    let (conn, _rx) = ChannelConnection::channel(4);
    let id = fanout
        .add_connection(Box::new(conn), Some(ConnectionId::from("c1")))
        .await
        .unwrap();
    fanout.subscribe(id.clone(), Topic::from("a:1")).await.unwrap();
    fanout.subscribe(id, Topic::from("a:2")).await.unwrap();
    let router = build_router(Arc::new(AppState::new(fanout)));

    let response = router
        .oneshot(Request::get("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["connections"], 1);
    assert_eq!(json["topics"], 2);
    assert_eq!(json["subscriptions"], 2);
}

#[tokio::test]
async fn test_stats_unavailable_after_fanout_stops() {
    let (fanout, task) = FanoutHandle::spawn(FanoutManager::new(), 8);
    fanout.shutdown().await.unwrap();
    task.join().await.unwrap();
    let router = build_router(Arc::new(AppState::new(fanout)));

    let response = router
        .oneshot(Request::get("/api/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (fanout, _task) = FanoutHandle::spawn(FanoutManager::new(), 8);
    let router = build_router(Arc::new(AppState::new(fanout)));

    let response = router
        .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
