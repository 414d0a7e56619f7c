use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use geocache_core::mocks::{FlakyStateStore, MockUpstream};
use geocache_core::traits::StateStore;
use geocache_gateway::{GatewayConfig, GatewayServer, ProxyPipeline};
use geocache_store::{InMemoryStateStore, ResponseCache, ThrottleGate};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn app(store: Arc<dyn StateStore>, upstream: Arc<MockUpstream>) -> axum::Router {
    let cache = ResponseCache::new(store.clone());
    let throttle = ThrottleGate::new(store, Duration::from_millis(20));
    let pipeline = Arc::new(ProxyPipeline::new(cache, throttle, upstream));
    GatewayServer::new(GatewayConfig::default(), pipeline).build_router()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("User-Agent", "gateway-test")
        .body(Body::empty())
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

#[tokio::test]
async fn test_home_endpoint() {
    let app = app(
        Arc::new(InMemoryStateStore::new()),
        Arc::new(MockUpstream::json("{}")),
    );

    let response = app.oneshot(get("/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"ok");
}

#[tokio::test]
async fn test_reverse_miss_then_hit() {
    let upstream = Arc::new(MockUpstream::json("{\"display_name\":\"London\"}"));
    let app = app(Arc::new(InMemoryStateStore::new()), upstream.clone());

    let first = app
        .clone()
        .oneshot(get("/reverse?lat=51.5&lon=-0.1&format=json"))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    assert!(first.headers().get("x-cached-response").is_none());
    assert_eq!(
        first.headers()["content-type"],
        "application/json; charset=utf-8"
    );
    assert_eq!(body_bytes(first).await, b"{\"display_name\":\"London\"}");

    // Same fingerprint, different order and an extra field.
    let second = app
        .oneshot(get("/reverse?format=json&email=a%40b.c&lon=-0.1&lat=51.5"))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(second.headers()["x-cached-response"], "True");
    assert!(second.headers().get("x-cache-timestamp").is_some());
    assert_eq!(body_bytes(second).await, b"{\"display_name\":\"London\"}");

    assert_eq!(upstream.call_count(), 1);
    let call = &upstream.calls()[0];
    assert_eq!(call.path_and_query, "/reverse?lat=51.5&lon=-0.1&format=json");
    assert!(call
        .headers
        .iter()
        .any(|(k, v)| k == "user-agent" && v == "gateway-test"));
}

#[tokio::test]
async fn test_upstream_status_is_passed_through() {
    let upstream = Arc::new(MockUpstream::new(
        404,
        "text/html; charset=utf-8",
        "<html>not found</html>",
    ));
    let app = app(Arc::new(InMemoryStateStore::new()), upstream);

    let response = app.oneshot(get("/reverse?lat=0&lon=0")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.headers()["content-type"], "text/html; charset=utf-8");
    assert_eq!(body_bytes(response).await, b"<html>not found</html>");
}

#[tokio::test]
async fn test_upstream_failure_is_bad_gateway() {
    let app = app(
        Arc::new(InMemoryStateStore::new()),
        Arc::new(MockUpstream::failing("dns error")),
    );

    let response = app.oneshot(get("/reverse?lat=1&lon=1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let json: Value = serde_json::from_slice(&body_bytes(response).await).unwrap();
    assert_eq!(json["code"], "UPSTREAM_UNAVAILABLE");
    assert!(json["trace_id"].is_string());
}

#[tokio::test]
async fn test_store_failure_is_service_unavailable() {
    let flaky = Arc::new(FlakyStateStore::new(Arc::new(InMemoryStateStore::new())));
    flaky.fail_reads(true);
    let upstream = Arc::new(MockUpstream::json("{}"));
    let app = app(flaky, upstream.clone());

    let response = app.oneshot(get("/reverse?lat=1&lon=1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(upstream.call_count(), 0);
}

#[tokio::test]
async fn test_hit_served_while_miss_waits_on_throttle() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let upstream = Arc::new(MockUpstream::json("{}"));
    let cache = ResponseCache::new(store.clone());
    let throttle = ThrottleGate::new(store.clone(), Duration::from_millis(500));
    let pipeline = Arc::new(ProxyPipeline::new(cache, throttle, upstream.clone()));
    let app = GatewayServer::new(GatewayConfig::default(), pipeline).build_router();

    // Warm one key; this also records the upstream call time.
    app.clone().oneshot(get("/reverse?lat=1&lon=1")).await.unwrap();

    // A different key now has to wait ~500ms.
    let waiting = tokio::spawn(app.clone().oneshot(get("/reverse?lat=2&lon=2")));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let started = std::time::Instant::now();
    let hit = app.oneshot(get("/reverse?lat=1&lon=1")).await.unwrap();
    assert_eq!(hit.headers()["x-cached-response"], "True");
    assert!(started.elapsed() < Duration::from_millis(250));

    assert_eq!(waiting.await.unwrap().unwrap().status(), StatusCode::OK);
    assert_eq!(upstream.call_count(), 2);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
    let cache = ResponseCache::new(store.clone());
    let throttle = ThrottleGate::new(store, Duration::from_millis(20));
    let pipeline = Arc::new(ProxyPipeline::new(
        cache,
        throttle,
        Arc::new(MockUpstream::json("{}")),
    ));
    let handle = PrometheusBuilder::new().build_recorder().handle();

    let with_metrics = GatewayServer::new(GatewayConfig::default(), pipeline.clone())
        .with_metrics(handle)
        .build_router();
    let response = with_metrics.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let without = GatewayServer::new(GatewayConfig::default(), pipeline).build_router();
    let response = without.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
