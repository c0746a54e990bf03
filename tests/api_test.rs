//! HTTP API integration tests.
//!
//! Runs the router against a [`TestRuntime`] using axum's test utilities.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use castforge::server::{create_router, AppContext, PLAYER_REDIRECT};
use common::{eventually, wait_for_state, TestRuntime, ADMIN_TOKEN};
use http_body_util::BodyExt;
use tower::ServiceExt;

fn app(t: &TestRuntime) -> Router {
    create_router(AppContext::from_runtime(&t.runtime))
}

async fn body_to_string(body: Body) -> String {
    let bytes = body.collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn get_json(app: Router, uri: &str) -> serde_json::Value {
    let response = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    serde_json::from_str(&body_to_string(response.into_body()).await).unwrap()
}

async fn admin_disconnect(app: Router, token: Option<&str>) -> (StatusCode, serde_json::Value) {
    let mut request = Request::post("/api/admin/disconnect");
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let response = app
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let json = serde_json::from_str(&body_to_string(response.into_body()).await).unwrap();
    (status, json)
}

async fn ping(app: Router, ip: &str, user_agent: &str) -> StatusCode {
    app.oneshot(
        Request::post("/api/ping")
            .header("x-forwarded-for", ip)
            .header(header::USER_AGENT, user_agent)
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap()
    .status()
}

// ---------------------------------------------------------------------------
// Health and status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_200() {
    let t = TestRuntime::start().await;
    let response = app(&t)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn status_reports_offline_after_startup() {
    let t = TestRuntime::start().await;
    let json = get_json(app(&t), "/api/status").await;

    assert_eq!(json["online"], false);
    assert_eq!(json["status"], "offline");
    assert!(json["broadcaster"].is_null());
    assert!(json["session"].is_null());
    assert_eq!(json["viewer_count"], 0);
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn status_reports_broadcaster_when_online() {
    let t = TestRuntime::start().await;
    let broadcaster = t.connect();
    wait_for_state(t.state(), |s| s.is_online()).await;

    let json = get_json(app(&t), "/api/status").await;
    assert_eq!(json["online"], true);
    assert_eq!(json["status"], "online");
    assert_eq!(
        json["broadcaster"]["session_id"],
        broadcaster.session_id.to_string()
    );
    assert_eq!(json["broadcaster"]["remote_addr"], "198.51.100.20:41000");
    assert_eq!(
        json["session"]["session_id"],
        broadcaster.session_id.to_string()
    );
}

// ---------------------------------------------------------------------------
// Viewer pings
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pings_count_distinct_viewers() {
    let t = TestRuntime::start().await;

    assert_eq!(ping(app(&t), "203.0.113.1", "VLC/3.0.18").await, StatusCode::OK);
    assert_eq!(ping(app(&t), "203.0.113.1", "VLC/3.0.18").await, StatusCode::OK);
    assert_eq!(ping(app(&t), "203.0.113.2", "VLC/3.0.18").await, StatusCode::OK);
    assert_eq!(ping(app(&t), "203.0.113.1", "mpv 0.36").await, StatusCode::OK);

    let json = get_json(app(&t), "/api/status").await;
    assert_eq!(json["viewer_count"], 3);
}

#[tokio::test]
async fn ping_without_client_details_still_counts() {
    let t = TestRuntime::start().await;
    let response = app(&t)
        .oneshot(Request::get("/api/ping").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(t.runtime.viewers.active_count(), 1);
}

// ---------------------------------------------------------------------------
// Admin disconnect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn admin_disconnect_without_broadcaster_is_400() {
    let t = TestRuntime::start().await;
    let (status, json) = admin_disconnect(app(&t), Some(ADMIN_TOKEN)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "no inbound stream connected");
}

#[tokio::test]
async fn admin_disconnect_ends_live_session() {
    let t = TestRuntime::start().await;
    let broadcaster = t.connect();
    wait_for_state(t.state(), |s| s.is_online()).await;

    let (status, json) = admin_disconnect(app(&t), Some(ADMIN_TOKEN)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "inbound stream disconnected");

    assert!(broadcaster.close.is_cancelled());
    wait_for_state(t.state(), |s| s.is_settled_offline()).await;
}

#[tokio::test]
async fn admin_disconnect_requires_token() {
    let t = TestRuntime::start().await;
    let broadcaster = t.connect();
    let online = wait_for_state(t.state(), |s| s.is_online()).await;

    for token in [None, Some("wrong-token")] {
        let (status, json) = admin_disconnect(app(&t), token).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["success"], false);
    }

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!broadcaster.close.is_cancelled());
    assert_eq!(
        t.runtime.gate.current().map(|s| s.session_id),
        Some(broadcaster.session_id)
    );
    assert_eq!(t.state().snapshot().live_job, online.live_job);
}

#[tokio::test]
async fn admin_routes_closed_without_configured_token() {
    let t = TestRuntime::with_config(|root| {
        let mut config = common::test_config(root);
        config.server.admin_token = None;
        config
    })
    .await;
    let broadcaster = t.connect();
    wait_for_state(t.state(), |s| s.is_online()).await;

    let (status, _) = admin_disconnect(app(&t), Some(ADMIN_TOKEN)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!broadcaster.close.is_cancelled());
}

// ---------------------------------------------------------------------------
// Site root and HLS output
// ---------------------------------------------------------------------------

#[tokio::test]
async fn players_are_redirected_to_stream() {
    let t = TestRuntime::start().await;
    let response = app(&t)
        .oneshot(
            Request::get("/")
                .header(header::USER_AGENT, "VLC/3.0.18 LibVLC/3.0.18")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[header::LOCATION], PLAYER_REDIRECT);
}

#[tokio::test]
async fn browsers_get_a_page() {
    let t = TestRuntime::start().await;
    let response = app(&t)
        .oneshot(
            Request::get("/")
                .header(header::USER_AGENT, "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_string(response.into_body()).await;
    assert!(body.contains(PLAYER_REDIRECT));
}

#[tokio::test]
async fn master_playlist_is_served() {
    let t = TestRuntime::start().await;
    let master = t.hls_dir().join("stream.m3u8");
    eventually(|| master.exists()).await;

    let response = app(&t)
        .oneshot(Request::get("/hls/stream.m3u8").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_to_string(response.into_body()).await;
    assert!(body.starts_with("#EXTM3U"));
    assert!(body.contains("#EXT-X-STREAM-INF"));
    assert!(body.contains("0/stream.m3u8"));
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_are_served_as_sse() {
    let t = TestRuntime::start().await;
    let response = app(&t)
        .oneshot(Request::get("/api/events").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn event_stream_opens_with_heartbeat() {
    let t = TestRuntime::start().await;
    let response = app(&t)
        .oneshot(Request::get("/api/events").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let mut body = response.into_body();
    let frame = tokio::time::timeout(common::WAIT, body.frame())
        .await
        .expect("no event in time")
        .unwrap()
        .unwrap();
    let text = String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap();
    assert!(text.contains("event: heartbeat"), "unexpected first event: {text}");
    assert!(text.contains(r#"data: {"type":"heartbeat"}"#));
}
