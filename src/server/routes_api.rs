use crate::gate::SessionInfo;
use crate::server::AppContext;
use crate::state::{Broadcaster, StreamStatus};
use crate::storage::StorageStatsSnapshot;
use crate::viewers::client_id;
use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::net::{IpAddr, SocketAddr};

pub fn api_routes() -> Router<AppContext> {
    Router::new()
        .route("/status", get(status))
        .route("/ping", get(ping).post(ping))
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub online: bool,
    pub status: StreamStatus,
    pub broadcaster: Option<Broadcaster>,
    pub session: Option<SessionInfo>,
    pub last_transition: Option<DateTime<Utc>>,
    pub viewer_count: usize,
    pub storage: StorageStatsSnapshot,
    pub version: &'static str,
}

async fn status(State(ctx): State<AppContext>) -> impl IntoResponse {
    let snapshot = ctx.state.snapshot();
    Json(StatusResponse {
        online: snapshot.is_online(),
        status: snapshot.status,
        broadcaster: snapshot.broadcaster,
        session: ctx.gate.current(),
        last_transition: snapshot.last_transition,
        viewer_count: ctx.viewers.active_count(),
        storage: ctx.storage_stats.snapshot(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// A player saying it is still watching. Never fails.
async fn ping(
    State(ctx): State<AppContext>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let ip = forwarded_for(&headers).or(connect_info.map(|ConnectInfo(addr)| addr.ip()));
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok());

    ctx.viewers.record_ping(&client_id(ip, user_agent));
    StatusCode::OK
}

/// First address in `X-Forwarded-For`, when it parses.
fn forwarded_for(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn forwarded_for_takes_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        assert_eq!(forwarded_for(&headers), Some("203.0.113.7".parse().unwrap()));

        headers.insert("x-forwarded-for", HeaderValue::from_static("garbage"));
        assert_eq!(forwarded_for(&headers), None);
        assert_eq!(forwarded_for(&HeaderMap::new()), None);
    }
}
