//! Admin routes: the operator's handle on the live session.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use castforge_common::Error;
use serde::Serialize;

use super::AppContext;

pub fn admin_routes() -> Router<AppContext> {
    Router::new().route("/admin/disconnect", post(disconnect))
}

#[derive(Debug, Serialize)]
pub struct SimpleResponse {
    pub success: bool,
    pub message: String,
}

/// Force-disconnect the inbound stream.
async fn disconnect(State(ctx): State<AppContext>) -> impl IntoResponse {
    match ctx.gate.force_disconnect() {
        Ok(session_id) => {
            tracing::info!(session_id = %session_id, "Inbound stream disconnected by admin");
            (
                StatusCode::OK,
                Json(SimpleResponse {
                    success: true,
                    message: "inbound stream disconnected".to_string(),
                }),
            )
        }
        Err(Error::NoActiveSession) => (
            StatusCode::BAD_REQUEST,
            Json(SimpleResponse {
                success: false,
                message: "no inbound stream connected".to_string(),
            }),
        ),
        Err(e) => (
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(SimpleResponse {
                success: false,
                message: e.to_string(),
            }),
        ),
    }
}
