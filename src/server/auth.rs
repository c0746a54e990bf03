//! Bearer-token guard for the admin API.

use crate::server::AppContext;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeader,
};

use super::routes_admin::SimpleResponse;

/// Check a presented token against the configured admin token.
///
/// With no token configured every request is refused.
fn check_admin(admin_token: Option<&str>, bearer_token: Option<&str>) -> bool {
    match (admin_token, bearer_token) {
        (Some(expected), Some(token)) => !expected.is_empty() && token == expected,
        _ => false,
    }
}

/// Middleware requiring `Authorization: Bearer <server.admin_token>`.
pub async fn admin_auth_middleware(
    State(ctx): State<AppContext>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let bearer_token = bearer.as_ref().map(|b| b.token());

    if !check_admin(ctx.config.server.admin_token.as_deref(), bearer_token) {
        tracing::warn!(
            path = %request.uri().path(),
            presented = bearer_token.is_some(),
            "Rejected admin request"
        );
        return (
            StatusCode::UNAUTHORIZED,
            Json(SimpleResponse {
                success: false,
                message: "admin authentication required".to_string(),
            }),
        )
            .into_response();
    }

    next.run(request).await
}
