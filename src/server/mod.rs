use crate::config::Config;
use crate::gate::SessionGate;
use crate::runtime::Runtime;
use crate::state::{EventBus, StreamState};
use crate::storage::StorageStats;
use crate::viewers::ViewerTracker;
use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderMap, Method, StatusCode},
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

pub mod auth;
pub mod routes_admin;
pub mod routes_api;
pub mod routes_sse;

/// Where players are sent when they open the site root.
pub const PLAYER_REDIRECT: &str = "/hls/stream.m3u8";

/// Shared application context
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub gate: Arc<SessionGate>,
    pub state: Arc<StreamState>,
    pub events: Arc<EventBus>,
    pub viewers: ViewerTracker,
    pub storage_stats: Arc<StorageStats>,
}

impl AppContext {
    pub fn from_runtime(runtime: &Runtime) -> Self {
        Self {
            config: runtime.config.clone(),
            gate: runtime.gate.clone(),
            state: runtime.state.clone(),
            events: runtime.events.clone(),
            viewers: runtime.viewers.clone(),
            storage_stats: runtime.tiers.stats.clone(),
        }
    }
}

/// Create the Axum router with all routes
pub fn create_router(ctx: AppContext) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let hls_dir = ctx.config.paths.hls_dir.clone();
    let static_dir = ctx.config.server.static_dir.clone();

    let mut app = Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .nest("/api", api_routes(&ctx))
        .with_state(ctx)
        // Playlists and local segments straight from the local tier
        .nest_service("/hls", ServeDir::new(hls_dir));

    if let Some(dir) = static_dir {
        if dir.exists() {
            tracing::info!("Serving static files from {:?}", dir);
            app = app.fallback_service(ServeDir::new(dir));
        }
    }

    app.layer(cors).layer(TraceLayer::new_for_http())
}

fn api_routes(ctx: &AppContext) -> Router<AppContext> {
    // Admin routes always sit behind the token check
    let admin_routes = routes_admin::admin_routes().layer(middleware::from_fn_with_state(
        ctx.clone(),
        auth::admin_auth_middleware,
    ));

    routes_api::api_routes()
        .merge(routes_sse::sse_routes())
        .merge(admin_routes)
}

async fn health_check() -> impl IntoResponse {
    StatusCode::OK
}

/// Players opening the site root get the stream; browsers get the page.
async fn index(
    axum::extract::State(ctx): axum::extract::State<AppContext>,
    headers: HeaderMap,
) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if is_player(user_agent) {
        return Redirect::temporary(PLAYER_REDIRECT).into_response();
    }

    let index = ctx
        .config
        .server
        .static_dir
        .as_ref()
        .map(|dir| dir.join("index.html"));
    match index {
        Some(path) => match tokio::fs::read_to_string(&path).await {
            Ok(page) => Html(page).into_response(),
            Err(e) => {
                tracing::debug!("No index page at {:?}: {}", path, e);
                (StatusCode::NOT_FOUND, "Not found").into_response()
            }
        },
        None => Html(format!(
            "<!doctype html><title>castforge</title><p>Stream: <a href=\"{0}\">{0}</a></p>",
            PLAYER_REDIRECT
        ))
        .into_response(),
    }
}

/// Whether a user agent belongs to a media player rather than a browser.
pub fn is_player(user_agent: &str) -> bool {
    const PLAYERS: &[&str] = &[
        "vlc",
        "mpv",
        "lavf",
        "applecoremedia",
        "exoplayer",
        "kodi",
        "gstreamer",
        "quicktime",
        "iina",
    ];
    let ua = user_agent.to_lowercase();
    PLAYERS.iter().any(|p| ua.contains(p))
}

/// Start the HTTP server and run until a shutdown signal arrives.
pub async fn start_server(ctx: AppContext, shutdown: CancellationToken) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", ctx.config.server.host, ctx.config.server.port)
        .parse()
        .context("Invalid server address")?;

    let app = create_router(ctx);

    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        tokio::select! {
            _ = shutdown_signal() => {}
            _ = shutdown.cancelled() => {}
        }
    })
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => {}
            Err(e) => {
                tracing::error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
