use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use rust_embed::Embed;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{error, info};

use crate::AppState;

use super::handlers;

/// Embedded web assets (map page, script, styles).
#[derive(Embed)]
#[folder = "web/"]
#[prefix = ""]
struct WebAssets;

/// Upper bound for any request, above the largest allowed feed timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(130);

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // API routes
        .route("/api/maps_config", get(handlers::maps_config))
        .route("/api/agencies", get(handlers::agencies))
        .route("/api/routes_by_agency", get(handlers::get_routes_by_agency))
        .route("/api/bus_data", get(handlers::bus_data))
        .route("/api/route_shapes", get(handlers::route_shapes))
        .route("/api/healthz", get(handlers::healthz))
        .route("/api/reload", post(handlers::reload))
        // Static files and index
        .route("/", get(serve_index))
        .fallback(get(serve_static))
        // Middleware
        .layer(DefaultBodyLimit::max(65536)) // 64KB max request body
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the axum web server on the configured bind address.
pub async fn run(state: Arc<AppState>) {
    let bind = state.config.load().web.bind.clone();
    let app = router(Arc::clone(&state));

    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(l) => {
            info!("[WEB] Server listening on http://{}", bind);
            l
        }
        Err(e) => {
            error!("[WEB] Failed to bind {}: {}", bind, e);
            return;
        }
    };

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .ok();

    info!("[WEB] Server stopped");
}

/// Serve the main index.html page.
async fn serve_index() -> Response {
    serve_embedded_file("templates/index.html")
}

/// Serve static files from embedded assets.
async fn serve_static(uri: axum::http::Uri) -> Response {
    let path = uri.path().trim_start_matches('/');
    serve_embedded_file(path)
}

/// Look up and serve an embedded file with appropriate content type.
fn serve_embedded_file(path: &str) -> Response {
    match WebAssets::get(path) {
        Some(file) => {
            let mime = mime_for_path(path);
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, mime)],
                file.data.to_vec(),
            )
                .into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// Determine MIME type from file extension.
fn mime_for_path(path: &str) -> &'static str {
    match path.rsplit('.').next() {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("svg") => "image/svg+xml",
        _ => "application/octet-stream",
    }
}
