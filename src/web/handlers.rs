use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::gtfs::agencies::{list_agencies, routes_by_agency};
use crate::gtfs::StaticDataError;
use crate::models::{parse_route_list, VehiclePosition};
use crate::AppState;

#[derive(Deserialize)]
pub struct RoutesParams {
    routes: Option<String>,
}

#[derive(Deserialize)]
pub struct AgencyParams {
    agency_ids: Option<String>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Map a static-table failure to 404 (table missing) or 500.
fn static_error_response(err: &StaticDataError, context: &str) -> Response {
    match err {
        StaticDataError::Missing(_) => {
            warn!("[WEB] {}", err);
            error_response(StatusCode::NOT_FOUND, format!("{} not found", err.file_name()))
        }
        _ => {
            error!("[WEB] {}", err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}: {}", context, err.file_name()),
            )
        }
    }
}

fn task_failed(err: tokio::task::JoinError) -> Response {
    error!("[WEB] Blocking task failed: {}", err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

/// GET /api/maps_config — browser key for the map page.
pub async fn maps_config(State(state): State<Arc<AppState>>) -> Response {
    let config = state.config.load();
    match config.web.maps_api_key() {
        Some(key) => Json(json!({ "google_maps_api_key": key })).into_response(),
        None => {
            error!("[WEB] Maps API key requested but not configured");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Google Maps API key not configured on server",
            )
        }
    }
}

/// GET /api/agencies — agencies that operate at least one route.
pub async fn agencies(State(state): State<Arc<AppState>>) -> Response {
    let result = tokio::task::spawn_blocking(move || {
        let routes = state.config.load().gtfs.files().routes;
        list_agencies(&routes, state.agency_names())
    })
    .await;

    match result {
        Ok(Ok(agencies)) => Json(agencies).into_response(),
        Ok(Err(e)) => static_error_response(&e, "Could not read routes data to determine agencies"),
        Err(e) => task_failed(e),
    }
}

/// GET /api/routes_by_agency?agency_ids=a,b — routes for the picker.
pub async fn get_routes_by_agency(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AgencyParams>,
) -> Response {
    let Some(raw) = params.agency_ids.filter(|s| !s.is_empty()) else {
        return error_response(StatusCode::BAD_REQUEST, "agency_ids parameter is required");
    };

    let wanted: HashSet<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if wanted.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "agency_ids parameter was empty or invalid",
        );
    }

    let result = tokio::task::spawn_blocking(move || {
        let routes = state.config.load().gtfs.files().routes;
        routes_by_agency(&routes, &wanted)
    })
    .await;

    match result {
        Ok(Ok(routes)) => Json(routes).into_response(),
        Ok(Err(e)) => static_error_response(&e, "Could not read routes data"),
        Err(e) => task_failed(e),
    }
}

/// GET /api/bus_data?routes=... — live vehicles on the requested routes.
pub async fn bus_data(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RoutesParams>,
) -> Response {
    let targets = parse_route_list(params.routes.as_deref());
    if targets.is_empty() {
        return Json(Vec::<VehiclePosition>::new()).into_response();
    }

    let config = state.config.load();
    let result = state
        .feed
        .fetch_vehicles(
            &config.feed.url,
            config.feed.api_key(),
            &targets,
            config.feed.timeout(),
        )
        .await;

    match result {
        Ok(vehicles) => Json(vehicles).into_response(),
        Err(e) if e.is_configuration() => {
            error!("[WEB] {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Server configuration error (realtime feed)",
            )
        }
        Err(e) => {
            error!("[WEB] Vehicle fetch failed: {}", e);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch or parse realtime vehicle data",
            )
        }
    }
}

/// GET /api/route_shapes?routes=... — polylines per requested route.
pub async fn route_shapes(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RoutesParams>,
) -> Response {
    let targets = parse_route_list(params.routes.as_deref());
    if targets.is_empty() {
        return Json(json!({})).into_response();
    }

    let result = tokio::task::spawn_blocking(move || {
        let files = state.config.load().gtfs.files();
        state.shapes.resolve(&files, &targets)
    })
    .await;

    match result {
        Ok(resolved) => Json(resolved.as_ref()).into_response(),
        Err(e) => task_failed(e),
    }
}

/// GET /api/healthz — liveness and cache occupancy.
pub async fn healthz(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "ok": true,
        "cached_route_sets": state.shapes.cached_sets(),
        "agency_names": state.agency_names.get().map(|names| names.len()),
    }))
    .into_response()
}

/// POST /api/reload — re-read config and drop cached shapes.
pub async fn reload(State(state): State<Arc<AppState>>) -> Response {
    info!("[WEB] Reload requested");

    let path = state.config_path.clone();
    let loaded = match tokio::task::spawn_blocking(move || Config::load(&path)).await {
        Ok(loaded) => loaded,
        Err(e) => return task_failed(e),
    };

    match loaded {
        Ok(new_config) => {
            let cleared = state.shapes.reset(new_config.cache.capacity());
            state.config.store(Arc::new(new_config));
            info!("[CONFIG] Reloaded, {} cached route sets cleared", cleared);
            Json(json!({
                "success": true,
                "message": "Configuration reloaded successfully",
                "cleared_route_sets": cleared,
            }))
            .into_response()
        }
        Err(e) => {
            warn!("[CONFIG] Reload failed: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "success": false,
                    "message": format!("Reload failed: {}", e),
                })),
            )
                .into_response()
        }
    }
}
