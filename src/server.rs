//! HTTP surface of the decision service: the decision endpoint, health and
//! greeting routes, traffic monitoring/injection routes, and static assets.

use anyhow::{Context, Result};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::path::{Component, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::engine::{self, DecisionEngine};
use crate::maps::MapsAdapter;
use crate::models::{ControlMode, DecisionRequest, DecisionResponse, Direction};

pub const SERVICE_NAME: &str = "APEX Traffic Signal Optimizer";

/// Weather label assumed for downstream lookups when the caller does not
/// supply one.
const DEFAULT_WEATHER: &str = "Clear Sky";

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Mutex<DecisionEngine>>,
    pub maps: Arc<Mutex<MapsAdapter>>,
    pub assets_dir: PathBuf,
}

impl AppState {
    pub fn new(seed: Option<u64>, assets_dir: PathBuf) -> Self {
        let engine_rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let maps_rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        };
        AppState {
            engine: Arc::new(Mutex::new(DecisionEngine::new(engine_rng))),
            maps: Arc::new(Mutex::new(MapsAdapter::new(maps_rng))),
            assets_dir,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/api/decision", post(decide))
        .route("/api/traffic/summary", get(traffic_summary))
        .route("/api/traffic/accident", post(trigger_accident))
        .route("/api/traffic/clear-accidents", post(clear_accidents))
        .fallback(static_assets)
        .with_state(state)
}

/// Serve until `running` flips false.
pub async fn run(addr: SocketAddr, state: AppState, running: Arc<AtomicBool>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    log::info!("Decision service listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        })
        .await
        .context("decision service failed")
}

// ===== Handlers =====

pub async fn root() -> Json<serde_json::Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "decision_engine": "ready",
        "endpoints": {
            "decision": "/api/decision",
            "health": "/health",
        },
    }))
}

fn bad_request(detail: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail }))).into_response()
}

pub async fn decide(
    State(app): State<AppState>,
    Json(request): Json<DecisionRequest>,
) -> Response {
    if request.control_mode != ControlMode::Ai {
        return bad_request("Backend only processes AI mode requests");
    }

    let mut intersection = request.intersection_state;
    if intersection.lanes.is_empty() {
        return bad_request("No lane data provided");
    }

    for lane in intersection.lanes.values() {
        log::info!(
            "Lane {}: Cars={}, Speed={:.1} km/h, Wait={:.1}s",
            lane.direction,
            lane.vision.vehicle_count_by_type.car,
            lane.vision.avg_speed,
            lane.wait_time
        );
    }

    // Enrich every lane with fresh downstream data before deciding
    let now = Utc::now();
    {
        let mut maps = app.maps.lock().await;
        for lane in intersection.lanes.values_mut() {
            let downstream =
                maps.downstream_traffic(lane.direction, Some(DEFAULT_WEATHER), now);
            log::info!(
                "Downstream {}: Speed={:.1} km/h, Congestion={:.2}",
                lane.direction,
                downstream.avg_speed,
                downstream.congestion_index
            );
            lane.downstream = Some(downstream);
        }
    }

    let now_secs = now.timestamp_millis() as f64 / 1000.0;
    let outcome = {
        let mut engine = app.engine.lock().await;
        engine.decide(&intersection.lanes, now_secs)
    };

    let response = match outcome {
        Ok(decision) => {
            log::info!(
                "Decision: {} for {:.1}s (confidence: {:.2})",
                decision.selected_lane,
                decision.green_duration,
                decision.decision_confidence
            );
            DecisionResponse {
                decision,
                fallback_mode: false,
                error_message: None,
            }
        }
        Err(err) => {
            log::error!("Decision engine error: {err:#}");
            DecisionResponse {
                decision: engine::fallback_decision(&intersection, now_secs),
                fallback_mode: true,
                error_message: Some(format!("Error: {err}. Using fallback logic.")),
            }
        }
    };

    Json(response).into_response()
}

pub async fn traffic_summary(State(app): State<AppState>) -> Response {
    let now = Utc::now();
    let traffic = app.maps.lock().await.summary(now);
    Json(json!({
        "status": "success",
        "timestamp": now.timestamp_millis() as f64 / 1000.0,
        "traffic": traffic,
    }))
    .into_response()
}

fn default_accident_minutes() -> u32 {
    30
}

#[derive(Debug, Deserialize)]
pub struct AccidentParams {
    pub lane: String,
    #[serde(default = "default_accident_minutes")]
    pub duration_minutes: u32,
}

pub async fn trigger_accident(
    State(app): State<AppState>,
    Query(params): Query<AccidentParams>,
) -> Response {
    let lane: Direction = match params.lane.parse() {
        Ok(lane) => lane,
        Err(detail) => return bad_request(&detail),
    };

    app.maps
        .lock()
        .await
        .trigger_accident(lane, params.duration_minutes, Utc::now());
    log::info!(
        "Accident triggered on {} for {} minutes",
        lane,
        params.duration_minutes
    );

    Json(json!({
        "status": "success",
        "message": format!("Accident triggered on downstream of {lane} lane"),
        "duration_minutes": params.duration_minutes,
    }))
    .into_response()
}

pub async fn clear_accidents(State(app): State<AppState>) -> Response {
    app.maps.lock().await.clear_accidents();
    log::info!("All accidents cleared");
    Json(json!({
        "status": "success",
        "message": "All accidents cleared",
    }))
    .into_response()
}

// ===== Static Assets =====

fn content_type(path: &std::path::Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Fallback route: serve files from the configured assets directory.
pub async fn static_assets(State(app): State<AppState>, uri: Uri) -> Response {
    let requested = uri.path().trim_start_matches('/');
    let requested = if requested.is_empty() {
        "index.html"
    } else {
        requested
    };

    let relative = PathBuf::from(requested);
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return StatusCode::NOT_FOUND.into_response();
    }

    let path = app.assets_dir.join(relative);
    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type(&path))],
            bytes,
        )
            .into_response(),
        Err(_) => StatusCode::NOT_FOUND.into_response(),
    }
}
