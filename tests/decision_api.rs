//! Handler-level tests for the decision service.

use axum::body::to_bytes;
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::collections::BTreeMap;
use std::path::PathBuf;

use apex_signal::models::{
    ControlMode, DecisionRequest, DecisionResponse, Direction, IntersectionState, LaneState,
    VehicleCount, VisionReport,
};
use apex_signal::server::{self, AppState};

fn app() -> AppState {
    AppState::new(Some(99), PathBuf::from("public"))
}

fn lane(direction: Direction, cars: u32) -> LaneState {
    LaneState {
        direction,
        vision: VisionReport {
            vehicle_count_by_type: VehicleCount {
                car: cars,
                ..VehicleCount::default()
            },
            avg_speed: 30.0,
            lane_occupancy: cars as f64 / 8.0,
            ambulance_detected: false,
            rain_detected: false,
            confidence_score: 0.95,
        },
        downstream: None,
        wait_time: 10.0,
        last_green_time: 0.0,
    }
}

fn request(mode: ControlMode) -> DecisionRequest {
    let lanes: BTreeMap<Direction, LaneState> = [
        (Direction::North, lane(Direction::North, 6)),
        (Direction::South, lane(Direction::South, 5)),
        (Direction::East, lane(Direction::East, 1)),
        (Direction::West, lane(Direction::West, 0)),
    ]
    .into_iter()
    .collect();
    DecisionRequest {
        intersection_state: IntersectionState {
            lanes,
            current_signal: Some(Direction::North),
            emergency_mode: false,
        },
        control_mode: mode,
    }
}

async fn json_body(response: Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn root_returns_the_greeting_payload() {
    let body = json_body(server::root().await.into_response()).await;
    assert_eq!(body["service"], "APEX Traffic Signal Optimizer");
    assert_eq!(body["status"], "operational");
}

#[tokio::test]
async fn health_reports_the_engine_ready() {
    let body = json_body(server::health().await.into_response()).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["endpoints"]["decision"], "/api/decision");
}

#[tokio::test]
async fn decision_endpoint_returns_a_bounded_decision() {
    let response = server::decide(State(app()), Json(request(ControlMode::Ai))).await;
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let payload: DecisionResponse = serde_json::from_slice(&bytes).unwrap();

    assert!(!payload.fallback_mode);
    assert!(payload.error_message.is_none());
    assert!(Direction::ALL.contains(&payload.decision.selected_lane));
    assert!(payload.decision.green_duration >= 5.0);
    assert!(payload.decision.green_duration <= 60.0);
    assert!(payload.decision.reason_trace.softmax_probability > 0.0);
}

#[tokio::test]
async fn ambulance_request_gets_the_emergency_override() {
    let mut request = request(ControlMode::Ai);
    request
        .intersection_state
        .lanes
        .get_mut(&Direction::West)
        .unwrap()
        .vision
        .ambulance_detected = true;

    let response = server::decide(State(app()), Json(request)).await;
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let payload: DecisionResponse = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(payload.decision.selected_lane, Direction::West);
    assert_eq!(payload.decision.green_duration, 60.0);
    assert!(payload.decision.reason_trace.emergency);
}

#[tokio::test]
async fn manual_mode_requests_are_rejected() {
    let response = server::decide(State(app()), Json(request(ControlMode::Manual))).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["detail"], "Backend only processes AI mode requests");
}

#[tokio::test]
async fn empty_lane_maps_are_rejected() {
    let mut request = request(ControlMode::Ai);
    request.intersection_state.lanes.clear();
    let response = server::decide(State(app()), Json(request)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn accident_routes_update_the_maps_adapter() {
    let state = app();

    let params = server::AccidentParams {
        lane: "south".to_string(),
        duration_minutes: 10,
    };
    let response =
        server::trigger_accident(State(state.clone()), Query(params)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(state.maps.lock().await.has_accident(Direction::South));

    let summary = json_body(server::traffic_summary(State(state.clone())).await).await;
    assert_eq!(summary["status"], "success");
    assert_eq!(summary["traffic"]["South"]["has_accident"], true);
    assert!(summary["traffic"]["South"]["congestion"].is_number());

    let response = server::clear_accidents(State(state.clone())).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(!state.maps.lock().await.has_accident(Direction::South));
}

#[tokio::test]
async fn unknown_accident_lane_is_a_bad_request() {
    let params = server::AccidentParams {
        lane: "diagonal".to_string(),
        duration_minutes: 10,
    };
    let response = server::trigger_accident(State(app()), Query(params)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn static_assets_are_served_from_the_assets_dir() {
    let dir = std::env::temp_dir().join(format!("apex-signal-assets-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("index.html"), "<html>apex</html>").unwrap();
    std::fs::write(dir.join("app.js"), "console.log('apex');").unwrap();

    let state = AppState::new(Some(1), dir.clone());

    let response =
        server::static_assets(State(state.clone()), Uri::from_static("/")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/html; charset=utf-8"
    );

    let response =
        server::static_assets(State(state.clone()), Uri::from_static("/app.js")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/javascript");

    let response =
        server::static_assets(State(state.clone()), Uri::from_static("/missing.css")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    std::fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn path_traversal_is_refused() {
    let state = AppState::new(Some(1), PathBuf::from("public"));
    let response = server::static_assets(
        State(state),
        "/../Cargo.toml".parse::<Uri>().unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
