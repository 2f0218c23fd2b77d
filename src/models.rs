//! Wire contract for the decision API.
//!
//! Field names are part of the external contract and serialize verbatim
//! (camelCase); both the client and the service round-trip these shapes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ===== Directions and Phases =====

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::North,
        Direction::South,
        Direction::East,
        Direction::West,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "North",
            Direction::South => "South",
            Direction::East => "East",
            Direction::West => "West",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "north" => Ok(Direction::North),
            "south" => Ok(Direction::South),
            "east" => Ok(Direction::East),
            "west" => Ok(Direction::West),
            other => Err(format!(
                "invalid lane: {other}. Must be North, South, East, or West"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    #[serde(rename = "ai")]
    Ai,
    #[serde(rename = "manual")]
    Manual,
}

// ===== Vision Layer =====

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehicleCount {
    #[serde(default)]
    pub car: u32,
    #[serde(default)]
    pub bike: u32,
    #[serde(default)]
    pub truck: u32,
    #[serde(default)]
    pub bus: u32,
    #[serde(default)]
    pub emergency: u32,
    #[serde(default)]
    pub pedestrians: u32,
}

impl VehicleCount {
    pub fn total(&self) -> u32 {
        self.car + self.bike + self.truck + self.bus + self.emergency + self.pedestrians
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionReport {
    pub vehicle_count_by_type: VehicleCount,
    pub avg_speed: f64,
    pub lane_occupancy: f64,
    #[serde(default)]
    pub ambulance_detected: bool,
    #[serde(default)]
    pub rain_detected: bool,
    #[serde(default = "default_confidence")]
    pub confidence_score: f64,
}

fn default_confidence() -> f64 {
    0.95
}

// ===== Maps Layer =====

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownstreamReport {
    pub avg_speed: f64,
    pub congestion_index: f64,
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

fn default_ttl() -> u32 {
    60
}

// ===== Lane and Intersection State =====

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaneState {
    pub direction: Direction,
    pub vision: VisionReport,
    #[serde(default)]
    pub downstream: Option<DownstreamReport>,
    #[serde(default)]
    pub wait_time: f64,
    #[serde(default)]
    pub last_green_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionState {
    pub lanes: BTreeMap<Direction, LaneState>,
    #[serde(default)]
    pub current_signal: Option<Direction>,
    #[serde(default)]
    pub emergency_mode: bool,
}

// ===== Decision Output =====

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReasonTrace {
    #[serde(default)]
    pub emergency: bool,
    #[serde(default)]
    pub max_wait_violation: bool,
    #[serde(default)]
    pub downstream_penalty: f64,
    #[serde(default)]
    pub recent_green_decay: f64,
    #[serde(default)]
    pub softmax_probability: f64,
    #[serde(default)]
    pub local_traffic_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalDecision {
    pub selected_lane: Direction,
    pub green_duration: f64,
    pub decision_confidence: f64,
    pub reason_trace: ReasonTrace,
    pub timestamp: f64,
}

// ===== Request / Response Envelopes =====

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRequest {
    pub intersection_state: IntersectionState,
    pub control_mode: ControlMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecisionResponse {
    pub decision: SignalDecision,
    #[serde(default)]
    pub fallback_mode: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_request_uses_contract_field_names() {
        let mut lanes = BTreeMap::new();
        lanes.insert(
            Direction::North,
            LaneState {
                direction: Direction::North,
                vision: VisionReport {
                    vehicle_count_by_type: VehicleCount {
                        car: 3,
                        truck: 1,
                        ..VehicleCount::default()
                    },
                    avg_speed: 42.0,
                    lane_occupancy: 0.5,
                    ambulance_detected: false,
                    rain_detected: true,
                    confidence_score: 0.95,
                },
                downstream: Some(DownstreamReport {
                    avg_speed: 55.0,
                    congestion_index: 0.2,
                    ttl: 60,
                }),
                wait_time: 12.0,
                last_green_time: 100.0,
            },
        );
        let request = DecisionRequest {
            intersection_state: IntersectionState {
                lanes,
                current_signal: Some(Direction::North),
                emergency_mode: false,
            },
            control_mode: ControlMode::Ai,
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["controlMode"], "ai");
        let lane = &value["intersectionState"]["lanes"]["North"];
        assert_eq!(lane["vision"]["vehicleCountByType"]["car"], 3);
        assert_eq!(lane["vision"]["laneOccupancy"], 0.5);
        assert_eq!(lane["vision"]["ambulanceDetected"], false);
        assert_eq!(lane["vision"]["rainDetected"], true);
        assert_eq!(lane["downstream"]["congestionIndex"], 0.2);
        assert_eq!(lane["waitTime"], 12.0);
        assert_eq!(lane["lastGreenTime"], 100.0);
        assert_eq!(value["intersectionState"]["currentSignal"], "North");
        assert_eq!(value["intersectionState"]["emergencyMode"], false);
    }

    #[test]
    fn decision_response_parses_with_optional_trace_fields() {
        let body = r#"{
            "decision": {
                "selectedLane": "East",
                "greenDuration": 37.6,
                "decisionConfidence": 0.8,
                "reasonTrace": { "localTrafficScore": 9.5 },
                "timestamp": 1700000000.0
            }
        }"#;
        let response: DecisionResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.decision.selected_lane, Direction::East);
        assert_eq!(response.decision.green_duration, 37.6);
        assert!(!response.decision.reason_trace.emergency);
        assert_eq!(response.decision.reason_trace.local_traffic_score, 9.5);
        assert!(!response.fallback_mode);
        assert!(response.error_message.is_none());
    }

    #[test]
    fn missing_decision_object_is_an_error() {
        let body = r#"{ "fallbackMode": true }"#;
        assert!(serde_json::from_str::<DecisionResponse>(body).is_err());
    }

    #[test]
    fn direction_parses_case_insensitively() {
        assert_eq!("north".parse::<Direction>().unwrap(), Direction::North);
        assert_eq!("WEST".parse::<Direction>().unwrap(), Direction::West);
        assert!("diagonal".parse::<Direction>().is_err());
    }
}
