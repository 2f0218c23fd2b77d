//! Decision pipeline for the signal service.
//!
//! Order matters and is load-bearing: emergency override, then max-wait
//! enforcement, then weighted priorities shaped by downstream congestion,
//! recent-green decay, and a temperature softmax before lane selection.

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::Rng;
use std::collections::BTreeMap;

use crate::models::{
    Direction, IntersectionState, LaneState, ReasonTrace, SignalDecision,
};

// Safety constraints (hard rules)
pub const MAX_WAIT_SECS: f64 = 120.0;
pub const MIN_GREEN_SECS: f64 = 5.0;
pub const MAX_GREEN_SECS: f64 = 60.0;
pub const RECENT_GREEN_WINDOW_SECS: f64 = 30.0;

/// Softmax temperature. Strong but smooth preference for the busy lane.
pub const SOFTMAX_TEMPERATURE: f64 = 0.7;

/// Bikes get double weight in the wet.
pub const RAIN_BIKE_MULTIPLIER: f64 = 2.0;

// Spatial cost per vehicle type
const WEIGHT_CAR: f64 = 1.0;
const WEIGHT_BIKE: f64 = 0.3;
const WEIGHT_TRUCK: f64 = 1.5;
const WEIGHT_BUS: f64 = 1.5;
const WEIGHT_EMERGENCY: f64 = 10.0;
const WEIGHT_PEDESTRIANS: f64 = 0.5;

pub struct DecisionEngine {
    rng: StdRng,
}

impl DecisionEngine {
    pub fn new(rng: StdRng) -> Self {
        DecisionEngine { rng }
    }

    /// Run the full pipeline over the lane map. `now` is the timestamp the
    /// caller wants wait ages and the decision stamped against.
    pub fn decide(
        &mut self,
        lanes: &BTreeMap<Direction, LaneState>,
        now: f64,
    ) -> Result<SignalDecision> {
        if let Some(direction) = check_emergency(lanes) {
            return Ok(emergency_decision(direction, now));
        }

        if let Some(direction) = check_max_wait(lanes) {
            return Ok(forced_decision(direction, &lanes[&direction], now));
        }

        let directions: Vec<Direction> = lanes.keys().copied().collect();
        let priorities: Vec<f64> = directions
            .iter()
            .map(|d| {
                let lane = &lanes[d];
                let net = local_traffic_score(lane) * downstream_priority(lane).powi(2);
                net * recent_green_decay(now - lane.last_green_time)
            })
            .collect();

        let probabilities = softmax(&priorities, SOFTMAX_TEMPERATURE);
        let index = self.weighted_index(&probabilities)?;
        let selected = directions[index];
        let lane = &lanes[&selected];
        let duration = green_duration(lane);

        Ok(SignalDecision {
            selected_lane: selected,
            green_duration: duration,
            decision_confidence: probabilities[index],
            reason_trace: ReasonTrace {
                emergency: false,
                max_wait_violation: false,
                downstream_penalty: 1.0 - downstream_priority(lane),
                recent_green_decay: 1.0,
                softmax_probability: probabilities[index],
                local_traffic_score: local_traffic_score(lane),
            },
            timestamp: now,
        })
    }

    fn weighted_index(&mut self, weights: &[f64]) -> Result<usize> {
        let total: f64 = weights.iter().sum();
        if !total.is_finite() || total <= 0.0 {
            bail!("degenerate selection weights: {weights:?}");
        }

        let mut rnd = self.rng.gen_range(0.0..total);
        for (index, weight) in weights.iter().enumerate() {
            if rnd < *weight {
                return Ok(index);
            }
            rnd -= weight;
        }

        // Float remainder landed past the last bucket
        Ok(0)
    }
}

fn check_emergency(lanes: &BTreeMap<Direction, LaneState>) -> Option<Direction> {
    lanes
        .values()
        .find(|lane| lane.vision.ambulance_detected)
        .map(|lane| lane.direction)
}

fn check_max_wait(lanes: &BTreeMap<Direction, LaneState>) -> Option<Direction> {
    lanes
        .values()
        .find(|lane| lane.wait_time > MAX_WAIT_SECS)
        .map(|lane| lane.direction)
}

/// Weighted vehicle load, shaped by rain, congestion speed, and occupancy.
pub fn local_traffic_score(lane: &LaneState) -> f64 {
    let vehicles = &lane.vision.vehicle_count_by_type;
    let mut score = vehicles.car as f64 * WEIGHT_CAR
        + vehicles.bike as f64 * WEIGHT_BIKE
        + vehicles.truck as f64 * WEIGHT_TRUCK
        + vehicles.bus as f64 * WEIGHT_BUS
        + vehicles.emergency as f64 * WEIGHT_EMERGENCY
        + vehicles.pedestrians as f64 * WEIGHT_PEDESTRIANS;

    if lane.vision.rain_detected {
        score += vehicles.bike as f64 * WEIGHT_BIKE * (RAIN_BIKE_MULTIPLIER - 1.0);
    }

    // Slower traffic is more congested and more deserving
    let speed_factor = (1.0 - lane.vision.avg_speed / 60.0).max(0.0);
    score *= 1.0 + speed_factor;
    score *= 1.0 + lane.vision.lane_occupancy;
    score
}

/// Free-flowing downstream keeps the lane attractive; a gridlocked exit
/// floors the multiplier at 0.1 rather than zeroing the lane out.
pub fn downstream_priority(lane: &LaneState) -> f64 {
    match &lane.downstream {
        Some(downstream) => (downstream.avg_speed / 60.0).max(0.1),
        None => 1.0,
    }
}

/// 0 at the instant a lane was served, back to 1 after the decay window.
pub fn recent_green_decay(secs_since_green: f64) -> f64 {
    (secs_since_green / RECENT_GREEN_WINDOW_SECS).clamp(0.0, 1.0)
}

/// Numerically stable temperature softmax over raw priorities.
pub fn softmax(values: &[f64], temperature: f64) -> Vec<f64> {
    let scaled: Vec<f64> = values.iter().map(|v| (v + 1e-6) / temperature).collect();
    let max = scaled.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scaled.iter().map(|v| (v - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

/// Green time proportional to load, clamped to the safety band and shrunk
/// when the vision layer is unsure of what it saw.
pub fn green_duration(lane: &LaneState) -> f64 {
    let normalized = (local_traffic_score(lane) / 50.0).min(1.0);
    let duration =
        (MIN_GREEN_SECS + (MAX_GREEN_SECS - MIN_GREEN_SECS) * normalized)
            * lane.vision.confidence_score;
    duration.clamp(MIN_GREEN_SECS, MAX_GREEN_SECS)
}

fn emergency_decision(direction: Direction, now: f64) -> SignalDecision {
    SignalDecision {
        selected_lane: direction,
        green_duration: MAX_GREEN_SECS,
        decision_confidence: 1.0,
        reason_trace: ReasonTrace {
            emergency: true,
            max_wait_violation: false,
            downstream_penalty: 0.0,
            recent_green_decay: 1.0,
            softmax_probability: 1.0,
            local_traffic_score: 999.0,
        },
        timestamp: now,
    }
}

fn forced_decision(direction: Direction, lane: &LaneState, now: f64) -> SignalDecision {
    SignalDecision {
        selected_lane: direction,
        // Quick clear for the starved lane
        green_duration: MIN_GREEN_SECS,
        decision_confidence: 1.0,
        reason_trace: ReasonTrace {
            emergency: false,
            max_wait_violation: true,
            downstream_penalty: 0.0,
            recent_green_decay: 1.0,
            softmax_probability: 1.0,
            local_traffic_score: local_traffic_score(lane),
        },
        timestamp: now,
    }
}

/// Fixed-time decision used when the pipeline cannot produce one: first
/// lane with motorized traffic gets a short slot, otherwise North.
pub fn fallback_decision(state: &IntersectionState, now: f64) -> SignalDecision {
    for lane in state.lanes.values() {
        let vehicles = &lane.vision.vehicle_count_by_type;
        let motorized = vehicles.car + vehicles.truck + vehicles.bus;
        if motorized > 0 {
            return SignalDecision {
                selected_lane: lane.direction,
                green_duration: 15.0,
                decision_confidence: 0.5,
                reason_trace: ReasonTrace {
                    emergency: false,
                    max_wait_violation: false,
                    downstream_penalty: 0.0,
                    recent_green_decay: 1.0,
                    softmax_probability: 0.5,
                    local_traffic_score: motorized as f64,
                },
                timestamp: now,
            };
        }
    }

    SignalDecision {
        selected_lane: Direction::North,
        green_duration: 10.0,
        decision_confidence: 0.5,
        reason_trace: ReasonTrace {
            emergency: false,
            max_wait_violation: false,
            downstream_penalty: 0.0,
            recent_green_decay: 1.0,
            softmax_probability: 0.25,
            local_traffic_score: 0.0,
        },
        timestamp: now,
    }
}
