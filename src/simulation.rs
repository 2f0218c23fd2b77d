//! Simulated intersection state and the per-tick update rules.
//!
//! One tick is one simulated second. All randomness flows through the
//! caller-supplied `StdRng` so seeded runs replay exactly.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};

use crate::models::{
    Direction, DownstreamReport, IntersectionState, LaneState, VehicleCount, VisionReport,
};
use crate::signal::{self, Phase, SignalState};

pub const MAX_LANE_VEHICLES: u32 = 8;
pub const WEATHER_CHANGE_PROBABILITY: f64 = 0.1;
pub const STATS_HISTORY_CAP: usize = 120;

// ===== Weather =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Weather {
    Clear,
    Fog,
    Rain,
    Snow,
    Storm,
}

impl Weather {
    pub const ALL: [Weather; 5] = [
        Weather::Clear,
        Weather::Fog,
        Weather::Rain,
        Weather::Snow,
        Weather::Storm,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Weather::Clear => "Clear Sky",
            Weather::Fog => "Fog",
            Weather::Rain => "Rain",
            Weather::Snow => "Snow",
            Weather::Storm => "Storm",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            Weather::Clear => "☀️",
            Weather::Fog => "🌫️",
            Weather::Rain => "🌧️",
            Weather::Snow => "❄️",
            Weather::Storm => "⛈️",
        }
    }

    pub fn temperature_c(self) -> f64 {
        match self {
            Weather::Clear => 24.0,
            Weather::Fog => 10.0,
            Weather::Rain => 16.0,
            Weather::Snow => -2.0,
            Weather::Storm => 14.0,
        }
    }

    /// Multiplier applied to lane-count volatility.
    pub fn severity(self) -> f64 {
        match self {
            Weather::Clear => 1.0,
            Weather::Fog => 1.2,
            Weather::Rain => 1.4,
            Weather::Snow => 1.8,
            Weather::Storm => 2.0,
        }
    }

    pub fn is_wet(self) -> bool {
        matches!(self, Weather::Rain | Weather::Storm)
    }

    pub fn sample(rng: &mut StdRng) -> Weather {
        *Weather::ALL.choose(rng).unwrap()
    }
}

// ===== Lanes =====

#[derive(Debug, Clone, Serialize)]
pub struct Lane {
    pub direction: Direction,
    pub vehicle_count: u32,
    /// Seconds accrued while this lane's phase was red.
    pub wait_time: f64,
    /// Sim-clock second at which this lane last turned green.
    pub last_green_time: f64,
}

impl Lane {
    fn new(direction: Direction, vehicle_count: u32) -> Self {
        Lane {
            direction,
            vehicle_count,
            wait_time: 0.0,
            last_green_time: 0.0,
        }
    }

    /// Coarse type split as fixed fractions of the lane count. No vehicle
    /// identity is tracked; the split is recomputed from scratch each tick.
    pub fn breakdown(&self, has_emergency: bool) -> VehicleCount {
        let n = self.vehicle_count;
        let car = (n as f64 * 0.6) as u32;
        let truck = (n as f64 * 0.15) as u32;
        let bus = (n as f64 * 0.1) as u32;
        VehicleCount {
            car,
            bike: n - car - truck - bus,
            truck,
            bus,
            emergency: if has_emergency { 1 } else { 0 },
            pedestrians: n / 2,
        }
    }
}

// ===== Emergency =====

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Emergency {
    pub lane: Direction,
    /// Sim-clock second at which the override ends. Tied to the simulation
    /// clock, so a stopped simulation holds the emergency in place.
    pub clears_at: u64,
}

// ===== Rolling Statistics =====

#[derive(Debug, Clone, Copy, Serialize)]
pub struct StatsSample {
    pub clock: u64,
    pub avg_wait: f64,
    pub efficiency: f64,
    pub emissions: f64,
}

#[derive(Debug, Clone, Default)]
pub struct StatsHistory {
    samples: VecDeque<StatsSample>,
}

impl StatsHistory {
    pub fn push(&mut self, sample: StatsSample) {
        if self.samples.len() == STATS_HISTORY_CAP {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn latest(&self) -> Option<&StatsSample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ===== Intersection State =====

#[derive(Debug, Clone)]
pub struct SimState {
    pub lanes: BTreeMap<Direction, Lane>,
    pub signal: SignalState,
    pub weather: Weather,
    pub emergency: Option<Emergency>,
    /// Simulated seconds since start.
    pub clock: u64,
    pub stats: StatsHistory,
}

impl SimState {
    pub fn new(rng: &mut StdRng) -> Self {
        let lanes = Direction::ALL
            .into_iter()
            .map(|d| (d, Lane::new(d, rng.gen_range(0..=4))))
            .collect();
        SimState {
            lanes,
            signal: SignalState::new(),
            weather: Weather::Clear,
            emergency: None,
            clock: 0,
            stats: StatsHistory::default(),
        }
    }

    pub fn lane(&self, direction: Direction) -> &Lane {
        &self.lanes[&direction]
    }

    pub fn emergency_lane(&self) -> Option<Direction> {
        self.emergency.map(|e| e.lane)
    }

    pub fn pair_total(&self, phase: Phase) -> u32 {
        phase.lanes().iter().map(|d| self.lanes[d].vehicle_count).sum()
    }

    /// Advance the world by one simulated second: random-walk the lane
    /// counts, maybe change the weather, accrue red-lane wait, expire a
    /// finished emergency, and record a stats sample.
    pub fn advance(&mut self, rng: &mut StdRng) {
        self.clock += 1;

        let severity = self.weather.severity();
        for lane in self.lanes.values_mut() {
            let delta = ((rng.r#gen::<f64>() * 3.0 - 1.0) * severity).floor() as i64;
            let count = (lane.vehicle_count as i64 + delta).clamp(0, MAX_LANE_VEHICLES as i64);
            lane.vehicle_count = count as u32;
        }

        if rng.gen_bool(WEATHER_CHANGE_PROBABILITY) {
            self.weather = Weather::sample(rng);
        }

        let green = self.signal.phase.lanes();
        for lane in self.lanes.values_mut() {
            if !green.contains(&lane.direction) {
                lane.wait_time += 1.0;
            }
        }

        if let Some(emergency) = self.emergency {
            if self.clock >= emergency.clears_at {
                log::info!(
                    "Emergency on {} cleared at t={}s",
                    emergency.lane,
                    self.clock
                );
                self.emergency = None;
            }
        }

        let sample = self.sample_stats();
        self.stats.push(sample);
    }

    fn sample_stats(&self) -> StatsSample {
        let total: u32 = self.lanes.values().map(|l| l.vehicle_count).sum();
        let avg_wait =
            self.lanes.values().map(|l| l.wait_time).sum::<f64>() / self.lanes.len() as f64;
        let capacity = (MAX_LANE_VEHICLES * 4) as f64;
        let efficiency = (100.0 - 100.0 * total as f64 / capacity).clamp(0.0, 100.0);
        let stopped = self.pair_total(self.signal.phase.opposite());
        StatsSample {
            clock: self.clock,
            avg_wait,
            efficiency,
            emissions: (total + stopped) as f64,
        }
    }

    // ===== Signal Mutations =====

    /// Switch to `phase` for `duration` seconds: bump the cycle counter and
    /// reset the newly green pair's wait clocks.
    pub fn switch_to(&mut self, phase: Phase, duration: u32) {
        self.signal.phase = phase;
        self.signal.timer = duration;
        self.signal.cycle_count += 1;
        let clock = self.clock as f64;
        for direction in phase.lanes() {
            let lane = self.lanes.get_mut(&direction).expect("fixed lane set");
            lane.wait_time = 0.0;
            lane.last_green_time = clock;
        }
    }

    /// Keep the current phase and restart its countdown.
    pub fn extend(&mut self, duration: u32) {
        self.signal.timer = duration;
    }

    /// Unconditional flip with the load-ratio duration rule; manual mode
    /// always gets the fixed default slot.
    pub fn flip_local(&mut self, manual: bool) -> u32 {
        let next = self.signal.phase.opposite();
        let duration = if manual {
            signal::INITIAL_GREEN_SECS
        } else {
            signal::local_duration(self.pair_total(next), self.pair_total(self.signal.phase))
        };
        self.switch_to(next, duration);
        duration
    }

    /// Emergency override: a randomly chosen lane gets an extended green and
    /// normal transitions are held until the override clears on the sim clock.
    pub fn trigger_emergency(&mut self, rng: &mut StdRng) -> Direction {
        let lane = *Direction::ALL.choose(rng).unwrap();
        let phase = Phase::for_direction(lane);
        if phase != self.signal.phase {
            self.switch_to(phase, signal::EMERGENCY_GREEN_SECS);
        } else {
            self.extend(signal::EMERGENCY_GREEN_SECS);
        }
        self.emergency = Some(Emergency {
            lane,
            clears_at: self.clock + signal::EMERGENCY_HOLD_SECS as u64,
        });
        lane
    }

    // ===== Wire Snapshot =====

    /// Project the world into the decision-request shape.
    pub fn wire_state(&self) -> IntersectionState {
        let emergency_lane = self.emergency_lane();
        let lanes = self
            .lanes
            .values()
            .map(|lane| {
                let occupancy = lane.vehicle_count as f64 / MAX_LANE_VEHICLES as f64;
                let has_emergency = emergency_lane == Some(lane.direction);
                let state = LaneState {
                    direction: lane.direction,
                    vision: VisionReport {
                        vehicle_count_by_type: lane.breakdown(has_emergency),
                        avg_speed: 60.0 - 55.0 * occupancy,
                        lane_occupancy: occupancy,
                        ambulance_detected: has_emergency,
                        rain_detected: self.weather.is_wet(),
                        confidence_score: 0.95,
                    },
                    downstream: Some(DownstreamReport {
                        avg_speed: 60.0 * (1.0 - 0.8 * occupancy),
                        congestion_index: 0.8 * occupancy,
                        ttl: 60,
                    }),
                    wait_time: lane.wait_time,
                    last_green_time: lane.last_green_time,
                };
                (lane.direction, state)
            })
            .collect();
        IntersectionState {
            lanes,
            current_signal: Some(self.signal.phase.representative()),
            emergency_mode: self.emergency.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn state(seed: u64) -> (SimState, StdRng) {
        let mut rng = StdRng::seed_from_u64(seed);
        let state = SimState::new(&mut rng);
        (state, rng)
    }

    #[test]
    fn lane_counts_stay_bounded_under_any_weather() {
        let (mut state, mut rng) = state(7);
        state.weather = Weather::Storm;
        for _ in 0..500 {
            state.advance(&mut rng);
            for lane in state.lanes.values() {
                assert!(lane.vehicle_count <= MAX_LANE_VEHICLES);
            }
        }
    }

    #[test]
    fn only_red_lanes_accrue_wait() {
        let (mut state, mut rng) = state(11);
        for _ in 0..5 {
            state.advance(&mut rng);
        }
        for direction in state.signal.phase.lanes() {
            assert_eq!(state.lane(direction).wait_time, 0.0);
        }
        for direction in state.signal.phase.opposite().lanes() {
            assert_eq!(state.lane(direction).wait_time, 5.0);
        }
    }

    #[test]
    fn switch_resets_the_newly_green_pair() {
        let (mut state, mut rng) = state(3);
        for _ in 0..10 {
            state.advance(&mut rng);
        }
        assert_eq!(state.lane(Direction::East).wait_time, 10.0);
        state.switch_to(Phase::EastWest, 45);
        assert_eq!(state.signal.cycle_count, 1);
        assert_eq!(state.signal.timer, 45);
        for direction in [Direction::East, Direction::West] {
            assert_eq!(state.lane(direction).wait_time, 0.0);
            assert_eq!(state.lane(direction).last_green_time, 10.0);
        }
        // The pair that lost the green keeps its old last-green stamp.
        assert_eq!(state.lane(Direction::North).last_green_time, 0.0);
    }

    #[test]
    fn extension_keeps_cycle_count_and_wait_clocks() {
        let (mut state, mut rng) = state(3);
        for _ in 0..4 {
            state.advance(&mut rng);
        }
        let east_wait = state.lane(Direction::East).wait_time;
        state.extend(38);
        assert_eq!(state.signal.timer, 38);
        assert_eq!(state.signal.cycle_count, 0);
        assert_eq!(state.lane(Direction::East).wait_time, east_wait);
    }

    #[test]
    fn manual_flip_always_gets_default_duration() {
        let (mut state, _) = state(5);
        state.lanes.get_mut(&Direction::East).unwrap().vehicle_count = 8;
        state.lanes.get_mut(&Direction::West).unwrap().vehicle_count = 8;
        state.lanes.get_mut(&Direction::North).unwrap().vehicle_count = 0;
        state.lanes.get_mut(&Direction::South).unwrap().vehicle_count = 0;
        assert_eq!(state.flip_local(true), 30);
    }

    #[test]
    fn automatic_flip_follows_load_ratio() {
        let (mut state, _) = state(5);
        state.lanes.get_mut(&Direction::East).unwrap().vehicle_count = 8;
        state.lanes.get_mut(&Direction::West).unwrap().vehicle_count = 8;
        state.lanes.get_mut(&Direction::North).unwrap().vehicle_count = 1;
        state.lanes.get_mut(&Direction::South).unwrap().vehicle_count = 1;
        // Flipping from NorthSouth hands the green to the loaded pair.
        assert_eq!(state.flip_local(false), 45);
        assert_eq!(state.signal.phase, Phase::EastWest);
        assert_eq!(state.signal.cycle_count, 1);
    }

    #[test]
    fn emergency_forces_sixty_seconds_and_auto_clears() {
        let (mut state, mut rng) = state(9);
        let lane = state.trigger_emergency(&mut rng);
        assert_eq!(state.signal.timer, 60);
        assert_eq!(state.signal.phase, Phase::for_direction(lane));
        assert!(state.emergency.is_some());

        for i in 1..=10u64 {
            state.advance(&mut rng);
            if i < 10 {
                assert!(state.emergency.is_some(), "cleared early at {i}s");
            }
        }
        assert!(state.emergency.is_none());
    }

    #[test]
    fn breakdown_is_a_fixed_split_of_the_count() {
        let lane = Lane::new(Direction::North, 8);
        let counts = lane.breakdown(false);
        assert_eq!(counts.car, 4);
        assert_eq!(counts.truck, 1);
        assert_eq!(counts.bus, 0);
        assert_eq!(counts.car + counts.bike + counts.truck + counts.bus, 8);
        assert_eq!(counts.emergency, 0);

        let with_emergency = lane.breakdown(true);
        assert_eq!(with_emergency.emergency, 1);
    }

    #[test]
    fn wire_state_reflects_signal_and_occupancy() {
        let (mut state, mut rng) = state(1);
        state.lanes.get_mut(&Direction::North).unwrap().vehicle_count = 8;
        let wire = state.wire_state();
        assert_eq!(wire.current_signal, Some(Direction::North));
        assert!(!wire.emergency_mode);
        let north = &wire.lanes[&Direction::North];
        assert_eq!(north.vision.lane_occupancy, 1.0);
        assert_eq!(north.vision.avg_speed, 5.0);

        state.trigger_emergency(&mut rng);
        assert!(state.wire_state().emergency_mode);
    }

    #[test]
    fn stats_history_is_bounded() {
        let (mut state, mut rng) = state(2);
        for _ in 0..(STATS_HISTORY_CAP + 40) {
            state.advance(&mut rng);
        }
        assert_eq!(state.stats.len(), STATS_HISTORY_CAP);
        let latest = state.stats.latest().unwrap();
        assert_eq!(latest.clock, state.clock);
        assert!(latest.efficiency >= 0.0 && latest.efficiency <= 100.0);
    }
}
