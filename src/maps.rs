//! Downstream traffic awareness for the decision service.
//!
//! Simulates the road network beyond the intersection: per-direction road
//! profiles, rush-hour and weekend patterns, weather slowdowns, and random
//! accidents. The interface is shaped so a real maps provider could be
//! dropped in behind it.

use chrono::{DateTime, Datelike, Timelike, Utc};
use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;

use crate::models::{Direction, DownstreamReport};

pub const CACHE_TTL_SECS: f64 = 60.0;

/// Chance of a spontaneous accident per minute of queries.
const ACCIDENT_PROBABILITY_PER_MIN: f64 = 0.02;

pub struct MapsAdapter {
    rng: StdRng,
    cache: HashMap<(Direction, String), (DownstreamReport, f64)>,
    /// Accident end time (epoch seconds) per downstream road.
    active_accidents: HashMap<Direction, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficSummaryEntry {
    pub speed: f64,
    pub congestion: f64,
    pub level: &'static str,
    pub has_accident: bool,
}

/// Free-flow speed of the road segment each lane drains into.
fn base_speed(lane: Direction) -> f64 {
    match lane {
        Direction::North => 45.0, // downtown
        Direction::South => 70.0, // highway
        Direction::East => 35.0,  // residential
        Direction::West => 50.0,  // industrial
    }
}

pub fn downstream_road(lane: Direction) -> &'static str {
    match lane {
        Direction::North => "road_north_downtown",
        Direction::South => "road_south_highway",
        Direction::East => "road_east_residential",
        Direction::West => "road_west_industrial",
    }
}

impl MapsAdapter {
    pub fn new(rng: StdRng) -> Self {
        MapsAdapter {
            rng,
            cache: HashMap::new(),
            active_accidents: HashMap::new(),
        }
    }

    /// Downstream conditions for a lane, cached for [`CACHE_TTL_SECS`] per
    /// (lane, weather) pair.
    pub fn downstream_traffic(
        &mut self,
        lane: Direction,
        weather: Option<&str>,
        now: DateTime<Utc>,
    ) -> DownstreamReport {
        let now_secs = now.timestamp() as f64;
        let key = (lane, weather.unwrap_or_default().to_string());
        if let Some((report, cached_at)) = self.cache.get(&key) {
            if now_secs - cached_at < CACHE_TTL_SECS {
                return report.clone();
            }
        }

        let report = self.simulate(lane, weather, now);
        self.cache.insert(key, (report.clone(), now_secs));
        report
    }

    fn simulate(
        &mut self,
        lane: Direction,
        weather: Option<&str>,
        now: DateTime<Utc>,
    ) -> DownstreamReport {
        let base = base_speed(lane);
        let time_factor = self.time_of_day_factor(now.hour(), now.weekday().num_days_from_monday());
        let weather_factor = self.weather_factor(weather);
        let random_factor = self.rng.gen_range(0.85..1.15);
        let accident_factor = self.accident_factor(lane, now.timestamp() as f64);

        let speed =
            (base * time_factor * weather_factor * random_factor * accident_factor).clamp(5.0, 100.0);

        // Congestion relative to the road's best case
        let congestion = (1.0 - speed / (base * 1.2)).clamp(0.0, 1.0);

        DownstreamReport {
            avg_speed: (speed * 10.0).round() / 10.0,
            congestion_index: (congestion * 100.0).round() / 100.0,
            ttl: CACHE_TTL_SECS as u32,
        }
    }

    fn time_of_day_factor(&mut self, hour: u32, weekday: u32) -> f64 {
        let is_weekend = weekday >= 5;
        if is_weekend {
            return if (10..=20).contains(&hour) {
                self.rng.gen_range(0.8..0.95)
            } else {
                self.rng.gen_range(0.95..1.1)
            };
        }

        match hour {
            7..=9 => self.rng.gen_range(0.4..0.6),    // morning rush
            17..=19 => self.rng.gen_range(0.3..0.5),  // evening rush
            10..=16 => self.rng.gen_range(0.7..0.9),  // midday
            22..=23 | 0..=5 => self.rng.gen_range(1.0..1.2), // night
            _ => self.rng.gen_range(0.8..1.0),
        }
    }

    fn weather_factor(&mut self, weather: Option<&str>) -> f64 {
        let Some(weather) = weather else {
            return 1.0;
        };
        let weather = weather.to_lowercase();

        if weather.contains("storm") || weather.contains("heavy rain") {
            self.rng.gen_range(0.5..0.7)
        } else if weather.contains("snow") {
            self.rng.gen_range(0.4..0.6)
        } else if weather.contains("rain") || weather.contains("drizzle") {
            self.rng.gen_range(0.8..0.9)
        } else if weather.contains("fog") {
            self.rng.gen_range(0.7..0.85)
        } else {
            1.0
        }
    }

    fn accident_factor(&mut self, lane: Direction, now_secs: f64) -> f64 {
        if let Some(end) = self.active_accidents.get(&lane).copied() {
            if now_secs < end {
                return self.rng.gen_range(0.2..0.4);
            }
            self.active_accidents.remove(&lane);
            return 1.0;
        }

        if self.rng.gen_bool(ACCIDENT_PROBABILITY_PER_MIN / 60.0) {
            let duration_secs = self.rng.gen_range(15 * 60..45 * 60) as f64;
            self.active_accidents.insert(lane, now_secs + duration_secs);
            log::warn!("Accident started on {}", downstream_road(lane));
            return self.rng.gen_range(0.2..0.4);
        }

        1.0
    }

    pub fn trigger_accident(&mut self, lane: Direction, duration_minutes: u32, now: DateTime<Utc>) {
        let end = now.timestamp() as f64 + duration_minutes as f64 * 60.0;
        self.active_accidents.insert(lane, end);
        self.cache.clear();
    }

    pub fn clear_accidents(&mut self) {
        self.active_accidents.clear();
        self.cache.clear();
    }

    pub fn has_accident(&self, lane: Direction) -> bool {
        self.active_accidents.contains_key(&lane)
    }

    /// Current downstream picture for all four lanes.
    pub fn summary(&mut self, now: DateTime<Utc>) -> HashMap<String, TrafficSummaryEntry> {
        Direction::ALL
            .into_iter()
            .map(|lane| {
                let report = self.downstream_traffic(lane, None, now);
                let level = match report.congestion_index {
                    c if c < 0.3 => "Light",
                    c if c < 0.6 => "Moderate",
                    c if c < 0.8 => "Heavy",
                    _ => "Gridlock",
                };
                let entry = TrafficSummaryEntry {
                    speed: report.avg_speed,
                    congestion: report.congestion_index,
                    level,
                    has_accident: self.active_accidents.contains_key(&lane),
                };
                (lane.to_string(), entry)
            })
            .collect()
    }
}
