//! Cooperative tick loop for the simulation.
//!
//! One logical worker: a tick runs to completion, including any awaited
//! decision call, before the next is scheduled. The delay between ticks is
//! `1000ms / speed`, so a speed of 2.0 runs the world at twice real time.

use rand::rngs::StdRng;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::client::DecisionClient;
use crate::models::ControlMode;
use crate::signal::{self, Phase};
use crate::simulation::SimState;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub mode: ControlMode,
    /// Speed multiplier over real time.
    pub speed: f64,
    /// Tick limit; 0 runs until stopped.
    pub ticks: u64,
    /// Per-tick chance of an emergency vehicle arriving.
    pub emergency_probability: f64,
    /// Simulated seconds between reachability probes.
    pub health_check_interval: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            mode: ControlMode::Ai,
            speed: 1.0,
            ticks: 0,
            emergency_probability: 0.005,
            health_check_interval: 10,
        }
    }
}

pub struct Simulator {
    state: SimState,
    rng: StdRng,
    client: Option<DecisionClient>,
    config: RunnerConfig,
    service_reachable: bool,
    last_remote_call: Option<u64>,
    last_health_check: Option<u64>,
    running: Arc<AtomicBool>,
}

impl Simulator {
    pub fn new(
        config: RunnerConfig,
        client: Option<DecisionClient>,
        mut rng: StdRng,
        running: Arc<AtomicBool>,
    ) -> Self {
        let state = SimState::new(&mut rng);
        Simulator {
            state,
            rng,
            // A client is only consulted in automatic mode
            service_reachable: client.is_some(),
            client,
            config,
            last_remote_call: None,
            last_health_check: None,
            running,
        }
    }

    pub fn state(&self) -> &SimState {
        &self.state
    }

    /// Run ticks until the limit is reached or the stop flag flips, then
    /// hand back the final world state.
    pub async fn run(mut self) -> SimState {
        log::info!(
            "Starting intersection simulation: mode={}, speed=x{}, ticks={}",
            match self.config.mode {
                ControlMode::Ai => "automatic",
                ControlMode::Manual => "manual",
            },
            self.config.speed,
            if self.config.ticks == 0 {
                "unbounded".to_string()
            } else {
                self.config.ticks.to_string()
            }
        );

        let delay = Duration::from_millis((1000.0 / self.config.speed).max(1.0) as u64);
        let mut ticks_done = 0u64;
        while self.running.load(Ordering::SeqCst) {
            self.tick().await;
            ticks_done += 1;
            if self.config.ticks != 0 && ticks_done >= self.config.ticks {
                break;
            }
            tokio::time::sleep(delay).await;
        }

        if let Some(sample) = self.state.stats.latest() {
            log::info!(
                "Simulation finished at t={}s: {} cycles, avg wait {:.1}s, efficiency {:.0}%",
                self.state.clock,
                self.state.signal.cycle_count,
                sample.avg_wait,
                sample.efficiency
            );
        }
        self.state
    }

    /// One simulated second: world update, emergency arrival, reachability
    /// probe, countdown, and (when due) a signal decision.
    pub async fn tick(&mut self) {
        self.state.advance(&mut self.rng);

        if self.state.emergency.is_none()
            && self.config.emergency_probability > 0.0
            && self.rng.gen_bool(self.config.emergency_probability)
        {
            let lane = self.state.trigger_emergency(&mut self.rng);
            log::warn!(
                "Emergency vehicle on {lane}: forcing {} green for {}s",
                Phase::for_direction(lane),
                signal::EMERGENCY_GREEN_SECS
            );
        }

        self.probe_health().await;

        self.state.signal.timer = self.state.signal.timer.saturating_sub(1);
        if self.state.signal.expired() && self.state.emergency.is_none() {
            self.decide().await;
        }

        let signal = &self.state.signal;
        log::debug!(
            "t={}s phase={} timer={}s cycle={} weather={} {} ({:.0}°C) lanes={:?}",
            self.state.clock,
            signal.phase,
            signal.timer,
            signal.cycle_count,
            self.state.weather.icon(),
            self.state.weather.label(),
            self.state.weather.temperature_c(),
            self.state
                .lanes
                .values()
                .map(|l| l.vehicle_count)
                .collect::<Vec<_>>()
        );
    }

    async fn probe_health(&mut self) {
        if self.config.mode != ControlMode::Ai {
            return;
        }
        let due = self
            .last_health_check
            .map_or(true, |t| self.state.clock - t >= self.config.health_check_interval);
        if !due {
            return;
        }
        if let Some(client) = &self.client {
            let reachable = client.check_health().await;
            if reachable != self.service_reachable {
                log::info!(
                    "Decision service {}",
                    if reachable { "reachable" } else { "unreachable" }
                );
            }
            self.service_reachable = reachable;
            self.last_health_check = Some(self.state.clock);
        }
    }

    fn remote_due(&self) -> bool {
        self.config.mode == ControlMode::Ai
            && self.client.is_some()
            && self.service_reachable
            && self
                .last_remote_call
                .map_or(true, |t| self.state.clock - t >= signal::REMOTE_CALL_SPACING_SECS)
    }

    async fn decide(&mut self) {
        if self.remote_due() {
            self.last_remote_call = Some(self.state.clock);
            let wire = self.state.wire_state();
            let outcome = match &self.client {
                Some(client) => Some(client.request_decision(wire, ControlMode::Ai).await),
                None => None,
            };
            match outcome {
                Some(Ok(decision)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        log::debug!("Discarding decision that settled after stop");
                        return;
                    }
                    self.apply_remote(decision);
                    return;
                }
                Some(Err(err)) => {
                    log::warn!(
                        "Decision call failed ({err:#}); service marked unreachable"
                    );
                    self.service_reachable = false;
                }
                None => {}
            }
        }

        let manual = self.config.mode == ControlMode::Manual;
        let duration = self.state.flip_local(manual);
        log::info!(
            "Local decision: {} green for {duration}s (cycle {})",
            self.state.signal.phase,
            self.state.signal.cycle_count
        );
    }

    fn apply_remote(&mut self, decision: crate::models::SignalDecision) {
        let phase = Phase::for_direction(decision.selected_lane);
        let duration = signal::round_half_up(decision.green_duration);
        if phase == self.state.signal.phase {
            self.state.extend(duration);
            log::info!(
                "Remote decision: extend {} for {duration}s (confidence {:.2})",
                phase,
                decision.decision_confidence
            );
        } else {
            self.state.switch_to(phase, duration);
            log::info!(
                "Remote decision: switch to {} for {duration}s (confidence {:.2}, cycle {})",
                phase,
                decision.decision_confidence,
                self.state.signal.cycle_count
            );
        }
    }
}
