//! Two-phase signal state and the local decision rules.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::Direction;

pub const INITIAL_GREEN_SECS: u32 = 30;
pub const EMERGENCY_GREEN_SECS: u32 = 60;
pub const EMERGENCY_HOLD_SECS: u32 = 10;

/// Minimum spacing between remote decision calls, in simulated seconds.
/// A decision falling inside the window is made locally instead.
pub const REMOTE_CALL_SPACING_SECS: u64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    NorthSouth,
    EastWest,
}

impl Phase {
    pub fn lanes(self) -> [Direction; 2] {
        match self {
            Phase::NorthSouth => [Direction::North, Direction::South],
            Phase::EastWest => [Direction::East, Direction::West],
        }
    }

    pub fn opposite(self) -> Phase {
        match self {
            Phase::NorthSouth => Phase::EastWest,
            Phase::EastWest => Phase::NorthSouth,
        }
    }

    pub fn for_direction(direction: Direction) -> Phase {
        match direction {
            Direction::North | Direction::South => Phase::NorthSouth,
            Direction::East | Direction::West => Phase::EastWest,
        }
    }

    /// Lane name used for this phase in the `currentSignal` wire field.
    pub fn representative(self) -> Direction {
        match self {
            Phase::NorthSouth => Direction::North,
            Phase::EastWest => Direction::East,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::NorthSouth => f.write_str("north-south"),
            Phase::EastWest => f.write_str("east-west"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SignalState {
    pub phase: Phase,
    /// Seconds left in the current phase. Decremented exactly once per tick.
    pub timer: u32,
    pub cycle_count: u32,
}

impl SignalState {
    pub fn new() -> Self {
        SignalState {
            phase: Phase::NorthSouth,
            timer: INITIAL_GREEN_SECS,
            cycle_count: 0,
        }
    }

    pub fn expired(&self) -> bool {
        self.timer == 0
    }
}

impl Default for SignalState {
    fn default() -> Self {
        Self::new()
    }
}

/// Round a remote duration to whole seconds, halves up.
pub fn round_half_up(secs: f64) -> u32 {
    (secs + 0.5).floor().max(0.0) as u32
}

/// Green time for a freshly flipped phase, from the opposing pair loads.
/// The newly green pair gets extra time when it clearly dominates and a
/// short slot when it is clearly the quieter pair.
pub fn local_duration(newly_green_total: u32, other_total: u32) -> u32 {
    if newly_green_total > 2 * other_total {
        45
    } else if 2 * newly_green_total < other_total {
        20
    } else {
        30
    }
}
