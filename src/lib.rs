//! Traffic intersection simulation with an AI signal decision service.
//!
//! The simulation side runs a four-lane intersection on a cooperative tick
//! loop and asks a decision service which phase to serve next; the service
//! side implements that decision pipeline over HTTP.

pub mod client;
pub mod engine;
pub mod maps;
pub mod models;
pub mod runner;
pub mod server;
pub mod signal;
pub mod simulation;

pub use client::DecisionClient;
pub use engine::DecisionEngine;
pub use maps::MapsAdapter;
pub use runner::{RunnerConfig, Simulator};
pub use server::AppState;
pub use simulation::SimState;
