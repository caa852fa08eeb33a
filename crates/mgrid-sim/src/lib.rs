//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation runtime module exports and shared types."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
//! Scenario-driven telemetry simulation for the microgrid stabilizer.
//!
//! Every random draw takes the caller's `Rng` and every time-dependent
//! decision takes an explicit `now`, so runs are reproducible under test.

pub mod baseline;
pub mod errors;
pub mod generator;
pub mod scenario;

pub use baseline::{BaselineRow, BaselineSource, CyclicBaseline};
pub use errors::{Result, SimError};
pub use generator::{diurnal_shape, TelemetryGenerator};
pub use scenario::{normalize_weights, DayPeriod, Regime, RegimeTable, ScenarioEngine, ScenarioState};
