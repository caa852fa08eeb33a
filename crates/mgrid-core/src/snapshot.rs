//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Per-tick snapshot and report payloads."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use mgrid_common::types::Sample;
use mgrid_control::{ActionLabel, StabilizationMode};
use serde::Serialize;

/// Emitted once per tick after both windows are full. Serialized as one JSON line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub tick: u64,
    pub timestamp: DateTime<Utc>,
    pub regime: String,
    pub voltage: f64,
    pub frequency: f64,
    pub predicted_voltage: f64,
    pub predicted_frequency: f64,
    pub voltage_action: ActionLabel,
    pub frequency_action: ActionLabel,
    pub stabilization_quality: f64,
}

/// Everything a single tick observed, whether or not it produced a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub regime: String,
    pub raw: Sample,
    pub reported: Sample,
    pub voltage_deviation: f64,
    pub frequency_deviation: f64,
    pub mode: StabilizationMode,
    pub snapshot: Option<Snapshot>,
}
