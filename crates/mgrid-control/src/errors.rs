//! ---
//! ems_section: "07-control-stabilization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Stabilization controller, windows and action classification."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use mgrid_common::types::Channel;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ControlError>;

#[derive(Debug, Error, PartialEq)]
pub enum ControlError {
    #[error("{channel} offset must be finite (got {value})")]
    NonFiniteOffset { channel: Channel, value: f64 },
    #[error("sliding window capacity must be at least 1")]
    ZeroCapacity,
}
