//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation runtime helpers and scenario engines."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("regime table must contain at least one regime")]
    EmptyRegimeTable,
    #[error("regime '{name}' has invalid noise scale {sigma}")]
    InvalidSigma { name: String, sigma: f64 },
    #[error("unknown regime '{0}'")]
    UnknownRegime(String),
    #[error("unsupported baseline format: {0}")]
    UnsupportedBaselineFormat(String),
    #[error("baseline source {0} contains no rows")]
    EmptyBaseline(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("baseline csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("baseline json error: {0}")]
    Json(#[from] serde_json::Error),
}
