//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Core runtime orchestration for the microgrid stabilizer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Tick orchestration, command handling and the predictor port.

pub mod commands;
pub mod hub;
pub mod orchestrator;
pub mod predictor;
pub mod snapshot;

pub use commands::{Command, CommandError};
pub use hub::{ControlHub, GridState};
pub use orchestrator::{Orchestrator, OrchestratorHandle};
pub use predictor::{Predictor, PredictorError, TrendPredictor};
pub use snapshot::{Snapshot, TickReport};
