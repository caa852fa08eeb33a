//! ---
//! ems_section: "07-control-stabilization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Stabilization controller, windows and action classification."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Pure, synchronous control primitives. Synchronization is the caller's
//! concern; nothing here spawns tasks or reads the system clock.

pub mod classifier;
pub mod controller;
pub mod errors;
pub mod window;

pub use classifier::{classify, ActionClassifier, ActionLabel, Direction};
pub use controller::{
    ramp_step, ControllerState, ControllerTuning, StabilizationController, StabilizationMode,
    Stabilized,
};
pub use errors::{ControlError, Result};
pub use window::{ChannelWindows, SlidingWindow};
