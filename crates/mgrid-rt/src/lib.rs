//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Runtime helpers supporting the orchestrator."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Tick scheduling and cancellable task helpers for the stabilizer runtime.

pub mod scheduling;
pub mod time;

pub use scheduling::{RateLimiter, TaskSlot, TaskToken};
pub use time::{duration_to_micros, jitter_us};
