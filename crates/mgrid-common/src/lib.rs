//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the stabilizer runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the microgrid stabilizer workspace.
//! This crate exposes configuration loading, logging bootstrap and the
//! telemetry value types consumed across the workspace.

pub mod config;
pub mod logging;
pub mod types;

pub use config::{
    AppConfig, GeneratorConfig, GridConfig, HourRange, LoadedAppConfig, LoggingConfig,
    MetricsConfig, RegimeConfig, RuntimeConfig, ScenarioConfig, StabilizationConfig,
};
pub use logging::{init_tracing, LogFormat};
pub use types::{Channel, Sample};
