//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the stabilizer runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Measured quantity carried by a telemetry stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Voltage,
    Frequency,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Voltage, Channel::Frequency];

    pub fn unit(&self) -> &'static str {
        match self {
            Channel::Voltage => "V",
            Channel::Frequency => "Hz",
        }
    }

    /// Abbreviation used in operator-facing action strings.
    pub fn short_name(&self) -> &'static str {
        match self {
            Channel::Voltage => "Volt",
            Channel::Frequency => "Freq",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Voltage => "voltage",
            Channel::Frequency => "frequency",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "voltage" => Ok(Channel::Voltage),
            "frequency" => Ok(Channel::Frequency),
            other => Err(format!("unknown channel: {}", other)),
        }
    }
}

/// One voltage/frequency reading. Never mutated after construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub voltage: f64,
    pub frequency: f64,
    pub timestamp: DateTime<Utc>,
}

impl Sample {
    pub fn new(voltage: f64, frequency: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            voltage,
            frequency,
            timestamp,
        }
    }

    pub fn value(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.voltage,
            Channel::Frequency => self.frequency,
        }
    }
}
