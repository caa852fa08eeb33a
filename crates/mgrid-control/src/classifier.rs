//! ---
//! ems_section: "07-control-stabilization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Stabilization controller, windows and action classification."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;

use mgrid_common::config::{GridConfig, StabilizationConfig};
use mgrid_common::types::Channel;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Increase,
    Decrease,
}

impl Direction {
    /// Direction that moves a value toward nominal given `deviation = nominal - value`.
    pub fn from_deviation(deviation: f64) -> Self {
        if deviation >= 0.0 {
            Direction::Increase
        } else {
            Direction::Decrease
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Increase => f.write_str("Increase"),
            Direction::Decrease => f.write_str("Decrease"),
        }
    }
}

/// Discrete corrective action attached to a predicted value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionLabel {
    IncreaseVoltage,
    DecreaseVoltage,
    IncreaseFrequency,
    DecreaseFrequency,
    NoAction,
    /// Auto-stabilized correction annotated with the current deviation.
    Adjust { channel: Channel, deviation: f64 },
    /// Under manual control; `deviation` is what it takes to reach nominal.
    ManualControl { channel: Channel, deviation: f64 },
}

impl ActionLabel {
    fn directional(channel: Channel, direction: Direction) -> Self {
        match (channel, direction) {
            (Channel::Voltage, Direction::Increase) => ActionLabel::IncreaseVoltage,
            (Channel::Voltage, Direction::Decrease) => ActionLabel::DecreaseVoltage,
            (Channel::Frequency, Direction::Increase) => ActionLabel::IncreaseFrequency,
            (Channel::Frequency, Direction::Decrease) => ActionLabel::DecreaseFrequency,
        }
    }

    pub fn is_no_action(&self) -> bool {
        matches!(self, ActionLabel::NoAction)
    }
}

impl fmt::Display for ActionLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionLabel::IncreaseVoltage => f.write_str("Increase Volt"),
            ActionLabel::DecreaseVoltage => f.write_str("Decrease Volt"),
            ActionLabel::IncreaseFrequency => f.write_str("Increase Freq"),
            ActionLabel::DecreaseFrequency => f.write_str("Decrease Freq"),
            ActionLabel::NoAction => f.write_str("No Action Needed"),
            ActionLabel::Adjust { channel, deviation } => write!(
                f,
                "{} {} by {:.2} {}",
                Direction::from_deviation(*deviation),
                channel.short_name(),
                deviation.abs(),
                channel.unit()
            ),
            ActionLabel::ManualControl { channel, deviation } => write!(
                f,
                "Manual Control (deviation {:.2} {})",
                deviation,
                channel.unit()
            ),
        }
    }
}

/// Classify a predicted value against `nominal ± tolerance`.
///
/// Comparisons are strict: a value exactly on the band edge needs no action.
pub fn classify(channel: Channel, predicted: f64, nominal: f64, tolerance: f64) -> ActionLabel {
    if predicted > nominal + tolerance {
        ActionLabel::directional(channel, Direction::Decrease)
    } else if predicted < nominal - tolerance {
        ActionLabel::directional(channel, Direction::Increase)
    } else {
        ActionLabel::NoAction
    }
}

#[derive(Debug, Clone, Copy)]
struct Band {
    nominal: f64,
    tolerance: f64,
    enrich_threshold: f64,
}

/// Band classification plus deviation enrichment for both channels.
#[derive(Debug, Clone)]
pub struct ActionClassifier {
    voltage: Band,
    frequency: Band,
}

impl ActionClassifier {
    pub fn new(grid: &GridConfig, stabilization: &StabilizationConfig) -> Self {
        let band = |channel| Band {
            nominal: grid.nominal(channel),
            tolerance: grid.tolerance(channel),
            enrich_threshold: stabilization.enrich_threshold(channel),
        };
        Self {
            voltage: band(Channel::Voltage),
            frequency: band(Channel::Frequency),
        }
    }

    fn band(&self, channel: Channel) -> Band {
        match channel {
            Channel::Voltage => self.voltage,
            Channel::Frequency => self.frequency,
        }
    }

    /// Label for `predicted`, enriched with this tick's `deviation` (`nominal - reported`).
    pub fn label(
        &self,
        channel: Channel,
        predicted: f64,
        auto_stabilize: bool,
        deviation: f64,
    ) -> ActionLabel {
        if !auto_stabilize {
            return ActionLabel::ManualControl { channel, deviation };
        }
        let band = self.band(channel);
        if deviation.abs() > band.enrich_threshold {
            return ActionLabel::Adjust { channel, deviation };
        }
        classify(channel, predicted, band.nominal, band.tolerance)
    }
}
