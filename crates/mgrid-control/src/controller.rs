//! ---
//! ems_section: "07-control-stabilization"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Stabilization controller, windows and action classification."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use mgrid_common::config::{GridConfig, StabilizationConfig};
use mgrid_common::types::Channel;
use serde::Serialize;
use tracing::debug;

use crate::errors::{ControlError, Result};

/// Static gains and set points of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerTuning {
    pub nominal_voltage: f64,
    pub nominal_frequency: f64,
    pub correction_rate: f64,
    pub quality_gain_rate: f64,
    pub quality_loss_rate: f64,
    pub perfect_threshold: f64,
    pub stable_cooldown: Duration,
}

impl ControllerTuning {
    pub fn from_config(grid: &GridConfig, stabilization: &StabilizationConfig) -> Self {
        Self {
            nominal_voltage: grid.nominal_voltage,
            nominal_frequency: grid.nominal_frequency,
            correction_rate: stabilization.correction_rate,
            quality_gain_rate: stabilization.quality_gain_rate,
            quality_loss_rate: stabilization.quality_loss_rate,
            perfect_threshold: stabilization.perfect_threshold,
            stable_cooldown: stabilization.stable_cooldown,
        }
    }

    pub fn nominal(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.nominal_voltage,
            Channel::Frequency => self.nominal_frequency,
        }
    }
}

/// Mutable controller state. Copied out for snapshots; mutated only through
/// [`StabilizationController`] methods.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControllerState {
    pub voltage_offset: f64,
    pub frequency_offset: f64,
    pub auto_stabilize: bool,
    /// Cleared while a manual nudge is being observed.
    pub stabilize_enabled: bool,
    pub perfect_mode: bool,
    pub stabilization_quality: f64,
    pub last_destabilize: Option<DateTime<Utc>>,
}

impl ControllerState {
    pub fn offset(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.voltage_offset,
            Channel::Frequency => self.frequency_offset,
        }
    }

    fn offset_mut(&mut self, channel: Channel) -> &mut f64 {
        match channel {
            Channel::Voltage => &mut self.voltage_offset,
            Channel::Frequency => &mut self.frequency_offset,
        }
    }
}

/// Which branch of the state machine produced a tick's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StabilizationMode {
    Manual,
    Paused,
    Correcting,
    Blending,
}

/// Output of one controller step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stabilized {
    pub voltage: f64,
    pub frequency: f64,
    /// `nominal - reported`
    pub voltage_deviation: f64,
    pub frequency_deviation: f64,
    pub blend_factor: f64,
    pub mode: StabilizationMode,
}

impl Stabilized {
    pub fn value(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.voltage,
            Channel::Frequency => self.frequency,
        }
    }

    pub fn deviation(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.voltage_deviation,
            Channel::Frequency => self.frequency_deviation,
        }
    }
}

/// Offset after `step` of a `steps`-long ramp to zero, given the live offset `current`.
///
/// Scales whatever the offset is now, so corrections applied between steps are kept.
/// Untouched, the sequence is linear from the starting offset. The final step returns
/// exactly `0.0`.
pub fn ramp_step(current: f64, step: u32, steps: u32) -> f64 {
    if steps == 0 || step >= steps {
        return 0.0;
    }
    let remaining = steps - step;
    current * f64::from(remaining) / f64::from(remaining + 1)
}

/// Feedback and blend controller turning raw samples into reported samples.
#[derive(Debug, Clone)]
pub struct StabilizationController {
    tuning: ControllerTuning,
    state: ControllerState,
}

impl StabilizationController {
    pub fn new(tuning: ControllerTuning, auto_stabilize: bool, perfect_mode: bool) -> Self {
        Self {
            tuning,
            state: ControllerState {
                voltage_offset: 0.0,
                frequency_offset: 0.0,
                auto_stabilize,
                stabilize_enabled: true,
                perfect_mode,
                stabilization_quality: 0.0,
                last_destabilize: None,
            },
        }
    }

    pub fn from_config(grid: &GridConfig, stabilization: &StabilizationConfig) -> Self {
        Self::new(
            ControllerTuning::from_config(grid, stabilization),
            stabilization.auto_stabilize,
            stabilization.perfect_mode,
        )
    }

    pub fn tuning(&self) -> &ControllerTuning {
        &self.tuning
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn quality(&self) -> f64 {
        self.state.stabilization_quality
    }

    /// `1.0` when perfect mode is forced, otherwise the learned quality.
    pub fn blend_factor(&self) -> f64 {
        if self.state.perfect_mode {
            1.0
        } else {
            self.state.stabilization_quality.clamp(0.0, 1.0)
        }
    }

    pub fn mode(&self) -> StabilizationMode {
        match (self.state.auto_stabilize, self.state.stabilize_enabled) {
            (false, _) => StabilizationMode::Manual,
            (true, false) => StabilizationMode::Paused,
            (true, true) if self.blend_factor() > self.tuning.perfect_threshold => {
                StabilizationMode::Blending
            }
            (true, true) => StabilizationMode::Correcting,
        }
    }

    /// `true` once the cooldown since the last destabilization has passed.
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        let Some(last) = self.state.last_destabilize else {
            return true;
        };
        match chrono::Duration::from_std(self.tuning.stable_cooldown) {
            Ok(cooldown) => now.signed_duration_since(last) > cooldown,
            Err(_) => false,
        }
    }

    /// Advance one tick: learn quality, then correct or blend the raw sample.
    pub fn apply(&mut self, raw_voltage: f64, raw_frequency: f64, now: DateTime<Utc>) -> Stabilized {
        let stable = self.state.auto_stabilize && self.state.stabilize_enabled;
        if stable && self.cooldown_elapsed(now) {
            self.state.stabilization_quality =
                (self.state.stabilization_quality + self.tuning.quality_gain_rate).min(1.0);
        }

        let mode = self.mode();
        let factor = self.blend_factor();
        let voltage = self.step_channel(Channel::Voltage, raw_voltage, mode, factor);
        let frequency = self.step_channel(Channel::Frequency, raw_frequency, mode, factor);

        Stabilized {
            voltage,
            frequency,
            voltage_deviation: self.tuning.nominal_voltage - voltage,
            frequency_deviation: self.tuning.nominal_frequency - frequency,
            blend_factor: factor,
            mode,
        }
    }

    fn step_channel(
        &mut self,
        channel: Channel,
        raw: f64,
        mode: StabilizationMode,
        factor: f64,
    ) -> f64 {
        let nominal = self.tuning.nominal(channel);
        let rate = self.tuning.correction_rate;
        let offset = self.state.offset_mut(channel);
        match mode {
            StabilizationMode::Manual | StabilizationMode::Paused => raw + *offset,
            StabilizationMode::Correcting => {
                *offset += (nominal - (raw + *offset)) * rate;
                raw + *offset
            }
            StabilizationMode::Blending => {
                // no additive correction on blended ticks; the offset only decays
                *offset *= 1.0 - factor;
                nominal * factor + raw * (1.0 - factor)
            }
        }
    }

    /// Set the manual offset of one channel.
    pub fn set_offset(&mut self, channel: Channel, value: f64) -> Result<()> {
        if !value.is_finite() {
            return Err(ControlError::NonFiniteOffset { channel, value });
        }
        *self.state.offset_mut(channel) = value;
        Ok(())
    }

    pub fn offset(&self, channel: Channel) -> f64 {
        self.state.offset(channel)
    }

    pub fn set_auto_stabilize(&mut self, enabled: bool) {
        self.state.auto_stabilize = enabled;
    }

    pub fn set_stabilize_enabled(&mut self, enabled: bool) {
        self.state.stabilize_enabled = enabled;
    }

    pub fn set_perfect_mode(&mut self, enabled: bool) {
        self.state.perfect_mode = enabled;
    }

    /// Knock learned quality down by the loss rate and restart the cooldown.
    pub fn destabilize(&mut self, now: DateTime<Utc>) {
        let before = self.state.stabilization_quality;
        self.state.stabilization_quality =
            (before * (1.0 - self.tuning.quality_loss_rate)).clamp(0.0, 1.0);
        self.state.last_destabilize = Some(now);
        debug!(
            before,
            after = self.state.stabilization_quality,
            "stabilization quality reduced"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tuning() -> ControllerTuning {
        ControllerTuning {
            nominal_voltage: 230.0,
            nominal_frequency: 50.0,
            correction_rate: 0.05,
            quality_gain_rate: 0.01,
            quality_loss_rate: 0.5,
            perfect_threshold: 0.9,
            stable_cooldown: Duration::from_secs(30),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn tick(n: i64) -> DateTime<Utc> {
        t0() + chrono::Duration::seconds(n)
    }

    #[test]
    fn manual_mode_adds_offsets_without_correction() {
        let mut controller = StabilizationController::new(tuning(), false, false);
        controller.set_offset(Channel::Voltage, 10.0).unwrap();
        for n in 0..10 {
            let out = controller.apply(230.0, 50.0, tick(n));
            assert_eq!(out.voltage, 240.0);
            assert_eq!(out.frequency, 50.0);
            assert_eq!(out.voltage_deviation, -10.0);
            assert_eq!(out.mode, StabilizationMode::Manual);
        }
        assert_eq!(controller.offset(Channel::Voltage), 10.0);
        assert_eq!(controller.quality(), 0.0);
    }

    #[test]
    fn auto_correction_decays_offset_geometrically() {
        let mut controller = StabilizationController::new(tuning(), true, false);
        controller.set_offset(Channel::Voltage, 10.0).unwrap();
        controller.set_offset(Channel::Frequency, -0.8).unwrap();
        let mut previous = controller.offset(Channel::Voltage).abs();
        for n in 0..80 {
            let out = controller.apply(230.0, 50.0, tick(n));
            let current = controller.offset(Channel::Voltage).abs();
            assert!(current < previous, "offset did not shrink at tick {}", n);
            assert!((out.voltage - (230.0 + controller.offset(Channel::Voltage))).abs() < 1e-12);
            previous = current;
        }
        let expected = 10.0 * 0.95_f64.powi(80);
        assert!((controller.offset(Channel::Voltage) - expected).abs() < 1e-9);
        assert!(controller.offset(Channel::Frequency).abs() < 0.8 * 0.95_f64.powi(79));
    }

    #[test]
    fn paused_controller_holds_offset_and_quality() {
        let mut controller = StabilizationController::new(tuning(), true, false);
        controller.set_offset(Channel::Voltage, 4.0).unwrap();
        controller.set_stabilize_enabled(false);
        let out = controller.apply(230.0, 50.0, tick(0));
        assert_eq!(out.mode, StabilizationMode::Paused);
        assert_eq!(out.voltage, 234.0);
        assert_eq!(controller.offset(Channel::Voltage), 4.0);
        assert_eq!(controller.quality(), 0.0);
    }

    #[test]
    fn quality_rises_by_gain_and_saturates() {
        let mut controller = StabilizationController::new(tuning(), true, false);
        for n in 0..50 {
            let before = controller.quality();
            controller.apply(230.0, 50.0, tick(n));
            assert!((controller.quality() - (before + 0.01)).abs() < 1e-12);
        }
        for n in 50..200 {
            controller.apply(230.0, 50.0, tick(n));
            assert!(controller.quality() <= 1.0);
        }
        assert_eq!(controller.quality(), 1.0);
    }

    #[test]
    fn destabilize_halves_quality_and_restarts_cooldown() {
        let mut controller = StabilizationController::new(tuning(), true, false);
        for n in 0..60 {
            controller.apply(230.0, 50.0, tick(n));
        }
        let learned = controller.quality();
        controller.destabilize(tick(60));
        assert!((controller.quality() - learned * 0.5).abs() < 1e-12);

        // within the 30 s cooldown (and exactly at it) no learning happens
        for n in 61..=90 {
            controller.apply(230.0, 50.0, tick(n));
            assert!((controller.quality() - learned * 0.5).abs() < 1e-12);
        }
        controller.apply(230.0, 50.0, tick(91));
        assert!((controller.quality() - (learned * 0.5 + 0.01)).abs() < 1e-12);
    }

    #[test]
    fn perfect_mode_forces_full_blend() {
        let mut controller = StabilizationController::new(tuning(), true, true);
        controller.set_offset(Channel::Voltage, 6.0).unwrap();
        assert_eq!(controller.blend_factor(), 1.0);
        let out = controller.apply(238.0, 50.4, tick(0));
        assert_eq!(out.mode, StabilizationMode::Blending);
        assert_eq!(out.voltage, 230.0);
        assert_eq!(out.frequency, 50.0);
        assert_eq!(out.voltage_deviation, 0.0);
        assert_eq!(controller.offset(Channel::Voltage), 0.0);
    }

    #[test]
    fn learned_quality_above_threshold_blends_partially() {
        let mut controller = StabilizationController::new(
            ControllerTuning {
                quality_gain_rate: 0.95,
                ..tuning()
            },
            true,
            false,
        );
        controller.set_offset(Channel::Voltage, 2.0).unwrap();
        let out = controller.apply(240.0, 50.0, tick(0));
        assert_eq!(out.mode, StabilizationMode::Blending);
        assert!((out.blend_factor - 0.95).abs() < 1e-12);
        assert!((out.voltage - (230.0 * 0.95 + 240.0 * 0.05)).abs() < 1e-9);
        assert!((controller.offset(Channel::Voltage) - 0.1).abs() < 1e-9);
    }

    #[test]
    fn below_threshold_uses_standard_correction() {
        let mut controller = StabilizationController::new(tuning(), true, false);
        let out = controller.apply(232.0, 50.0, tick(0));
        assert_eq!(out.mode, StabilizationMode::Correcting);
        // offset = (230 - 232) * 0.05
        assert!((controller.offset(Channel::Voltage) + 0.1).abs() < 1e-12);
        assert!((out.voltage - 231.9).abs() < 1e-12);
        assert!((out.voltage_deviation + 1.9).abs() < 1e-12);
    }

    #[test]
    fn blend_factor_stays_in_unit_interval() {
        let mut controller = StabilizationController::new(tuning(), true, false);
        for n in 0..300 {
            controller.apply(230.0, 50.0, tick(n));
            if n % 37 == 0 {
                controller.destabilize(tick(n));
            }
            let factor = controller.blend_factor();
            assert!((0.0..=1.0).contains(&factor));
        }
    }

    #[test]
    fn rejects_non_finite_offsets() {
        let mut controller = StabilizationController::new(tuning(), true, false);
        assert!(controller.set_offset(Channel::Voltage, f64::NAN).is_err());
        assert!(controller.set_offset(Channel::Frequency, f64::INFINITY).is_err());
        assert_eq!(controller.offset(Channel::Voltage), 0.0);
    }

    #[test]
    fn ramp_reaches_exact_zero() {
        let mut offset = 10.0;
        for step in 1..=3 {
            offset = ramp_step(offset, step, 10);
        }
        assert!((offset - 7.0).abs() < 1e-12);
        assert_eq!(ramp_step(offset, 10, 10), 0.0);
        assert_eq!(ramp_step(-3.3, 7, 7), 0.0);
        assert_eq!(ramp_step(5.0, 1, 0), 0.0);
        // a correction between steps is scaled, not overwritten
        assert!((ramp_step(4.5, 2, 10) - 4.0).abs() < 1e-12);
    }
}
