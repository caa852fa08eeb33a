//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation runtime helpers and scenario engines."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::f64::consts::PI;

use chrono::{DateTime, Timelike, Utc};
use mgrid_common::config::{GeneratorConfig, GridConfig};
use mgrid_common::types::{Channel, Sample};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::baseline::{BaselineSource, CyclicBaseline};
use crate::errors::Result;
use crate::scenario::Regime;

/// Load-curve shape in `[-1, 1]` for the fractional hour of `now`, peaking at 12:00 UTC.
pub fn diurnal_shape(now: DateTime<Utc>) -> f64 {
    let hour = f64::from(now.hour())
        + f64::from(now.minute()) / 60.0
        + f64::from(now.second()) / 3600.0;
    (2.0 * PI * (hour - 6.0) / 24.0).sin()
}

/// Produces one noisy voltage/frequency reading per call.
#[derive(Debug)]
pub struct TelemetryGenerator {
    grid: GridConfig,
    diurnal_voltage_amplitude: f64,
    diurnal_frequency_amplitude: f64,
    baseline_weight: f64,
    baseline: Option<Box<dyn BaselineSource>>,
}

impl TelemetryGenerator {
    /// Generator without a baseline source.
    pub fn new(grid: &GridConfig, generator: &GeneratorConfig) -> Self {
        Self {
            grid: grid.clone(),
            diurnal_voltage_amplitude: generator.diurnal_voltage_amplitude,
            diurnal_frequency_amplitude: generator.diurnal_frequency_amplitude,
            baseline_weight: generator.baseline_weight,
            baseline: None,
        }
    }

    /// Build from configuration, loading the baseline file when one is configured.
    pub fn from_config(grid: &GridConfig, generator: &GeneratorConfig) -> Result<Self> {
        let mut engine = Self::new(grid, generator);
        if let Some(path) = &generator.baseline_path {
            engine.baseline = Some(Box::new(CyclicBaseline::from_path(path)?));
        }
        Ok(engine)
    }

    pub fn with_baseline(mut self, baseline: Box<dyn BaselineSource>) -> Self {
        self.baseline = Some(baseline);
        self
    }

    pub fn has_baseline(&self) -> bool {
        self.baseline.is_some()
    }

    /// Draw a sample for `regime`, shaped for the time of day and clipped to hard bounds.
    ///
    /// Voltage is drawn before frequency so seeded runs are reproducible.
    pub fn generate<R: Rng + ?Sized>(
        &mut self,
        regime: &Regime,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Sample {
        let voltage_noise: f64 = rng.sample(StandardNormal);
        let frequency_noise: f64 = rng.sample(StandardNormal);
        let mut voltage = self.grid.nominal_voltage + regime.voltage_sigma * voltage_noise;
        let mut frequency = self.grid.nominal_frequency + regime.frequency_sigma * frequency_noise;

        if let Some(row) = self.baseline.as_mut().and_then(|source| source.next_row()) {
            voltage += self.baseline_contribution(Channel::Voltage, row.voltage);
            frequency += self.baseline_contribution(Channel::Frequency, row.frequency);
        }

        let shape = diurnal_shape(now);
        voltage -= self.diurnal_voltage_amplitude * shape;
        frequency -= self.diurnal_frequency_amplitude * shape;

        Sample::new(
            self.clip(Channel::Voltage, voltage),
            self.clip(Channel::Frequency, frequency),
            now,
        )
    }

    fn baseline_contribution(&self, channel: Channel, historical: f64) -> f64 {
        let contribution = self.baseline_weight * (historical - self.grid.nominal(channel));
        if contribution.is_finite() {
            contribution
        } else {
            0.0
        }
    }

    fn clip(&self, channel: Channel, value: f64) -> f64 {
        let nominal = self.grid.nominal(channel);
        if !value.is_finite() {
            return nominal;
        }
        let max = self.grid.max_deviation(channel);
        value.clamp(nominal - max, nominal + max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::BaselineRow;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn flat_generator() -> TelemetryGenerator {
        let generator = GeneratorConfig {
            diurnal_voltage_amplitude: 0.0,
            diurnal_frequency_amplitude: 0.0,
            ..GeneratorConfig::default()
        };
        TelemetryGenerator::new(&GridConfig::default(), &generator)
    }

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn zero_sigma_yields_nominal_values() {
        let mut generator = flat_generator();
        let mut rng = StdRng::seed_from_u64(1);
        let quiet = Regime::new("quiet", 0.0, 0.0, 1.0);
        for _ in 0..10 {
            let sample = generator.generate(&quiet, noon(), &mut rng);
            assert_eq!(sample.voltage, 230.0);
            assert_eq!(sample.frequency, 50.0);
            assert_eq!(sample.timestamp, noon());
        }
    }

    #[test]
    fn samples_stay_within_hard_bounds() {
        let mut generator = TelemetryGenerator::new(&GridConfig::default(), &GeneratorConfig::default());
        let mut rng = StdRng::seed_from_u64(42);
        let wild = Regime::new("wild", 50.0, 5.0, 1.0);
        for minute in 0..2_000 {
            let now = noon() + chrono::Duration::minutes(minute);
            let sample = generator.generate(&wild, now, &mut rng);
            assert!((215.0..=245.0).contains(&sample.voltage), "voltage {}", sample.voltage);
            assert!((49.0..=51.0).contains(&sample.frequency), "frequency {}", sample.frequency);
        }
    }

    #[test]
    fn diurnal_shape_peaks_at_noon() {
        assert!((diurnal_shape(noon()) - 1.0).abs() < 1e-12);
        let midnight = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert!((diurnal_shape(midnight) + 1.0).abs() < 1e-12);
        let six = Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap();
        assert!(diurnal_shape(six).abs() < 1e-12);
    }

    #[test]
    fn diurnal_term_sags_voltage_at_noon() {
        let generator = GeneratorConfig {
            diurnal_voltage_amplitude: 2.0,
            diurnal_frequency_amplitude: 0.05,
            ..GeneratorConfig::default()
        };
        let mut engine = TelemetryGenerator::new(&GridConfig::default(), &generator);
        let mut rng = StdRng::seed_from_u64(3);
        let sample = engine.generate(&Regime::new("quiet", 0.0, 0.0, 1.0), noon(), &mut rng);
        assert!((sample.voltage - 228.0).abs() < 1e-9);
        assert!((sample.frequency - 49.95).abs() < 1e-9);
    }

    #[test]
    fn baseline_adds_weighted_deviation() {
        let rows = vec![BaselineRow {
            voltage: 240.0,
            frequency: 49.0,
        }];
        let mut generator =
            flat_generator().with_baseline(Box::new(CyclicBaseline::from_rows(rows)));
        let mut rng = StdRng::seed_from_u64(5);
        let sample = generator.generate(&Regime::new("quiet", 0.0, 0.0, 1.0), noon(), &mut rng);
        // default weight 0.1
        assert!((sample.voltage - 231.0).abs() < 1e-9);
        assert!((sample.frequency - 49.9).abs() < 1e-9);
    }

    #[test]
    fn nan_baseline_contributes_nothing() {
        let rows = vec![BaselineRow {
            voltage: f64::NAN,
            frequency: f64::INFINITY,
        }];
        let mut generator =
            flat_generator().with_baseline(Box::new(CyclicBaseline::from_rows(rows)));
        let mut rng = StdRng::seed_from_u64(5);
        let sample = generator.generate(&Regime::new("quiet", 0.0, 0.0, 1.0), noon(), &mut rng);
        assert_eq!(sample.voltage, 230.0);
        assert_eq!(sample.frequency, 50.0);
    }

    #[test]
    fn missing_baseline_file_fails_startup() {
        let generator = GeneratorConfig {
            baseline_path: Some("/definitely/not/here/baseline.csv".into()),
            ..GeneratorConfig::default()
        };
        assert!(TelemetryGenerator::from_config(&GridConfig::default(), &generator).is_err());
        let plain = TelemetryGenerator::from_config(&GridConfig::default(), &GeneratorConfig::default())
            .unwrap();
        assert!(!plain.has_baseline());
    }
}
