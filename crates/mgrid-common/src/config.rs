//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives and utilities for the stabilizer runtime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::logging::LogFormat;
use crate::types::Channel;

fn default_nominal_voltage() -> f64 {
    230.0
}

fn default_nominal_frequency() -> f64 {
    50.0
}

fn default_voltage_tolerance() -> f64 {
    5.0
}

fn default_frequency_tolerance() -> f64 {
    0.5
}

fn default_max_voltage_deviation() -> f64 {
    15.0
}

fn default_max_frequency_deviation() -> f64 {
    1.0
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_window_length() -> usize {
    10
}

fn default_predictor_timeout() -> Duration {
    Duration::from_millis(250)
}

fn default_snapshot_capacity() -> usize {
    256
}

fn default_true() -> bool {
    true
}

fn default_correction_rate() -> f64 {
    0.05
}

fn default_quality_gain_rate() -> f64 {
    0.001
}

fn default_quality_loss_rate() -> f64 {
    0.5
}

fn default_perfect_threshold() -> f64 {
    0.9
}

fn default_stable_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_resume_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_ramp_steps() -> u32 {
    10
}

fn default_ramp_step_interval() -> Duration {
    Duration::from_millis(200)
}

fn default_voltage_enrich_threshold() -> f64 {
    1.0
}

fn default_frequency_enrich_threshold() -> f64 {
    0.1
}

fn default_peak_hours() -> HourRange {
    HourRange { start: 9, end: 17 }
}

fn default_night_hours() -> HourRange {
    HourRange { start: 0, end: 5 }
}

fn default_dwell() -> Duration {
    Duration::from_secs(10)
}

fn default_regimes() -> IndexMap<String, RegimeConfig> {
    let mut regimes = IndexMap::new();
    regimes.insert(
        "normal".to_owned(),
        RegimeConfig::new(2.0, 0.1, 0.70).with_peak_weight(0.60).with_night_weight(0.70),
    );
    regimes.insert(
        "peak_load".to_owned(),
        RegimeConfig::new(4.0, 0.3, 0.15).with_peak_weight(0.25),
    );
    regimes.insert(
        "low_load".to_owned(),
        RegimeConfig::new(3.0, 0.2, 0.10).with_night_weight(0.20),
    );
    regimes.insert("fault".to_owned(), RegimeConfig::new(8.0, 0.5, 0.05));
    regimes
}

fn default_diurnal_voltage_amplitude() -> f64 {
    1.5
}

fn default_diurnal_frequency_amplitude() -> f64 {
    0.02
}

fn default_baseline_weight() -> f64 {
    0.1
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9898))
}

/// Primary configuration object for the stabilizer runtime.
///
/// Every section carries defaults, so an empty TOML document is a valid
/// configuration describing a 230 V / 50 Hz microgrid with the stock regime table.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub stabilization: StabilizationConfig,
    #[serde(default)]
    pub scenario: ScenarioConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "MGRID_CONFIG";

    /// Load configuration from disk, respecting the `MGRID_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// The environment override must point at a readable file. Candidates are
    /// tried in order; when none exists the built-in defaults are used.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!("no configuration file found; using built-in defaults");
        let config = Self::default();
        config.validate()?;
        Ok(LoadedAppConfig {
            config,
            source: None,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<AppConfig>()
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.grid.validate()?;
        self.runtime.validate()?;
        self.stabilization.validate()?;
        self.scenario.validate()?;
        self.generator.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Electrical operating point of the simulated microgrid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default = "default_nominal_voltage")]
    pub nominal_voltage: f64,
    #[serde(default = "default_nominal_frequency")]
    pub nominal_frequency: f64,
    #[serde(default = "default_voltage_tolerance")]
    pub voltage_tolerance: f64,
    #[serde(default = "default_frequency_tolerance")]
    pub frequency_tolerance: f64,
    #[serde(default = "default_max_voltage_deviation")]
    pub max_voltage_deviation: f64,
    #[serde(default = "default_max_frequency_deviation")]
    pub max_frequency_deviation: f64,
}

impl GridConfig {
    pub fn nominal(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.nominal_voltage,
            Channel::Frequency => self.nominal_frequency,
        }
    }

    pub fn tolerance(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.voltage_tolerance,
            Channel::Frequency => self.frequency_tolerance,
        }
    }

    pub fn max_deviation(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.max_voltage_deviation,
            Channel::Frequency => self.max_frequency_deviation,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for channel in Channel::ALL {
            ensure_positive(&format!("grid nominal {}", channel), self.nominal(channel))?;
            ensure_positive(&format!("grid {} tolerance", channel), self.tolerance(channel))?;
            ensure_positive(
                &format!("grid max {} deviation", channel),
                self.max_deviation(channel),
            )?;
        }
        Ok(())
    }
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            nominal_voltage: default_nominal_voltage(),
            nominal_frequency: default_nominal_frequency(),
            voltage_tolerance: default_voltage_tolerance(),
            frequency_tolerance: default_frequency_tolerance(),
            max_voltage_deviation: default_max_voltage_deviation(),
            max_frequency_deviation: default_max_frequency_deviation(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(rename = "tick_interval_ms", default = "default_tick_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub tick_interval: Duration,
    #[serde(default = "default_window_length")]
    pub window_length: usize,
    #[serde(rename = "predictor_timeout_ms", default = "default_predictor_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub predictor_timeout: Duration,
    /// Fixed seed for reproducible runs; entropy-seeded when absent.
    #[serde(default)]
    pub random_seed: Option<u64>,
    #[serde(default = "default_snapshot_capacity")]
    pub snapshot_capacity: usize,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() {
            return Err(anyhow!("runtime tick_interval_ms must be greater than zero"));
        }
        if self.window_length == 0 {
            return Err(anyhow!("runtime window_length must be at least 1"));
        }
        if self.predictor_timeout.is_zero() {
            return Err(anyhow!(
                "runtime predictor_timeout_ms must be greater than zero"
            ));
        }
        if self.snapshot_capacity == 0 {
            return Err(anyhow!("runtime snapshot_capacity must be at least 1"));
        }
        Ok(())
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval: default_tick_interval(),
            window_length: default_window_length(),
            predictor_timeout: default_predictor_timeout(),
            random_seed: None,
            snapshot_capacity: default_snapshot_capacity(),
        }
    }
}

/// Feedback controller tuning.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizationConfig {
    #[serde(default = "default_true")]
    pub auto_stabilize: bool,
    #[serde(default)]
    pub perfect_mode: bool,
    #[serde(default = "default_correction_rate")]
    pub correction_rate: f64,
    #[serde(default = "default_quality_gain_rate")]
    pub quality_gain_rate: f64,
    #[serde(default = "default_quality_loss_rate")]
    pub quality_loss_rate: f64,
    #[serde(default = "default_perfect_threshold")]
    pub perfect_threshold: f64,
    #[serde(rename = "stable_cooldown_secs", default = "default_stable_cooldown")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub stable_cooldown: Duration,
    #[serde(rename = "resume_delay_ms", default = "default_resume_delay")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub resume_delay: Duration,
    #[serde(default = "default_ramp_steps")]
    pub ramp_steps: u32,
    #[serde(rename = "ramp_step_interval_ms", default = "default_ramp_step_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub ramp_step_interval: Duration,
    #[serde(default = "default_voltage_enrich_threshold")]
    pub voltage_enrich_threshold: f64,
    #[serde(default = "default_frequency_enrich_threshold")]
    pub frequency_enrich_threshold: f64,
}

impl StabilizationConfig {
    pub fn enrich_threshold(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Voltage => self.voltage_enrich_threshold,
            Channel::Frequency => self.frequency_enrich_threshold,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure_unit_interval("stabilization correction_rate", self.correction_rate)?;
        ensure_unit_interval("stabilization quality_gain_rate", self.quality_gain_rate)?;
        ensure_unit_interval("stabilization quality_loss_rate", self.quality_loss_rate)?;
        ensure_unit_interval("stabilization perfect_threshold", self.perfect_threshold)?;
        if self.ramp_steps == 0 {
            return Err(anyhow!("stabilization ramp_steps must be at least 1"));
        }
        ensure_non_negative(
            "stabilization voltage_enrich_threshold",
            self.voltage_enrich_threshold,
        )?;
        ensure_non_negative(
            "stabilization frequency_enrich_threshold",
            self.frequency_enrich_threshold,
        )?;
        Ok(())
    }
}

impl Default for StabilizationConfig {
    fn default() -> Self {
        Self {
            auto_stabilize: true,
            perfect_mode: false,
            correction_rate: default_correction_rate(),
            quality_gain_rate: default_quality_gain_rate(),
            quality_loss_rate: default_quality_loss_rate(),
            perfect_threshold: default_perfect_threshold(),
            stable_cooldown: default_stable_cooldown(),
            resume_delay: default_resume_delay(),
            ramp_steps: default_ramp_steps(),
            ramp_step_interval: default_ramp_step_interval(),
            voltage_enrich_threshold: default_voltage_enrich_threshold(),
            frequency_enrich_threshold: default_frequency_enrich_threshold(),
        }
    }
}

/// Inclusive range of hours of the day, `0..=23`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourRange {
    pub start: u32,
    pub end: u32,
}

impl HourRange {
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            (self.start..=self.end).contains(&hour)
        } else {
            // wraps midnight, e.g. 22..=4
            hour >= self.start || hour <= self.end
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    #[serde(default = "default_peak_hours")]
    pub peak_hours: HourRange,
    #[serde(default = "default_night_hours")]
    pub night_hours: HourRange,
    #[serde(default = "default_regimes")]
    pub regimes: IndexMap<String, RegimeConfig>,
}

impl ScenarioConfig {
    pub fn validate(&self) -> Result<()> {
        for (label, range) in [("peak_hours", self.peak_hours), ("night_hours", self.night_hours)]
        {
            if range.start > 23 || range.end > 23 {
                return Err(anyhow!(
                    "scenario {} must lie within 0..=23 (got {}..={})",
                    label,
                    range.start,
                    range.end
                ));
            }
        }
        if self.regimes.is_empty() {
            return Err(anyhow!("scenario must declare at least one regime"));
        }
        for (name, regime) in &self.regimes {
            regime.validate(name)?;
        }
        Ok(())
    }
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            peak_hours: default_peak_hours(),
            night_hours: default_night_hours(),
            regimes: default_regimes(),
        }
    }
}

/// Noise characteristics and selection weights for one operating regime.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeConfig {
    pub voltage_sigma: f64,
    pub frequency_sigma: f64,
    pub weight: f64,
    #[serde(default)]
    pub peak_weight: Option<f64>,
    #[serde(default)]
    pub night_weight: Option<f64>,
    #[serde(rename = "dwell_secs", default = "default_dwell")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub dwell: Duration,
}

impl RegimeConfig {
    pub fn new(voltage_sigma: f64, frequency_sigma: f64, weight: f64) -> Self {
        Self {
            voltage_sigma,
            frequency_sigma,
            weight,
            peak_weight: None,
            night_weight: None,
            dwell: default_dwell(),
        }
    }

    pub fn with_peak_weight(mut self, weight: f64) -> Self {
        self.peak_weight = Some(weight);
        self
    }

    pub fn with_night_weight(mut self, weight: f64) -> Self {
        self.night_weight = Some(weight);
        self
    }

    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        ensure_non_negative(&format!("regime '{}' voltage_sigma", name), self.voltage_sigma)?;
        ensure_non_negative(
            &format!("regime '{}' frequency_sigma", name),
            self.frequency_sigma,
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_diurnal_voltage_amplitude")]
    pub diurnal_voltage_amplitude: f64,
    #[serde(default = "default_diurnal_frequency_amplitude")]
    pub diurnal_frequency_amplitude: f64,
    /// Optional `.csv` or `.json` file of historical rows replayed cyclically.
    #[serde(default)]
    pub baseline_path: Option<PathBuf>,
    #[serde(default = "default_baseline_weight")]
    pub baseline_weight: f64,
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_non_negative(
            "generator diurnal_voltage_amplitude",
            self.diurnal_voltage_amplitude,
        )?;
        ensure_non_negative(
            "generator diurnal_frequency_amplitude",
            self.diurnal_frequency_amplitude,
        )?;
        ensure_unit_interval("generator baseline_weight", self.baseline_weight)?;
        Ok(())
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            diurnal_voltage_amplitude: default_diurnal_voltage_amplitude(),
            diurnal_frequency_amplitude: default_diurnal_frequency_amplitude(),
            baseline_path: None,
            baseline_weight: default_baseline_weight(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: default_metrics_listen(),
        }
    }
}

fn ensure_positive(label: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(anyhow!("{} must be a positive finite number (got {})", label, value));
    }
    Ok(())
}

fn ensure_non_negative(label: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(anyhow!("{} must be finite and non-negative (got {})", label, value));
    }
    Ok(())
}

fn ensure_unit_interval(label: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(anyhow!("{} must lie within [0, 1] (got {})", label, value));
    }
    Ok(())
}
