//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation runtime helpers and scenario engines."
//! ems_version: "v0.1.0"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use mgrid_common::config::{HourRange, RegimeConfig, ScenarioConfig};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{Result, SimError};

/// Regime entered at startup when the table declares it.
pub const DEFAULT_REGIME: &str = "normal";

/// Time-of-day bucket selecting which weight set applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayPeriod {
    Peak,
    Night,
    Other,
}

impl fmt::Display for DayPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DayPeriod::Peak => "peak",
            DayPeriod::Night => "night",
            DayPeriod::Other => "other",
        };
        f.write_str(label)
    }
}

/// Named operating condition with its own noise scales and selection weights.
#[derive(Debug, Clone, PartialEq)]
pub struct Regime {
    pub name: String,
    pub voltage_sigma: f64,
    pub frequency_sigma: f64,
    pub weight: f64,
    pub peak_weight: Option<f64>,
    pub night_weight: Option<f64>,
    pub dwell: Duration,
}

impl Regime {
    pub fn new(
        name: impl Into<String>,
        voltage_sigma: f64,
        frequency_sigma: f64,
        weight: f64,
    ) -> Self {
        Self {
            name: name.into(),
            voltage_sigma,
            frequency_sigma,
            weight,
            peak_weight: None,
            night_weight: None,
            dwell: Duration::ZERO,
        }
    }

    pub fn from_config(name: &str, config: &RegimeConfig) -> Self {
        Self {
            name: name.to_owned(),
            voltage_sigma: config.voltage_sigma,
            frequency_sigma: config.frequency_sigma,
            weight: config.weight,
            peak_weight: config.peak_weight,
            night_weight: config.night_weight,
            dwell: config.dwell,
        }
    }

    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }

    /// Raw (unnormalized) weight for a period; falls back to the base weight.
    pub fn weight_for(&self, period: DayPeriod) -> f64 {
        let weight = match period {
            DayPeriod::Peak => self.peak_weight.unwrap_or(self.weight),
            DayPeriod::Night => self.night_weight.unwrap_or(self.weight),
            DayPeriod::Other => self.weight,
        };
        if weight.is_finite() && weight > 0.0 {
            weight
        } else {
            0.0
        }
    }
}

/// Normalize weights to sum to one.
///
/// Negative or non-finite entries count as zero. A zero total yields a
/// uniform distribution; an empty input yields an empty vector.
pub fn normalize_weights(raw: &[f64]) -> Vec<f64> {
    if raw.is_empty() {
        return Vec::new();
    }
    let cleaned: Vec<f64> = raw
        .iter()
        .map(|w| if w.is_finite() && *w > 0.0 { *w } else { 0.0 })
        .collect();
    let total: f64 = cleaned.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        let uniform = 1.0 / raw.len() as f64;
        return vec![uniform; raw.len()];
    }
    cleaned.into_iter().map(|w| w / total).collect()
}

/// Static, ordered regime configuration plus the hour ranges of each period.
#[derive(Debug, Clone)]
pub struct RegimeTable {
    regimes: Vec<Regime>,
    peak_hours: HourRange,
    night_hours: HourRange,
}

impl RegimeTable {
    pub fn new(
        regimes: Vec<Regime>,
        peak_hours: HourRange,
        night_hours: HourRange,
    ) -> Result<Self> {
        if regimes.is_empty() {
            return Err(SimError::EmptyRegimeTable);
        }
        for regime in &regimes {
            for sigma in [regime.voltage_sigma, regime.frequency_sigma] {
                if !sigma.is_finite() || sigma < 0.0 {
                    return Err(SimError::InvalidSigma {
                        name: regime.name.clone(),
                        sigma,
                    });
                }
            }
        }
        Ok(Self {
            regimes,
            peak_hours,
            night_hours,
        })
    }

    pub fn from_config(config: &ScenarioConfig) -> Result<Self> {
        let regimes = config
            .regimes
            .iter()
            .map(|(name, regime)| Regime::from_config(name, regime))
            .collect();
        Self::new(regimes, config.peak_hours, config.night_hours)
    }

    /// Peak hours take precedence when the two ranges overlap.
    pub fn period_for(&self, hour: u32) -> DayPeriod {
        if self.peak_hours.contains(hour) {
            DayPeriod::Peak
        } else if self.night_hours.contains(hour) {
            DayPeriod::Night
        } else {
            DayPeriod::Other
        }
    }

    pub fn normalized_weights(&self, period: DayPeriod) -> Vec<f64> {
        let raw: Vec<f64> = self.regimes.iter().map(|r| r.weight_for(period)).collect();
        normalize_weights(&raw)
    }

    pub fn get(&self, name: &str) -> Option<&Regime> {
        self.regimes.iter().find(|regime| regime.name == name)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.regimes.iter().position(|regime| regime.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Regime> {
        self.regimes.iter()
    }

    pub fn len(&self) -> usize {
        self.regimes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regimes.is_empty()
    }
}

/// Point-in-time view of the regime state machine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioState {
    pub regime: String,
    pub entered_at: DateTime<Utc>,
}

/// Selects the active regime with time-of-day weighting and a dwell guard.
#[derive(Debug, Clone)]
pub struct ScenarioEngine {
    table: RegimeTable,
    current: usize,
    entered_at: DateTime<Utc>,
}

impl ScenarioEngine {
    /// Start in the `normal` regime, or the first declared one when absent.
    pub fn new(table: RegimeTable, now: DateTime<Utc>) -> Self {
        let current = table.position(DEFAULT_REGIME).unwrap_or(0);
        Self {
            table,
            current,
            entered_at: now,
        }
    }

    pub fn table(&self) -> &RegimeTable {
        &self.table
    }

    pub fn current(&self) -> &Regime {
        &self.table.regimes[self.current]
    }

    pub fn entered_at(&self) -> DateTime<Utc> {
        self.entered_at
    }

    pub fn state(&self) -> ScenarioState {
        ScenarioState {
            regime: self.current().name.clone(),
            entered_at: self.entered_at,
        }
    }

    /// `true` while the current regime's dwell time has not elapsed.
    pub fn is_dwelling(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.current().dwell) {
            Ok(dwell) => now.signed_duration_since(self.entered_at) < dwell,
            // dwell beyond chrono's range never elapses
            Err(_) => true,
        }
    }

    /// Advance the state machine and return the regime active at `now`.
    pub fn select<R: Rng + ?Sized>(&mut self, now: DateTime<Utc>, rng: &mut R) -> &Regime {
        if self.is_dwelling(now) {
            return self.current();
        }

        let period = self.table.period_for(now.hour());
        let weights = self.table.normalized_weights(period);
        let next = match WeightedIndex::new(&weights) {
            Ok(distribution) => distribution.sample(rng),
            Err(err) => {
                debug!(error = %err, "weighted draw unavailable; using uniform choice");
                rng.gen_range(0..self.table.len())
            }
        };

        if next != self.current {
            info!(
                from = %self.current().name,
                to = %self.table.regimes[next].name,
                %period,
                "regime transition"
            );
        }
        self.current = next;
        self.entered_at = now;
        self.current()
    }

    /// Enter a named regime immediately, bypassing the dwell guard.
    pub fn enter(&mut self, name: &str, now: DateTime<Utc>) -> Result<&Regime> {
        let index = self
            .table
            .position(name)
            .ok_or_else(|| SimError::UnknownRegime(name.to_owned()))?;
        self.current = index;
        self.entered_at = now;
        Ok(self.current())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::mock::StepRng;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn at_hour(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn table(regimes: Vec<Regime>) -> RegimeTable {
        RegimeTable::new(
            regimes,
            HourRange { start: 9, end: 17 },
            HourRange { start: 0, end: 5 },
        )
        .unwrap()
    }

    fn stock_table() -> RegimeTable {
        RegimeTable::from_config(&ScenarioConfig::default()).unwrap()
    }

    #[test]
    fn normalized_weights_sum_to_one() {
        for raw in [
            vec![0.7, 0.15, 0.1, 0.05],
            vec![0.7, 0.15, 0.2, 0.05],
            vec![3.0, 1.0],
            vec![1e-9, 2e-9, 5.0],
            vec![-1.0, 2.0, f64::NAN],
        ] {
            let total: f64 = normalize_weights(&raw).iter().sum();
            assert!((total - 1.0).abs() < 1e-12, "weights {:?} summed to {}", raw, total);
        }
    }

    #[test]
    fn zero_weights_fall_back_to_uniform() {
        assert_eq!(normalize_weights(&[0.0, 0.0, 0.0, 0.0]), vec![0.25; 4]);
        assert_eq!(normalize_weights(&[-1.0, f64::NAN]), vec![0.5; 2]);
        assert!(normalize_weights(&[]).is_empty());
    }

    #[test]
    fn periods_follow_hour_ranges() {
        let table = stock_table();
        assert_eq!(table.period_for(3), DayPeriod::Night);
        assert_eq!(table.period_for(12), DayPeriod::Peak);
        assert_eq!(table.period_for(20), DayPeriod::Other);
    }

    #[test]
    fn stock_table_applies_period_overrides() {
        let table = stock_table();
        let peak = table.normalized_weights(DayPeriod::Peak);
        let expected = [0.60, 0.25, 0.10, 0.05];
        for (got, want) in peak.iter().zip(expected) {
            assert!((got - want).abs() < 1e-12);
        }
        // night raw weights sum to 1.1 and are renormalized
        let night = table.normalized_weights(DayPeriod::Night);
        assert!((night[0] - 0.70 / 1.1).abs() < 1e-12);
        assert!((night[2] - 0.20 / 1.1).abs() < 1e-12);
    }

    #[test]
    fn starts_in_normal_or_first_regime() {
        let engine = ScenarioEngine::new(stock_table(), at_hour(12));
        assert_eq!(engine.current().name, "normal");

        let engine = ScenarioEngine::new(
            table(vec![Regime::new("calm", 1.0, 0.1, 1.0), Regime::new("storm", 5.0, 0.4, 1.0)]),
            at_hour(12),
        );
        assert_eq!(engine.current().name, "calm");
    }

    #[test]
    fn forced_draws_pick_first_and_last() {
        let regimes = vec![
            Regime::new("a", 1.0, 0.1, 1.0),
            Regime::new("b", 1.0, 0.1, 1.0),
            Regime::new("c", 1.0, 0.1, 1.0),
        ];
        let mut engine = ScenarioEngine::new(table(regimes), at_hour(20));
        let mut low = StepRng::new(0, 0);
        assert_eq!(engine.select(at_hour(20), &mut low).name, "a");
        let mut high = StepRng::new(u64::MAX, 0);
        assert_eq!(engine.select(at_hour(21), &mut high).name, "c");
    }

    #[test]
    fn only_weighted_regime_is_selected() {
        let regimes = vec![
            Regime::new("never", 1.0, 0.1, 0.0),
            Regime::new("always", 1.0, 0.1, 1.0),
        ];
        let mut engine = ScenarioEngine::new(table(regimes), at_hour(20));
        let mut rng = StdRng::seed_from_u64(7);
        for minute in 0..50 {
            let now = at_hour(20) + chrono::Duration::minutes(minute);
            assert_eq!(engine.select(now, &mut rng).name, "always");
        }
    }

    #[test]
    fn all_zero_weights_never_panic() {
        let regimes = vec![Regime::new("x", 1.0, 0.1, 0.0), Regime::new("y", 1.0, 0.1, 0.0)];
        let mut engine = ScenarioEngine::new(table(regimes), at_hour(20));
        let mut rng = StdRng::seed_from_u64(11);
        let mut seen = std::collections::HashSet::new();
        for minute in 0..200 {
            let now = at_hour(20) + chrono::Duration::minutes(minute);
            seen.insert(engine.select(now, &mut rng).name.clone());
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn dwell_time_holds_regime() {
        let dwell = Duration::from_secs(30);
        let regimes = vec![
            Regime::new("a", 1.0, 0.1, 1.0).with_dwell(dwell),
            Regime::new("b", 1.0, 0.1, 1.0).with_dwell(dwell),
        ];
        let start = at_hour(20);
        let mut engine = ScenarioEngine::new(table(regimes), start);
        let mut high = StepRng::new(u64::MAX, 0);

        // inside the dwell window no draw happens, however many ticks elapse
        for second in 0..30 {
            let now = start + chrono::Duration::seconds(second);
            assert_eq!(engine.select(now, &mut high).name, "a");
        }
        assert_eq!(engine.entered_at(), start);

        let later = start + chrono::Duration::seconds(30);
        assert_eq!(engine.select(later, &mut high).name, "b");
        assert_eq!(engine.entered_at(), later);
        assert!(engine.is_dwelling(later + chrono::Duration::seconds(29)));
        assert!(!engine.is_dwelling(later + chrono::Duration::seconds(30)));
    }

    #[test]
    fn enter_rejects_unknown_regime() {
        let mut engine = ScenarioEngine::new(stock_table(), at_hour(1));
        assert!(matches!(
            engine.enter("blackout", at_hour(1)),
            Err(SimError::UnknownRegime(_))
        ));
        assert_eq!(engine.enter("fault", at_hour(2)).unwrap().name, "fault");
        assert_eq!(engine.state().regime, "fault");
    }

    #[test]
    fn table_rejects_empty_and_negative_sigma() {
        let hours = HourRange { start: 9, end: 17 };
        assert!(matches!(
            RegimeTable::new(Vec::new(), hours, hours),
            Err(SimError::EmptyRegimeTable)
        ));
        assert!(matches!(
            RegimeTable::new(vec![Regime::new("bad", -1.0, 0.1, 1.0)], hours, hours),
            Err(SimError::InvalidSigma { .. })
        ));
    }
}
