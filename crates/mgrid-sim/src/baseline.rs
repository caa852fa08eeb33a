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
use std::fs;
use std::path::Path;

use csv::ReaderBuilder;
use serde::Deserialize;
use tracing::debug;

use crate::errors::{Result, SimError};

/// Historical reading used to bias generated telemetry.
///
/// Missing fields are carried as `NaN` and contribute nothing downstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineRow {
    pub voltage: f64,
    pub frequency: f64,
}

/// External cyclic data source feeding the generator.
pub trait BaselineSource: Send + fmt::Debug {
    /// Next row, or `None` when the source has nothing to offer this tick.
    fn next_row(&mut self) -> Option<BaselineRow>;
}

#[derive(Debug, Deserialize)]
struct RawBaselineRow {
    #[serde(default)]
    voltage: Option<f64>,
    #[serde(default)]
    frequency: Option<f64>,
}

impl From<RawBaselineRow> for BaselineRow {
    fn from(raw: RawBaselineRow) -> Self {
        Self {
            voltage: raw.voltage.unwrap_or(f64::NAN),
            frequency: raw.frequency.unwrap_or(f64::NAN),
        }
    }
}

/// In-memory baseline that replays its rows forever.
#[derive(Debug, Default, Clone)]
pub struct CyclicBaseline {
    rows: Vec<BaselineRow>,
    cursor: usize,
}

impl CyclicBaseline {
    pub fn from_rows(rows: Vec<BaselineRow>) -> Self {
        Self { rows, cursor: 0 }
    }

    /// Load a `.json` array or a headed `.csv` file with `voltage,frequency` columns.
    pub fn from_path(path: &Path) -> Result<Self> {
        let baseline = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json(path)?,
            Some("csv") => Self::from_csv(path)?,
            _ => {
                return Err(SimError::UnsupportedBaselineFormat(
                    path.display().to_string(),
                ))
            }
        };
        if baseline.rows.is_empty() {
            return Err(SimError::EmptyBaseline(path.display().to_string()));
        }
        debug!(path = %path.display(), rows = baseline.rows.len(), "baseline loaded");
        Ok(baseline)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn from_json(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let raw_rows: Vec<RawBaselineRow> = serde_json::from_str(&contents)?;
        Ok(Self::from_rows(raw_rows.into_iter().map(BaselineRow::from).collect()))
    }

    fn from_csv(path: &Path) -> Result<Self> {
        let file = fs::File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(file);
        let mut rows = Vec::new();
        for row in reader.deserialize::<RawBaselineRow>() {
            rows.push(BaselineRow::from(row?));
        }
        Ok(Self::from_rows(rows))
    }
}

impl BaselineSource for CyclicBaseline {
    fn next_row(&mut self) -> Option<BaselineRow> {
        if self.rows.is_empty() {
            return None;
        }
        let row = self.rows[self.cursor];
        self.cursor = (self.cursor + 1) % self.rows.len();
        Some(row)
    }
}
