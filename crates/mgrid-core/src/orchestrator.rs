//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primary orchestration and lifecycle management."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use mgrid_common::config::AppConfig;
use mgrid_common::types::{Channel, Sample};
use mgrid_control::ActionClassifier;
use mgrid_metrics::{PredictorFailure, SharedRegistry, StabilizerMetrics};
use mgrid_rt::{duration_to_micros, jitter_us, RateLimiter};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::hub::{ControlHub, GridState, TickStep};
use crate::predictor::Predictor;
use crate::snapshot::{Snapshot, TickReport};

/// Fixed-period driver: generate, stabilize, buffer, predict, classify, emit.
pub struct Orchestrator {
    hub: ControlHub,
    predictor: Arc<dyn Predictor>,
    classifier: ActionClassifier,
    tick_interval: Duration,
    predictor_timeout: Duration,
    snapshots: broadcast::Sender<Snapshot>,
    metrics: Option<StabilizerMetrics>,
    tick: u64,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tick", &self.tick)
            .field("tick_interval", &self.tick_interval)
            .field("predictor_timeout", &self.predictor_timeout)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    pub fn from_config(config: &AppConfig, predictor: Arc<dyn Predictor>) -> Result<Self> {
        Self::from_config_at(config, predictor, Utc::now())
    }

    /// Build with the scenario clock starting at `now`.
    pub fn from_config_at(
        config: &AppConfig,
        predictor: Arc<dyn Predictor>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        config.validate()?;
        let state = GridState::from_config(config, now)?;
        let (snapshots, _) = broadcast::channel(config.runtime.snapshot_capacity);
        Ok(Self {
            hub: ControlHub::new(state, &config.stabilization),
            predictor,
            classifier: ActionClassifier::new(&config.grid, &config.stabilization),
            tick_interval: config.runtime.tick_interval,
            predictor_timeout: config.runtime.predictor_timeout,
            snapshots,
            metrics: None,
            tick: 0,
        })
    }

    /// Register stabilizer metrics on `registry` and record into them.
    pub fn with_metrics(mut self, registry: SharedRegistry) -> Result<Self> {
        let metrics = StabilizerMetrics::new(registry)?;
        self.hub = self.hub.with_metrics(metrics.clone());
        self.metrics = Some(metrics);
        Ok(self)
    }

    pub fn hub(&self) -> ControlHub {
        self.hub.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    pub fn ticks(&self) -> u64 {
        self.tick
    }

    /// Run one tick at `now`. The state lock is released before the predictor runs.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> TickReport {
        self.tick += 1;
        let step = self.hub.advance(now);
        if let Some(metrics) = &self.metrics {
            metrics.inc_tick();
            metrics.set_quality(step.controller.stabilization_quality);
            metrics.set_regime(&step.regime);
        }

        let snapshot = match &step.windows {
            Some((voltage_window, frequency_window)) => {
                self.snapshot_for(&step, voltage_window, frequency_window, now)
                    .await
            }
            None => None,
        };

        if let Some(snapshot) = &snapshot {
            if let Some(metrics) = &self.metrics {
                metrics.inc_snapshot();
            }
            if self.snapshots.send(snapshot.clone()).is_err() {
                trace!(tick = self.tick, "no snapshot subscribers");
            }
        }

        TickReport {
            tick: self.tick,
            regime: step.regime,
            raw: step.raw,
            reported: Sample::new(step.stabilized.voltage, step.stabilized.frequency, now),
            voltage_deviation: step.stabilized.voltage_deviation,
            frequency_deviation: step.stabilized.frequency_deviation,
            mode: step.stabilized.mode,
            snapshot,
        }
    }

    async fn snapshot_for(
        &self,
        step: &TickStep,
        voltage_window: &[f64],
        frequency_window: &[f64],
        now: DateTime<Utc>,
    ) -> Option<Snapshot> {
        let (predicted_voltage, predicted_frequency) = tokio::join!(
            self.predict(Channel::Voltage, voltage_window),
            self.predict(Channel::Frequency, frequency_window),
        );
        let (predicted_voltage, predicted_frequency) = (predicted_voltage?, predicted_frequency?);
        let auto = step.controller.auto_stabilize;
        Some(Snapshot {
            tick: self.tick,
            timestamp: now,
            regime: step.regime.clone(),
            voltage: step.stabilized.voltage,
            frequency: step.stabilized.frequency,
            predicted_voltage,
            predicted_frequency,
            voltage_action: self.classifier.label(
                Channel::Voltage,
                predicted_voltage,
                auto,
                step.stabilized.voltage_deviation,
            ),
            frequency_action: self.classifier.label(
                Channel::Frequency,
                predicted_frequency,
                auto,
                step.stabilized.frequency_deviation,
            ),
            stabilization_quality: step.controller.stabilization_quality,
        })
    }

    async fn predict(&self, channel: Channel, sequence: &[f64]) -> Option<f64> {
        let outcome =
            tokio::time::timeout(self.predictor_timeout, self.predictor.predict(channel, sequence))
                .await;
        let failure = match outcome {
            Ok(Ok(value)) if value.is_finite() => return Some(value),
            Ok(Ok(value)) => {
                warn!(tick = self.tick, %channel, value, "predictor returned a non-finite value");
                PredictorFailure::Error
            }
            Ok(Err(err)) => {
                warn!(tick = self.tick, %channel, error = %err, "predictor failed");
                PredictorFailure::Error
            }
            Err(_) => {
                warn!(
                    tick = self.tick,
                    %channel,
                    timeout_ms = self.predictor_timeout.as_millis() as u64,
                    "predictor timed out"
                );
                PredictorFailure::Timeout
            }
        };
        if let Some(metrics) = &self.metrics {
            metrics.record_predictor_failure(failure);
        }
        None
    }

    /// Tick at the configured period until `shutdown` fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let mut limiter = RateLimiter::new(self.tick_interval);
        let mut previous: Option<Instant> = None;
        info!(
            interval_ms = self.tick_interval.as_millis() as u64,
            regime = %self.hub.current_regime(),
            "tick loop started"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(ticks = self.tick, "tick loop shutdown signal received");
                    break;
                }
                scheduled = limiter.tick() => {
                    let started = Instant::now();
                    let lag_us = duration_to_micros(started.duration_since(scheduled));
                    if let Some(previous) = previous {
                        debug!(
                            tick = self.tick + 1,
                            jitter_us = jitter_us(started.duration_since(previous), limiter.period()),
                            lag_us,
                            "tick timing"
                        );
                    }
                    previous = Some(started);
                    let report = self.tick(Utc::now()).await;
                    trace!(
                        tick = report.tick,
                        regime = %report.regime,
                        voltage = report.reported.voltage,
                        frequency = report.reported.frequency,
                        snapshot = report.snapshot.is_some(),
                        "tick complete"
                    );
                }
            }
        }
        info!(ticks = self.tick, "tick loop stopped");
    }

    /// Spawn [`Orchestrator::run`] and return a handle for commands and shutdown.
    pub fn spawn(self) -> OrchestratorHandle {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let hub = self.hub.clone();
        let snapshots = self.snapshots.clone();
        let task = tokio::spawn(self.run(shutdown_rx));
        OrchestratorHandle {
            shutdown: shutdown_tx,
            hub,
            snapshots,
            task,
        }
    }
}

/// Lifecycle handle for a spawned orchestrator.
#[derive(Debug)]
pub struct OrchestratorHandle {
    shutdown: broadcast::Sender<()>,
    hub: ControlHub,
    snapshots: broadcast::Sender<Snapshot>,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    pub fn hub(&self) -> &ControlHub {
        &self.hub
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Snapshot> {
        self.snapshots.subscribe()
    }

    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task
            .await
            .map_err(|err| anyhow!("tick loop task failed: {}", err))?;
        info!("orchestrator shutdown complete");
        Ok(())
    }
}
