//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared grid state and asynchronous command handling."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mgrid_common::config::{AppConfig, StabilizationConfig};
use mgrid_common::types::{Channel, Sample};
use mgrid_control::{
    ramp_step, ChannelWindows, ControllerState, StabilizationController, Stabilized,
};
use mgrid_metrics::StabilizerMetrics;
use mgrid_rt::TaskSlot;
use mgrid_sim::{RegimeTable, ScenarioEngine, TelemetryGenerator};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::commands::{Command, CommandError};

/// Every piece of mutable state shared between the tick loop and command handlers.
#[derive(Debug)]
pub struct GridState {
    pub scenario: ScenarioEngine,
    pub generator: TelemetryGenerator,
    pub controller: StabilizationController,
    pub windows: ChannelWindows,
    pub rng: StdRng,
}

impl GridState {
    pub fn from_config(config: &AppConfig, now: DateTime<Utc>) -> Result<Self> {
        let table = RegimeTable::from_config(&config.scenario)
            .with_context(|| "invalid scenario regime table")?;
        let generator = TelemetryGenerator::from_config(&config.grid, &config.generator)
            .with_context(|| "failed to initialise telemetry generator")?;
        let windows = ChannelWindows::new(config.runtime.window_length)
            .with_context(|| "invalid runtime window_length")?;
        let rng = match config.runtime.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            scenario: ScenarioEngine::new(table, now),
            generator,
            controller: StabilizationController::from_config(&config.grid, &config.stabilization),
            windows,
            rng,
        })
    }
}

/// Result of the locked portion of a tick.
#[derive(Debug, Clone)]
pub(crate) struct TickStep {
    pub regime: String,
    pub raw: Sample,
    pub stabilized: Stabilized,
    pub controller: ControllerState,
    /// Oldest-first window copies, present once both windows are full.
    pub windows: Option<(Vec<f64>, Vec<f64>)>,
}

#[derive(Debug, Clone, Copy)]
struct CommandTiming {
    resume_delay: Duration,
    ramp_steps: u32,
    ramp_step_interval: Duration,
}

/// Synchronized entry point to [`GridState`].
///
/// Each operation takes the state lock exactly once and never across an
/// `.await`. Delayed effects run in [`TaskSlot`]s and re-check their generation
/// under the same lock, so a cancelled task can never write.
#[derive(Debug, Clone)]
pub struct ControlHub {
    state: Arc<Mutex<GridState>>,
    ramp: TaskSlot,
    resume: TaskSlot,
    timing: CommandTiming,
    metrics: Option<StabilizerMetrics>,
}

impl ControlHub {
    pub fn new(state: GridState, stabilization: &StabilizationConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            ramp: TaskSlot::new("offset-ramp"),
            resume: TaskSlot::new("resume-stabilization"),
            timing: CommandTiming {
                resume_delay: stabilization.resume_delay,
                ramp_steps: stabilization.ramp_steps,
                ramp_step_interval: stabilization.ramp_step_interval,
            },
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: StabilizerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn controller_state(&self) -> ControllerState {
        self.state.lock().controller.state()
    }

    pub fn current_regime(&self) -> String {
        self.state.lock().scenario.current().name.clone()
    }

    /// `(voltage, frequency)` window lengths.
    pub fn window_lengths(&self) -> (usize, usize) {
        let state = self.state.lock();
        (
            state.windows.get(Channel::Voltage).len(),
            state.windows.get(Channel::Frequency).len(),
        )
    }

    pub fn is_ramping(&self) -> bool {
        self.ramp.is_pending()
    }

    pub fn is_resume_pending(&self) -> bool {
        self.resume.is_pending()
    }

    /// Parse and apply one JSON command. Rejections are logged and leave state untouched.
    ///
    /// Must be called from within a tokio runtime.
    pub fn handle_json(&self, payload: &str, now: DateTime<Utc>) -> Result<Command, CommandError> {
        let command = match Command::from_json(payload) {
            Ok(command) => command,
            Err(err) => {
                warn!(error = %err, "rejected command payload");
                self.record_command("invalid", false);
                return Err(err);
            }
        };
        self.apply(&command, now)?;
        Ok(command)
    }

    /// Apply a command atomically between ticks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn apply(&self, command: &Command, now: DateTime<Utc>) -> Result<(), CommandError> {
        let outcome = command.validate().and_then(|_| self.apply_validated(command, now));
        match &outcome {
            Ok(()) => info!(command = ?command, "command applied"),
            Err(err) => warn!(command = command.kind(), error = %err, "rejected command"),
        }
        self.record_command(command.kind(), outcome.is_ok());
        outcome
    }

    fn apply_validated(&self, command: &Command, now: DateTime<Utc>) -> Result<(), CommandError> {
        let mut state = self.state.lock();
        match *command {
            Command::ManualAdjustment {
                channel,
                value,
                auto_stabilize,
            } => {
                state.controller.set_offset(channel, value)?;
                self.ramp.cancel();
                state.controller.set_auto_stabilize(auto_stabilize);
                state.controller.set_stabilize_enabled(false);
                self.schedule_resume();
            }
            Command::SetAutoStabilize { enabled } => {
                self.resume.cancel();
                self.ramp.cancel();
                state.controller.set_auto_stabilize(enabled);
                state.controller.set_stabilize_enabled(true);
                if enabled {
                    self.start_ramp(&state.controller);
                }
            }
            Command::SetStabilizationMode {
                perfect_mode,
                destabilize,
            } => {
                state.controller.set_perfect_mode(perfect_mode);
                if destabilize {
                    state.controller.destabilize(now);
                }
            }
        }
        Ok(())
    }

    fn schedule_resume(&self) {
        let shared = Arc::clone(&self.state);
        let delay = self.timing.resume_delay;
        self.resume.schedule(move |token| async move {
            tokio::time::sleep(delay).await;
            let mut state = shared.lock();
            if token.is_current() {
                state.controller.set_stabilize_enabled(true);
                debug!("stabilization resumed after manual adjustment");
            }
        });
    }

    fn start_ramp(&self, controller: &StabilizationController) {
        if controller.offset(Channel::Voltage) == 0.0
            && controller.offset(Channel::Frequency) == 0.0
        {
            return;
        }
        let shared = Arc::clone(&self.state);
        let CommandTiming {
            ramp_steps: steps,
            ramp_step_interval: interval,
            ..
        } = self.timing;
        self.ramp.schedule(move |token| async move {
            for step in 1..=steps {
                tokio::time::sleep(interval).await;
                let mut state = shared.lock();
                if !token.is_current() || !state.controller.state().auto_stabilize {
                    debug!(step, "offset ramp superseded");
                    return;
                }
                let voltage = ramp_step(state.controller.offset(Channel::Voltage), step, steps);
                let frequency =
                    ramp_step(state.controller.offset(Channel::Frequency), step, steps);
                if let Err(err) = ramp_offsets(&mut state.controller, voltage, frequency) {
                    warn!(step, error = %err, "offset ramp aborted");
                    return;
                }
            }
            debug!(steps, "offset ramp complete");
        });
    }

    fn record_command(&self, kind: &str, accepted: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.record_command(kind, accepted);
        }
    }

    pub(crate) fn advance(&self, now: DateTime<Utc>) -> TickStep {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let regime = state.scenario.select(now, &mut state.rng).clone();
        let raw = state.generator.generate(&regime, now, &mut state.rng);
        let stabilized = state.controller.apply(raw.voltage, raw.frequency, now);
        state.windows.push(stabilized.voltage, stabilized.frequency);
        let windows = state.windows.is_full().then(|| {
            (
                state.windows.get(Channel::Voltage).snapshot(),
                state.windows.get(Channel::Frequency).snapshot(),
            )
        });
        TickStep {
            regime: regime.name,
            raw,
            stabilized,
            controller: state.controller.state(),
            windows,
        }
    }
}

fn ramp_offsets(
    controller: &mut StabilizationController,
    voltage: f64,
    frequency: f64,
) -> mgrid_control::Result<()> {
    controller.set_offset(Channel::Voltage, voltage)?;
    controller.set_offset(Channel::Frequency, frequency)
}
