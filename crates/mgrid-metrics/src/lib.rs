//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Metrics collection and export utilities."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{Gauge, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the runtime.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
///
/// Binding to port 0 picks a free port; [`MetricsServer::addr`] reports the bound one.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Why a tick produced no prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictorFailure {
    Timeout,
    Error,
}

impl PredictorFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictorFailure::Timeout => "timeout",
            PredictorFailure::Error => "error",
        }
    }
}

/// Counters and gauges recorded by the tick loop and command handlers.
#[derive(Clone, Debug)]
pub struct StabilizerMetrics {
    registry: SharedRegistry,
    ticks_total: IntCounter,
    snapshots_total: IntCounter,
    predictor_failures: IntCounterVec,
    commands_total: IntCounterVec,
    quality: Gauge,
    regime_active: IntGaugeVec,
}

impl StabilizerMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let ticks_total = IntCounter::with_opts(Opts::new(
            "mgrid_ticks_total",
            "Number of completed orchestrator ticks",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let snapshots_total = IntCounter::with_opts(Opts::new(
            "mgrid_snapshots_total",
            "Number of snapshots emitted",
        ))?;
        registry.register(Box::new(snapshots_total.clone()))?;

        let predictor_failures = IntCounterVec::new(
            Opts::new(
                "mgrid_predictor_failures_total",
                "Ticks without a snapshot because the predictor timed out or failed",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(predictor_failures.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new(
                "mgrid_commands_total",
                "Commands received by kind and outcome",
            ),
            &["kind", "outcome"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let quality = Gauge::with_opts(Opts::new(
            "mgrid_stabilization_quality",
            "Learned stabilization quality in [0, 1]",
        ))?;
        registry.register(Box::new(quality.clone()))?;

        let regime_active = IntGaugeVec::new(
            Opts::new(
                "mgrid_regime_active",
                "Indicator (0/1) of the currently active scenario regime",
            ),
            &["regime"],
        )?;
        registry.register(Box::new(regime_active.clone()))?;

        Ok(Self {
            registry,
            ticks_total,
            snapshots_total,
            predictor_failures,
            commands_total,
            quality,
            regime_active,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn inc_tick(&self) {
        self.ticks_total.inc();
    }

    pub fn inc_snapshot(&self) {
        self.snapshots_total.inc();
    }

    pub fn record_predictor_failure(&self, failure: PredictorFailure) {
        self.predictor_failures
            .with_label_values(&[failure.as_str()])
            .inc();
    }

    pub fn record_command(&self, kind: &str, accepted: bool) {
        let outcome = if accepted { "accepted" } else { "rejected" };
        self.commands_total.with_label_values(&[kind, outcome]).inc();
    }

    pub fn set_quality(&self, quality: f64) {
        self.quality.set(quality);
    }

    /// Mark `regime` active and drop the indicator of every other regime.
    pub fn set_regime(&self, regime: &str) {
        self.regime_active.reset();
        self.regime_active.with_label_values(&[regime]).set(1);
    }
}

pub use prometheus;
