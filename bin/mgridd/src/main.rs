//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Binary entrypoint for the microgrid stabilizer daemon."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::future::Future;
use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use mgrid_common::config::AppConfig;
use mgrid_common::logging::init_tracing;
use mgrid_core::{ControlHub, Orchestrator, Snapshot, TrendPredictor};
use mgrid_metrics::{new_registry, spawn_http_server};
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEFAULT_CONFIG_PATH: &str = "configs/mgrid.toml";
const STDIN_QUEUE: usize = 64;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Microgrid telemetry simulator and stabilization daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "N", help = "Seed the random source for a reproducible run")]
    seed: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the tick loop; snapshots on stdout, commands on stdin")]
    Run,
    #[command(about = "Validate configuration and print the effective settings")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG_PATH));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(seed) = cli.seed {
        config.runtime.random_seed = Some(seed);
    }
    init_tracing("mgridd", &config.logging)?;
    info!(
        source = %loaded
            .source
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "built-in defaults".to_owned()),
        load_ms = load_started.elapsed().as_millis() as u64,
        seed = ?config.runtime.random_seed,
        "configuration loaded"
    );

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await?,
        Commands::CheckConfig => {
            let rendered = toml::to_string_pretty(&config)
                .with_context(|| "failed to render effective configuration")?;
            println!("{}", rendered);
        }
    }

    Ok(())
}

async fn run_daemon(config: AppConfig) -> Result<()> {
    let registry = new_registry();
    let metrics_server = if config.metrics.enabled {
        info!(address = %config.metrics.listen, "metrics exporter enabled");
        Some(spawn_http_server(registry.clone(), config.metrics.listen)?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let predictor = Arc::new(TrendPredictor::new(config.runtime.window_length));
    let orchestrator = Orchestrator::from_config(&config, predictor)
        .with_context(|| "failed to build orchestrator")?
        .with_metrics(registry)?;
    let writer = spawn_snapshot_writer(orchestrator.subscribe());
    let handle = orchestrator.spawn();

    info!("daemon running; reading commands from stdin");
    bridge_commands(handle.hub(), spawn_stdin_reader()?, ctrl_c()).await?;

    handle.shutdown().await?;
    if let Err(err) = writer.await {
        warn!(error = %err, "snapshot writer task failed");
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

/// Read stdin on a detached thread and forward lines over a channel.
///
/// Blocking stdin reads cannot be cancelled; the thread ends with the process.
fn spawn_stdin_reader() -> Result<mpsc::Receiver<io::Result<String>>> {
    let (tx, rx) = mpsc::channel(STDIN_QUEUE);
    thread::Builder::new()
        .name("mgridd-stdin".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .with_context(|| "failed to spawn stdin reader thread")?;
    Ok(rx)
}

/// Feed command lines to the hub until the stream ends or `shutdown` resolves.
async fn bridge_commands<F>(
    hub: &ControlHub,
    mut lines: mpsc::Receiver<io::Result<String>>,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                info!("shutdown requested");
                return Ok(());
            }
            line = lines.recv() => {
                match line {
                    Some(line) => {
                        let line = line.with_context(|| "failed to read command from stdin")?;
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        // rejections are logged by the hub
                        if let Ok(command) = hub.handle_json(line, Utc::now()) {
                            debug!(kind = command.kind(), "stdin command accepted");
                        }
                    }
                    None => {
                        info!("stdin closed; shutting down");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn ctrl_c() -> Result<()> {
    signal::ctrl_c()
        .await
        .with_context(|| "failed to listen for ctrl-c")?;
    info!("ctrl-c received");
    Ok(())
}

/// Print every snapshot as one JSON line on stdout.
fn spawn_snapshot_writer(mut snapshots: broadcast::Receiver<Snapshot>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        loop {
            let snapshot = match snapshots.recv().await {
                Ok(snapshot) => snapshot,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "snapshot writer lagged; frames dropped");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            let mut line = match serde_json::to_string(&snapshot) {
                Ok(line) => line,
                Err(err) => {
                    warn!(tick = snapshot.tick, error = %err, "failed to encode snapshot");
                    continue;
                }
            };
            line.push('\n');
            if let Err(err) = stdout.write_all(line.as_bytes()).await {
                warn!(error = %err, "stdout closed; stopping snapshot writer");
                break;
            }
            let _ = stdout.flush().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hub() -> ControlHub {
        let config = AppConfig::default();
        let predictor = Arc::new(TrendPredictor::new(config.runtime.window_length));
        Orchestrator::from_config(&config, predictor).unwrap().hub()
    }

    #[tokio::test]
    async fn shutdown_wins_while_input_stays_open() {
        let (_tx, rx) = mpsc::channel(4);
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(1),
            bridge_commands(&hub(), rx, async { Ok::<(), anyhow::Error>(()) }),
        )
        .await;
        assert!(matches!(result, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn applies_lines_until_input_closes() {
        let hub = hub();
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(r#"{"type":"set_auto_stabilize","enabled":false}"#.to_owned()))
            .await
            .unwrap();
        tx.send(Ok("   ".to_owned())).await.unwrap();
        tx.send(Ok("not json".to_owned())).await.unwrap();
        drop(tx);

        bridge_commands(&hub, rx, std::future::pending::<Result<()>>())
            .await
            .unwrap();
        assert!(!hub.controller_state().auto_stabilize);
    }
}
