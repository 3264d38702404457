//! Engine binary for the SemLog symbolic logger.
//!
//! Stands in for the simulation host: it annotates a scene, places
//! overlap monitors, replays overlap signals frame by frame into the
//! logger, and writes the finished session as JSON.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `SEMLOG_CONFIG` (default `semlog-config.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Load the scenario from `SEMLOG_SCENARIO`, or build a synthetic one
//! 4. Annotate the scene and create the scripted host and JSON sink
//! 5. Init and start the logger
//! 6. Run the frame loop until the scenario ends or Ctrl-C
//! 7. Finish the session (forced on Ctrl-C) and log the result

mod error;
mod host;
mod runner;
mod scenario;
mod sink;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use semlog_core::{IndividualRegistry, LoggerConfig, LoggerState, SymbolicLogger};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::host::ScriptedHost;
use crate::scenario::Scenario;
use crate::sink::JsonSessionSink;

/// Seed for the synthetic scenario when `SEMLOG_SEED` is unset.
const DEFAULT_SEED: u64 = 5310;

/// Application entry point for the engine.
///
/// # Errors
///
/// Returns an error if configuration or the scenario cannot be loaded, or
/// if the logger fails to start.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config = load_config()?;

    // 2. Initialize structured logging.
    let level = config.logging.level.clone();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(true)
        .try_init()
        .map_err(|e| EngineError::Logging {
            message: e.to_string(),
        })?;

    info!(
        output_dir = %config.session.output_dir,
        concatenation_window = config.monitors.concatenation_window,
        frame_dt = config.engine.frame_dt,
        "semlog-engine starting"
    );

    // 3. Load the scenario.
    let scenario = load_scenario()?;
    info!(
        entities = scenario.entities.len(),
        monitors = scenario.monitors.len(),
        signals = scenario.signals.len(),
        duration = scenario.duration,
        "Scenario loaded"
    );

    // 4. Annotate the scene; build host and sink.
    let mut registry = IndividualRegistry::new();
    let annotated = registry.annotate_all(scenario.descriptors());
    info!(annotated, individuals = registry.len(), "Scene annotated");

    let host = ScriptedHost::new(scenario.skeletons());
    let sink = JsonSessionSink::new(&config.session.output_dir, config.session.write_timelines);
    let engine = config.engine.clone();

    // 5. Init and start the logger.
    let mut logger = SymbolicLogger::new(config, registry, host, sink, scenario.build_monitors());
    logger.init();
    for spec in &scenario.monitors {
        if let Some((owner, bone)) = logger.host().attachment(spec.volume.into()) {
            info!(volume = spec.volume, owner = %owner, bone, "Monitor bound to bone");
        }
    }
    logger.start();
    ensure_started(logger.state())?;
    info!(
        task_id = %logger.task_id(),
        episode_id = %logger.episode_id(),
        handlers = ?logger.handler_names(),
        "Session started"
    );

    // 6. Run the frame loop.
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = Arc::clone(&stop);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop_flag.store(true, Ordering::Relaxed);
        }
    });
    let result = runner::run_session(&mut logger, &scenario, &engine, &stop).await;

    // 7. Finish.
    logger.finish(result.end.forced());
    if let Some(record) = logger.record() {
        info!(
            events = record.events.len(),
            forced = record.forced,
            session_time = record.session_time,
            frames = result.frames,
            published = logger.sink().published(),
            files = ?logger.sink().written(),
            "Session finished"
        );
    }

    Ok(())
}

/// Refuse to run the frame loop unless the logger started.
fn ensure_started(state: LoggerState) -> Result<(), EngineError> {
    if state == LoggerState::Started {
        Ok(())
    } else {
        Err(EngineError::NotStarted {
            state: format!("{state:?}"),
        })
    }
}

/// Load configuration from `SEMLOG_CONFIG` or `semlog-config.yaml`.
///
/// Falls back to defaults (plus environment overrides) if the file does
/// not exist.
fn load_config() -> Result<LoggerConfig, EngineError> {
    let config_path = std::env::var("SEMLOG_CONFIG")
        .map_or_else(|_| PathBuf::from("semlog-config.yaml"), PathBuf::from);
    if config_path.exists() {
        Ok(LoggerConfig::from_file(&config_path)?)
    } else {
        Ok(LoggerConfig::parse("")?)
    }
}

/// Load the scenario named by `SEMLOG_SCENARIO`, or build the synthetic one
/// seeded from `SEMLOG_SEED`.
fn load_scenario() -> Result<Scenario, EngineError> {
    if let Ok(path) = std::env::var("SEMLOG_SCENARIO") {
        return Scenario::from_file(Path::new(&path));
    }
    let seed = std::env::var("SEMLOG_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_SEED);
    info!(seed, "No scenario file given, using synthetic scenario");
    Ok(scenario::synthetic(seed))
}
