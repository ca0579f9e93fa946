// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Sorrel replays recorded arrivals/departures and passenger counts through
//! the dwell pipeline and prints one JSON line per dwell prediction.

use anyhow::{Context, Result};
use clap::Parser;
use dwell::clock::ManualClock;
use dwell::config::DwellConfig;
use dwell::dwell::DwellRequest;
use dwell::metrics::InMemoryMetrics;
use dwell::models::{ApcObservation, ArrivalDepartureEvent, PredictionMethod};
use dwell::service::DwellService;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// CSV of arrival/departure events
    #[arg(long, env = "SORREL_EVENTS")]
    events: PathBuf,

    /// CSV of passenger counter observations
    #[arg(long, env = "SORREL_APC")]
    apc: PathBuf,

    /// CSV of dwell prediction requests
    #[arg(long, env = "SORREL_REQUESTS")]
    requests: PathBuf,

    /// RON dwell configuration; defaults are used when omitted
    #[arg(long, env = "SORREL_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, env = "SORREL_LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    #[arg(long, default_value_t = 60)]
    eviction_period_secs: u64,
}

#[derive(Serialize)]
struct PredictionLine<'a> {
    trip_id: &'a str,
    stop_id: &'a str,
    stop_position: u32,
    vehicle_id: &'a str,
    value_ms: i64,
    method: PredictionMethod,
}

fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut rows = Vec::new();
    for (line, row) in reader.deserialize().enumerate() {
        match row {
            Ok(row) => rows.push(row),
            Err(e) => warn!("skipping row {} of {}: {}", line + 1, path.display(), e),
        }
    }
    Ok(rows)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .init();

    let config = match &args.config {
        Some(path) => DwellConfig::from_ron_file(path)?,
        None => DwellConfig::default(),
    };

    let events: Vec<ArrivalDepartureEvent> = read_csv(&args.events)?;
    let observations: Vec<ApcObservation> = read_csv(&args.apc)?;
    let requests: Vec<DwellRequest> = read_csv(&args.requests)?;
    info!(
        events = events.len(),
        observations = observations.len(),
        requests = requests.len(),
        "loaded replay inputs"
    );

    // retention is measured against the newest recorded event, not wall time
    let clock = Arc::new(ManualClock::default());
    if let Some(newest) = events.iter().map(|e| e.time_ms).max() {
        clock.advance_to(newest);
    }

    let metrics = Arc::new(InMemoryMetrics::new());
    let service = Arc::new(DwellService::new(
        Arc::new(config),
        clock.clone(),
        metrics.clone(),
    )?);
    let evictor = service
        .clone()
        .spawn_eviction_task(Duration::from_secs(args.eviction_period_secs.max(1)));

    let accepted = events
        .iter()
        .filter(|event| service.ingest_arrival_departure(event).is_some())
        .count();
    info!(
        accepted,
        partitions = service.stop_cache().len_partitions(),
        "ingested arrivals/departures"
    );
    service.stop_cache().log_contents();

    let matches = service.ingest_apc(&observations);
    info!(
        matched = matches.iter().filter(|m| m.is_matched()).count(),
        of = matches.len(),
        "correlated passenger counts"
    );

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for request in &requests {
        let prediction = service.predict(request);
        let line = PredictionLine {
            trip_id: &request.trip_id,
            stop_id: &request.stop_id,
            stop_position: request.stop_position,
            vehicle_id: &request.vehicle_id,
            value_ms: prediction.value_ms,
            method: prediction.method,
        };
        writeln!(out, "{}", serde_json::to_string(&line)?)?;
    }
    out.flush()?;

    evictor.abort();
    let report = service.evict_all();
    info!(?report, "final eviction pass");
    metrics.log_summary();

    Ok(())
}
