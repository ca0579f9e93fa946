// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use scc::HashMap as SccHashMap;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Receives a hit/miss or a duration for every stage of the dwell pipeline.
pub trait MetricsSink: Send + Sync {
    fn record_outcome(&self, name: &'static str, hit: bool);
    fn record_duration(&self, name: &'static str, elapsed: Duration);
}

/// Emits every metric as a debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn record_outcome(&self, name: &'static str, hit: bool) {
        debug!(metric = name, hit, "dwell outcome");
    }

    fn record_duration(&self, name: &'static str, elapsed: Duration) {
        debug!(
            metric = name,
            elapsed_us = elapsed.as_micros() as u64,
            "dwell duration"
        );
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct OutcomeCounts {
    hits: u64,
    misses: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct DurationTotals {
    count: u64,
    total_us: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSummary {
    pub name: &'static str,
    pub hits: Option<u64>,
    pub misses: Option<u64>,
    pub average_ms: Option<f64>,
}

/// Counts outcomes and averages durations in memory.
#[derive(Default)]
pub struct InMemoryMetrics {
    outcomes: SccHashMap<&'static str, OutcomeCounts>,
    durations: SccHashMap<&'static str, DurationTotals>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hits(&self, name: &str) -> u64 {
        self.outcomes.read(name, |_, c| c.hits).unwrap_or(0)
    }

    pub fn misses(&self, name: &str) -> u64 {
        self.outcomes.read(name, |_, c| c.misses).unwrap_or(0)
    }

    pub fn duration_samples(&self, name: &str) -> u64 {
        self.durations.read(name, |_, d| d.count).unwrap_or(0)
    }

    pub fn summary(&self) -> Vec<MetricSummary> {
        let mut rows: Vec<MetricSummary> = Vec::new();

        self.outcomes.scan(|name, counts| {
            rows.push(MetricSummary {
                name: *name,
                hits: Some(counts.hits),
                misses: Some(counts.misses),
                average_ms: None,
            });
        });

        self.durations.scan(|name, totals| {
            let average_ms = match totals.count {
                0 => None,
                n => Some(totals.total_us as f64 / n as f64 / 1000.0),
            };
            rows.push(MetricSummary {
                name: *name,
                hits: None,
                misses: None,
                average_ms,
            });
        });

        rows.sort_by(|a, b| a.name.cmp(b.name));
        rows
    }

    pub fn log_summary(&self) {
        for row in self.summary() {
            info!(
                metric = row.name,
                hits = row.hits,
                misses = row.misses,
                average_ms = row.average_ms,
                "metric summary"
            );
        }
    }
}

impl MetricsSink for InMemoryMetrics {
    fn record_outcome(&self, name: &'static str, hit: bool) {
        self.outcomes
            .entry(name)
            .and_modify(|c| {
                if hit {
                    c.hits += 1;
                } else {
                    c.misses += 1;
                }
            })
            .or_insert(OutcomeCounts {
                hits: u64::from(hit),
                misses: u64::from(!hit),
            });
    }

    fn record_duration(&self, name: &'static str, elapsed: Duration) {
        let micros = elapsed.as_micros();
        self.durations
            .entry(name)
            .and_modify(|d| {
                d.count += 1;
                d.total_us += micros;
            })
            .or_insert(DurationTotals {
                count: 1,
                total_us: micros,
            });
    }
}
