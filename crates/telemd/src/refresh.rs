//! Refresh engine - pulls the current value of every field once per cycle.
//!
//! One fetch per scalar point and one per composite sub-field, all issued
//! concurrently. `refresh` returns only after every fetch has resolved, so
//! cycle latency is bounded by the slowest fetch (capped by the per-fetch
//! timeout). Failed fetches leave the last known value in place.

use crate::gateway::{FetchError, FetchGateway};
use crate::metrics::TelemetryMetrics;
use crate::state::{FetchTarget, StateTable};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, warn};

/// A fetch that did not produce a value this cycle
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub target: FetchTarget,
    pub error: FetchError,
}

#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    /// Fetches issued
    pub attempted: usize,
    /// Fields written back
    pub updated: usize,
    pub failures: Vec<FetchFailure>,
    /// Fetch tasks that panicked or were cancelled
    pub lost: usize,
}

impl RefreshReport {
    pub fn failed(&self) -> usize {
        self.failures.len() + self.lost
    }
}

pub struct RefreshEngine {
    state: StateTable,
    gateway: Arc<dyn FetchGateway>,
    index: Arc<str>,
    fetch_timeout: Duration,
    metrics: Option<TelemetryMetrics>,
}

impl RefreshEngine {
    pub fn new(
        state: StateTable,
        gateway: Arc<dyn FetchGateway>,
        index: &str,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            state,
            gateway,
            index: Arc::from(index),
            fetch_timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: TelemetryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn state(&self) -> &StateTable {
        &self.state
    }

    /// Run one refresh pass over the whole table
    pub async fn refresh(&mut self) -> RefreshReport {
        let targets = self.state.fetch_targets();
        let mut report = RefreshReport {
            attempted: targets.len(),
            ..Default::default()
        };

        let mut join_set = JoinSet::new();
        for target in targets {
            let gateway = Arc::clone(&self.gateway);
            let index = Arc::clone(&self.index);
            let limit = self.fetch_timeout;

            join_set.spawn(async move {
                let field = target.field_key();
                let result = match timeout(limit, gateway.fetch(&index, &field)).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout(limit)),
                };
                (target, result)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((target, Ok(value))) => {
                    self.record("ok");
                    match self.state.apply(&target, value) {
                        Ok(()) => report.updated += 1,
                        Err(e) => warn!("Dropped value for {}: {}", target.field_key(), e),
                    }
                }
                Ok((target, Err(error))) => {
                    self.record(match error {
                        FetchError::Timeout(_) => "timeout",
                        _ => "error",
                    });
                    warn!(
                        "Fetch failed for {}, keeping last value: {}",
                        target.field_key(),
                        error
                    );
                    report.failures.push(FetchFailure { target, error });
                }
                Err(e) => {
                    self.record("error");
                    error!("Fetch task lost: {}", e);
                    report.lost += 1;
                }
            }
        }

        debug!(
            "Refresh complete: {}/{} fields updated, {} failed",
            report.updated,
            report.attempted,
            report.failed()
        );
        report
    }

    fn record(&self, result: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_fetch(result);
        }
    }
}
