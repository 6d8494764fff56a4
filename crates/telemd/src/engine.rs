//! Telemetry engine - ties refresh, history and notification together.
//!
//! One engine instance owns the state table, the history store and the
//! listener set. `start` spawns the driver task; cycles never overlap
//! because the driver runs them one after another on a single task, and
//! `run_cycle` itself holds the refresh lock for the whole cycle.
//!
//! ```text
//!   Idle --tick--> Running --(refresh, join, sample, append, publish)--> Idle
//!     \                                                                  |
//!      `------------------------ stop --------------------------> Stopped
//! ```

use crate::catalog::PointCatalog;
use crate::config::Config;
use crate::gateway::FetchGateway;
use crate::history::{HistoryStore, RetentionPolicy};
use crate::hub::{NotificationHub, Subscription};
use crate::metrics::TelemetryMetrics;
use crate::refresh::RefreshEngine;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use telem_shared::{PointKey, Sample, TelemError};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Driver state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverPhase {
    Idle,
    Running,
    Stopped,
}

impl DriverPhase {
    fn to_u8(self) -> u8 {
        match self {
            DriverPhase::Idle => 0,
            DriverPhase::Running => 1,
            DriverPhase::Stopped => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => DriverPhase::Idle,
            1 => DriverPhase::Running,
            _ => DriverPhase::Stopped,
        }
    }
}

/// Process-wide settings fixed at initialization
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub index: String,
    pub interval: Duration,
    pub fetch_timeout: Duration,
    pub retention: RetentionPolicy,
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            index: config.gateway.index.clone(),
            interval: config.interval(),
            fetch_timeout: config.fetch_timeout(),
            retention: config.retention(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Summary of one completed cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub timestamp: DateTime<Utc>,
    pub samples: usize,
    pub fetch_failures: usize,
    pub listener_failures: usize,
    pub duration: Duration,
}

pub struct TelemetryEngine {
    refresh: Mutex<RefreshEngine>,
    history: Arc<HistoryStore>,
    hub: NotificationHub,
    metrics: TelemetryMetrics,
    keys: Vec<PointKey>,
    interval: Duration,
    phase: AtomicU8,
    cycles: AtomicU64,
}

impl TelemetryEngine {
    /// Build an engine from the catalog. Catalog problems are fatal.
    pub fn new(
        catalog: &PointCatalog,
        gateway: Arc<dyn FetchGateway>,
        settings: EngineSettings,
    ) -> Result<Self, TelemError> {
        let state = catalog.build_state()?;
        let metrics = TelemetryMetrics::new()
            .map_err(|e| TelemError::Config(format!("metrics registry: {}", e)))?;

        let keys: Vec<PointKey> = state.keys().cloned().collect();
        let history = Arc::new(HistoryStore::new(keys.clone(), settings.retention));
        let hub = NotificationHub::with_metrics(metrics.clone());
        let refresh = RefreshEngine::new(state, gateway, &settings.index, settings.fetch_timeout)
            .with_metrics(metrics.clone());

        info!(
            "Telemetry engine ready: {} points, index {}, interval {:?}",
            keys.len(),
            settings.index,
            settings.interval
        );

        Ok(Self {
            refresh: Mutex::new(refresh),
            history,
            hub,
            metrics,
            keys,
            interval: settings.interval,
            phase: AtomicU8::new(DriverPhase::Idle.to_u8()),
            cycles: AtomicU64::new(0),
        })
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn metrics(&self) -> &TelemetryMetrics {
        &self.metrics
    }

    /// Point keys in point order
    pub fn point_keys(&self) -> &[PointKey] {
        &self.keys
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Register a live listener; see `NotificationHub::subscribe`
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Sample) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.hub.subscribe(callback)
    }

    pub fn phase(&self) -> DriverPhase {
        DriverPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: DriverPhase) {
        self.phase.store(phase.to_u8(), Ordering::Release);
    }

    pub fn cycles_completed(&self) -> u64 {
        self.cycles.load(Ordering::Acquire)
    }

    /// Run one full cycle: refresh every field, then for every point in
    /// point order build a sample, append it to history and publish it.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut refresh = self.refresh.lock().await;
        let started = Instant::now();
        self.set_phase(DriverPhase::Running);

        let refreshed = refresh.refresh().await;

        // Every fetch has resolved past this point
        let timestamp = Utc::now();
        let samples = refresh.state().samples(timestamp);

        let mut listener_failures = 0;
        for sample in &samples {
            if let Err(e) = self.history.append(sample.clone()).await {
                warn!("History append failed for {}: {}", sample.id, e);
            }
            listener_failures += self.hub.publish(sample).failed;
        }

        let cycle = self.cycles.fetch_add(1, Ordering::AcqRel) + 1;
        let duration = started.elapsed();
        self.metrics.cycles_total.inc();
        self.metrics
            .cycle_duration_seconds
            .observe(duration.as_secs_f64());
        if self.phase() == DriverPhase::Running {
            self.set_phase(DriverPhase::Idle);
        }
        drop(refresh);

        debug!(
            "Cycle {} done in {:?}: {} samples, {} fetch failures, {} listener failures",
            cycle,
            duration,
            samples.len(),
            refreshed.failed(),
            listener_failures
        );

        CycleReport {
            cycle,
            timestamp,
            samples: samples.len(),
            fetch_failures: refreshed.failed(),
            listener_failures,
            duration,
        }
    }

    /// Spawn the driver task. The first cycle fires one interval after
    /// start; a cycle that overruns the interval is followed immediately
    /// by the next one, never by two.
    pub fn start(self: Arc<Self>) -> EngineHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let engine = self;

        let task = tokio::spawn(async move {
            let period = engine.interval;
            let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Telemetry driver started ({:?} cadence)", period);

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {}
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                engine.run_cycle().await;
            }

            engine.set_phase(DriverPhase::Stopped);
            info!(
                "Telemetry driver stopped after {} cycles",
                engine.cycles_completed()
            );
        });

        EngineHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

/// Control handle for a running driver task
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    /// Signal shutdown and wait for the driver to exit. A cycle already in
    /// progress runs to completion first.
    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(true);
        self.task.await.context("Telemetry driver task failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::FakeGateway;

    fn engine(fetch_timeout: Duration) -> (Arc<TelemetryEngine>, Arc<FakeGateway>) {
        let catalog = PointCatalog::from_json_str(r#"{"nav": {"heading": 10}}"#).unwrap();
        let state = catalog.build_state().unwrap();
        let gateway = Arc::new(FakeGateway::from_state(&state));
        let settings = EngineSettings {
            interval: Duration::from_secs(1),
            fetch_timeout,
            ..EngineSettings::default()
        };
        let engine = TelemetryEngine::new(&catalog, gateway.clone(), settings).unwrap();
        (Arc::new(engine), gateway)
    }

    #[tokio::test]
    async fn test_run_cycle_appends_and_counts() {
        let (engine, _gateway) = engine(Duration::from_millis(500));
        assert_eq!(engine.phase(), DriverPhase::Idle);

        let report = engine.run_cycle().await;

        assert_eq!(report.cycle, 1);
        assert_eq!(report.samples, 1);
        assert_eq!(engine.history().len("nav.heading").await, Some(1));
        assert_eq!(engine.phase(), DriverPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_driver_cycles_on_cadence_and_stops() {
        let (engine, _gateway) = engine(Duration::from_millis(500));
        let handle = Arc::clone(&engine).start();

        // Nothing before the first interval elapses
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(engine.cycles_completed(), 0);

        tokio::time::sleep(Duration::from_millis(2_600)).await;
        assert_eq!(engine.cycles_completed(), 3);

        handle.stop().await.unwrap();
        assert_eq!(engine.phase(), DriverPhase::Stopped);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(engine.cycles_completed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_cycle_is_followed_immediately() {
        let (engine, gateway) = engine(Duration::from_secs(5));
        // Each cycle takes 1.5s against a 1s interval
        gateway.delay("nav.heading", Duration::from_millis(1_500));

        let handle = Arc::clone(&engine).start();

        // Cycles run back to back: 1.0-2.5, 2.5-4.0, 4.0-5.5
        tokio::time::sleep(Duration::from_millis(4_200)).await;
        assert_eq!(engine.cycles_completed(), 2);
        assert_eq!(engine.phase(), DriverPhase::Running);

        // The in-progress cycle completes before the driver exits
        handle.stop().await.unwrap();
        assert_eq!(engine.cycles_completed(), 3);
        assert_eq!(engine.history().len("nav.heading").await, Some(3));
    }
}
