//! Notification hub - fans samples out to live listeners.
//!
//! Each `publish` call delivers to a snapshot of the listener set taken at
//! the start of the call, so registration and removal can happen at any
//! time without disturbing a delivery loop. A listener whose handle has been
//! invoked is skipped even if it is still in an older snapshot.

use crate::metrics::TelemetryMetrics;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use telem_shared::Sample;
use tracing::{debug, error, warn};

/// Identity of a registered listener
pub type ListenerId = u64;

type Callback = dyn Fn(&Sample) -> anyhow::Result<()> + Send + Sync;

struct ListenerEntry {
    id: ListenerId,
    active: AtomicBool,
    callback: Box<Callback>,
}

struct HubInner {
    listeners: Mutex<Vec<Arc<ListenerEntry>>>,
    next_id: AtomicU64,
    metrics: Option<TelemetryMetrics>,
}

impl HubInner {
    fn lock(&self) -> MutexGuard<'_, Vec<Arc<ListenerEntry>>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: ListenerId) {
        let mut listeners = self.lock();
        listeners.retain(|entry| entry.id != id);
        if let Some(metrics) = &self.metrics {
            metrics.listeners.set(listeners.len() as i64);
        }
    }
}

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_metrics(metrics: TelemetryMetrics) -> Self {
        Self::build(Some(metrics))
    }

    fn build(metrics: Option<TelemetryMetrics>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                metrics,
            }),
        }
    }

    /// Register a listener. It receives every sample from every later
    /// publish call until the returned handle is used.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Sample) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let entry = Arc::new(ListenerEntry {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        });

        let mut listeners = self.inner.lock();
        listeners.push(Arc::clone(&entry));
        if let Some(metrics) = &self.inner.metrics {
            metrics.listeners.set(listeners.len() as i64);
        }
        debug!("Listener {} subscribed ({} total)", entry.id, listeners.len());

        Subscription {
            entry,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `sample` to every listener registered right now, in
    /// registration order. Listener errors and panics are contained.
    pub fn publish(&self, sample: &Sample) -> PublishReport {
        let snapshot: Vec<Arc<ListenerEntry>> = self.inner.lock().clone();
        let mut report = PublishReport::default();

        for entry in snapshot {
            if !entry.active.load(Ordering::Acquire) {
                continue;
            }

            match catch_unwind(AssertUnwindSafe(|| (entry.callback)(sample))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!("Listener {} failed on {}: {:#}", entry.id, sample.id, e);
                    report.failed += 1;
                }
                Err(_) => {
                    error!("Listener {} panicked on {}", entry.id, sample.id);
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            if let Some(metrics) = &self.inner.metrics {
                metrics.listener_failures_total.inc_by(report.failed as u64);
            }
        }
        report
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().len()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle returned by `subscribe`. Removes exactly its own listener.
#[derive(Clone)]
pub struct Subscription {
    entry: Arc<ListenerEntry>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.entry.id
    }

    pub fn is_active(&self) -> bool {
        self.entry.active.load(Ordering::Acquire)
    }

    /// Remove the listener. Calling this again has no effect.
    pub fn unsubscribe(&self) {
        if !self.entry.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.entry.id);
        }
        debug!("Listener {} unsubscribed", self.entry.id);
    }
}
