//! History store - append-only, per-point sample sequences.
//!
//! One sequence per point key, oldest first. The key set is fixed when the
//! store is created. Readers get a copy taken under the lock, so they see a
//! sequence either before or after an append, never in between.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use telem_shared::{PointKey, Sample, TelemError};
use tokio::sync::RwLock;
use tracing::debug;

/// How much history to keep per point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetentionPolicy {
    #[default]
    Unbounded,
    /// Keep the newest N samples per point
    MaxSamples(usize),
}

impl RetentionPolicy {
    pub fn from_limit(limit: Option<usize>) -> Self {
        match limit {
            Some(n) if n > 0 => RetentionPolicy::MaxSamples(n),
            _ => RetentionPolicy::Unbounded,
        }
    }
}

pub struct HistoryStore {
    series: RwLock<HashMap<PointKey, VecDeque<Sample>>>,
    retention: RetentionPolicy,
}

impl HistoryStore {
    pub fn new(keys: impl IntoIterator<Item = PointKey>, retention: RetentionPolicy) -> Self {
        let series = keys.into_iter().map(|k| (k, VecDeque::new())).collect();
        Self {
            series: RwLock::new(series),
            retention,
        }
    }

    /// Append a sample to the sequence for `sample.id`
    pub async fn append(&self, sample: Sample) -> Result<(), TelemError> {
        let mut series = self.series.write().await;
        let entries = series
            .get_mut(sample.id.as_str())
            .ok_or_else(|| TelemError::UnknownPoint(sample.id.to_string()))?;
        entries.push_back(sample);

        if let RetentionPolicy::MaxSamples(max) = self.retention {
            while entries.len() > max {
                entries.pop_front();
            }
        }
        Ok(())
    }

    /// Full sequence for `key`, oldest first. `None` for unknown keys.
    pub async fn read(&self, key: &str) -> Option<Vec<Sample>> {
        let series = self.series.read().await;
        series.get(key).map(|entries| entries.iter().cloned().collect())
    }

    /// Samples with `start <= timestamp <= end`; either bound may be open
    pub async fn read_range(
        &self,
        key: &str,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Option<Vec<Sample>> {
        let series = self.series.read().await;
        let entries = series.get(key)?;

        let from = match start {
            Some(start) => entries.partition_point(|s| s.timestamp < start),
            None => 0,
        };
        let to = match end {
            Some(end) => entries.partition_point(|s| s.timestamp <= end),
            None => entries.len(),
        };
        debug!("History range for {}: {}..{} of {}", key, from, to, entries.len());

        if from >= to {
            return Some(Vec::new());
        }
        Some(entries.range(from..to).cloned().collect())
    }

    /// Number of samples held for `key`
    pub async fn len(&self, key: &str) -> Option<usize> {
        self.series.read().await.get(key).map(VecDeque::len)
    }

    /// Known point keys, sorted
    pub async fn keys(&self) -> Vec<PointKey> {
        let mut keys: Vec<PointKey> = self.series.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use telem_shared::{PointValue, Scalar};

    fn sample(key: &PointKey, value: i64, at: DateTime<Utc>) -> Sample {
        Sample::build(key, &PointValue::Scalar(Scalar::Int(value)), at)
    }

    #[tokio::test]
    async fn test_append_keeps_order() {
        let key = PointKey::join("nav", "heading");
        let store = HistoryStore::new(vec![key.clone()], RetentionPolicy::Unbounded);
        let base = Utc::now();

        for i in 0..5 {
            store.append(sample(&key, i, base + Duration::seconds(i))).await.unwrap();
        }

        let history = store.read("nav.heading").await.unwrap();
        assert_eq!(history.len(), 5);
        for (i, s) in history.iter().enumerate() {
            assert_eq!(s.value(), Some(&Scalar::Int(i as i64)));
        }
    }

    #[tokio::test]
    async fn test_unknown_key_rejected() {
        let store = HistoryStore::new(vec![PointKey::join("nav", "heading")], RetentionPolicy::Unbounded);
        let stray = PointKey::join("nav", "roll");

        let err = store.append(sample(&stray, 1, Utc::now())).await.unwrap_err();
        assert!(matches!(err, TelemError::UnknownPoint(_)));
        assert!(store.read("nav.roll").await.is_none());
        assert_eq!(store.keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_read_range_bounds_are_inclusive() {
        let key = PointKey::join("eps", "bus");
        let store = HistoryStore::new(vec![key.clone()], RetentionPolicy::Unbounded);
        let base = Utc::now();
        for i in 0..10 {
            store.append(sample(&key, i, base + Duration::seconds(i))).await.unwrap();
        }

        let window = store
            .read_range("eps.bus", Some(base + Duration::seconds(2)), Some(base + Duration::seconds(4)))
            .await
            .unwrap();
        let values: Vec<_> = window.iter().filter_map(|s| s.value().cloned()).collect();
        assert_eq!(values, vec![Scalar::Int(2), Scalar::Int(3), Scalar::Int(4)]);

        let tail = store.read_range("eps.bus", Some(base + Duration::seconds(8)), None).await.unwrap();
        assert_eq!(tail.len(), 2);

        let empty = store
            .read_range("eps.bus", Some(base + Duration::seconds(20)), None)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_max_samples_evicts_oldest() {
        let key = PointKey::join("nav", "heading");
        let store = HistoryStore::new(vec![key.clone()], RetentionPolicy::from_limit(Some(3)));
        let base = Utc::now();
        for i in 0..5 {
            store.append(sample(&key, i, base + Duration::seconds(i))).await.unwrap();
        }

        let history = store.read("nav.heading").await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].value(), Some(&Scalar::Int(2)));
        assert_eq!(RetentionPolicy::from_limit(Some(0)), RetentionPolicy::Unbounded);
    }
}
