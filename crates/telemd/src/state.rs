//! State table - flat map from point key to current value.
//!
//! Owned by the refresh engine. Readers never hold a reference into the
//! table; they get samples built from it after the cycle's fetches have joined.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use telem_shared::{PointKey, PointValue, Sample, Scalar, TelemError};

/// One field to fetch from the data store
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchTarget {
    pub key: PointKey,
    /// Set for composite sub-fields
    pub sub_field: Option<String>,
}

impl FetchTarget {
    /// Fully qualified field name sent to the gateway
    pub fn field_key(&self) -> String {
        match &self.sub_field {
            Some(sub) => self.key.field(sub),
            None => self.key.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StateTable {
    points: BTreeMap<PointKey, PointValue>,
}

impl StateTable {
    pub fn new(points: BTreeMap<PointKey, PointValue>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Point keys in point order
    pub fn keys(&self) -> impl Iterator<Item = &PointKey> {
        self.points.keys()
    }

    pub fn get(&self, key: &str) -> Option<&PointValue> {
        self.points.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PointKey, &PointValue)> {
        self.points.iter()
    }

    /// Every field the refresh engine must fetch: one per scalar point,
    /// one per composite sub-field.
    pub fn fetch_targets(&self) -> Vec<FetchTarget> {
        let mut targets = Vec::new();
        for (key, value) in &self.points {
            match value {
                PointValue::Scalar(_) => targets.push(FetchTarget {
                    key: key.clone(),
                    sub_field: None,
                }),
                PointValue::Composite(fields) => {
                    targets.extend(fields.keys().map(|sub| FetchTarget {
                        key: key.clone(),
                        sub_field: Some(sub.clone()),
                    }));
                }
            }
        }
        targets
    }

    /// Write a fetched value back in place.
    ///
    /// The point's shape and sub-field set are never changed; a write that
    /// would change them is rejected.
    pub fn apply(&mut self, target: &FetchTarget, value: Scalar) -> Result<(), TelemError> {
        let current = self
            .points
            .get_mut(target.key.as_str())
            .ok_or_else(|| TelemError::UnknownPoint(target.key.to_string()))?;

        match (current, &target.sub_field) {
            (PointValue::Scalar(slot), None) => {
                *slot = value;
                Ok(())
            }
            (PointValue::Composite(fields), Some(sub)) => match fields.get_mut(sub) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(TelemError::ShapeMismatch {
                    key: target.key.to_string(),
                    detail: format!("no sub-field '{}'", sub),
                }),
            },
            (PointValue::Scalar(_), Some(sub)) => Err(TelemError::ShapeMismatch {
                key: target.key.to_string(),
                detail: format!("scalar point has no sub-field '{}'", sub),
            }),
            (PointValue::Composite(_), None) => Err(TelemError::ShapeMismatch {
                key: target.key.to_string(),
                detail: "scalar write to composite point".into(),
            }),
        }
    }

    /// One sample per point, in point order, all stamped with `timestamp`
    pub fn samples(&self, timestamp: DateTime<Utc>) -> Vec<Sample> {
        self.points
            .iter()
            .map(|(key, value)| Sample::build(key, value, timestamp))
            .collect()
    }
}
