//! Timestamped telemetry samples.
//!
//! Wire shape (stable, consumed by dashboards):
//! - scalar points: `{"timestamp": <ms>, "id": "nav.heading", "value": 12}`
//! - composite points: `{"timestamp": <ms>, "id": "nav.power", "current": 1.1, "voltage": 5.2}`

use crate::value::{PointKey, PointValue, Scalar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Immutable record for one point in one cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub id: PointKey,
    #[serde(flatten)]
    pub body: SampleBody,
}

/// Payload of a sample; composite sub-fields are flattened into the record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleBody {
    Value { value: Scalar },
    Fields(BTreeMap<String, Scalar>),
}

impl Sample {
    /// Build the sample for `key` from a value extracted at this instant.
    pub fn build(key: &PointKey, value: &PointValue, timestamp: DateTime<Utc>) -> Self {
        let body = match value {
            PointValue::Scalar(scalar) => SampleBody::Value {
                value: scalar.clone(),
            },
            PointValue::Composite(fields) => SampleBody::Fields(fields.clone()),
        };
        Self {
            timestamp,
            id: key.clone(),
            body,
        }
    }

    /// Scalar value, if this is a scalar sample
    pub fn value(&self) -> Option<&Scalar> {
        match &self.body {
            SampleBody::Value { value } => Some(value),
            SampleBody::Fields(_) => None,
        }
    }

    /// Sub-field value, if this is a composite sample
    pub fn field(&self, name: &str) -> Option<&Scalar> {
        match &self.body {
            SampleBody::Value { .. } => None,
            SampleBody::Fields(fields) => fields.get(name),
        }
    }

    /// Epoch milliseconds, the unit consumers filter history by
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ts() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
    }

    #[test]
    fn test_scalar_sample_shape() {
        let key = PointKey::join("nav", "heading");
        let sample = Sample::build(&key, &PointValue::Scalar(Scalar::Int(12)), ts());

        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(
            json,
            json!({"timestamp": 1_700_000_000_123i64, "id": "nav.heading", "value": 12})
        );
    }

    #[test]
    fn test_composite_fields_are_flattened() {
        let key = PointKey::join("nav", "power");
        let mut fields = BTreeMap::new();
        fields.insert("voltage".to_string(), Scalar::Float(5.2));
        fields.insert("current".to_string(), Scalar::Float(1.1));
        let sample = Sample::build(&key, &PointValue::Composite(fields), ts());

        let json = serde_json::to_value(&sample).unwrap();
        assert_eq!(
            json,
            json!({
                "timestamp": 1_700_000_000_123i64,
                "id": "nav.power",
                "voltage": 5.2,
                "current": 1.1
            })
        );
        assert!(json.get("value").is_none());
        assert_eq!(sample.field("voltage"), Some(&Scalar::Float(5.2)));
        assert_eq!(sample.value(), None);
    }

    #[test]
    fn test_composite_sample_parses_back() {
        let raw = r#"{"timestamp": 1700000000123, "id": "nav.power", "voltage": 5.2, "current": 1}"#;
        let sample: Sample = serde_json::from_str(raw).unwrap();
        assert_eq!(sample.id.as_str(), "nav.power");
        assert_eq!(sample.timestamp, ts());
        assert_eq!(sample.field("current"), Some(&Scalar::Int(1)));
    }
}
