//! Point keys and point values.
//!
//! A point is either a single primitive (`Scalar`) or a fixed set of named
//! primitives (`Composite`). The variant is decided once, from the catalog,
//! and never changes afterwards.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

/// Separator between subsystem, point name and sub-field name
pub const KEY_DELIMITER: char = '.';

/// Opaque primitive value as reported by the data store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    /// Decode a raw response body.
    ///
    /// Bodies that parse as a JSON primitive become the matching variant;
    /// anything else is kept verbatim as text.
    pub fn from_raw(body: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(body.trim()) {
            Ok(value) => Self::from_json(&value).unwrap_or_else(|| Scalar::Text(body.to_string())),
            Err(_) => Scalar::Text(body.to_string()),
        }
    }

    /// Convert a JSON primitive. Returns `None` for null, arrays and objects.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Scalar::Int(i)),
                None => n.as_f64().map(Scalar::Float),
            },
            serde_json::Value::String(s) => Some(Scalar::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Int(i)
    }
}

impl From<i32> for Scalar {
    fn from(i: i32) -> Self {
        Scalar::Int(i64::from(i))
    }
}

impl From<f64> for Scalar {
    fn from(x: f64) -> Self {
        Scalar::Float(x)
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::Text(s)
    }
}

/// Shape of a point, fixed for the process lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointShape {
    Scalar,
    Composite,
}

/// Current value of a point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointValue {
    Scalar(Scalar),
    Composite(BTreeMap<String, Scalar>),
}

impl PointValue {
    pub fn shape(&self) -> PointShape {
        match self {
            PointValue::Scalar(_) => PointShape::Scalar,
            PointValue::Composite(_) => PointShape::Composite,
        }
    }

    /// Sub-field names of a composite, in order. Empty for scalars.
    pub fn field_names(&self) -> Vec<&str> {
        match self {
            PointValue::Scalar(_) => Vec::new(),
            PointValue::Composite(fields) => fields.keys().map(String::as_str).collect(),
        }
    }
}

/// Fully qualified dotted identifier of a point, e.g. `nav.heading`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PointKey(String);

impl PointKey {
    /// Join a subsystem and a local point name
    pub fn join(subsystem: &str, point: &str) -> Self {
        PointKey(format!("{}{}{}", subsystem, KEY_DELIMITER, point))
    }

    /// Address a sub-field of this point
    pub fn field(&self, sub_field: &str) -> String {
        format!("{}{}{}", self.0, KEY_DELIMITER, sub_field)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for PointKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_primitives() {
        assert_eq!(Scalar::from_raw("12"), Scalar::Int(12));
        assert_eq!(Scalar::from_raw("5.2\n"), Scalar::Float(5.2));
        assert_eq!(Scalar::from_raw("true"), Scalar::Bool(true));
        assert_eq!(Scalar::from_raw("\"armed\""), Scalar::Text("armed".into()));
    }

    #[test]
    fn test_from_raw_keeps_unparseable_text_verbatim() {
        assert_eq!(Scalar::from_raw("STANDBY"), Scalar::Text("STANDBY".into()));
        assert_eq!(Scalar::from_raw("[1,2]"), Scalar::Text("[1,2]".into()));
        assert_eq!(Scalar::from_raw("null"), Scalar::Text("null".into()));
    }

    #[test]
    fn test_point_key_join_and_field() {
        let key = PointKey::join("nav", "power");
        assert_eq!(key.as_str(), "nav.power");
        assert_eq!(key.field("voltage"), "nav.power.voltage");
    }

    #[test]
    fn test_scalar_serializes_as_plain_json() {
        assert_eq!(serde_json::to_string(&Scalar::Int(10)).unwrap(), "10");
        assert_eq!(serde_json::to_string(&Scalar::from("on")).unwrap(), "\"on\"");
        let back: Scalar = serde_json::from_str("5.5").unwrap();
        assert_eq!(back, Scalar::Float(5.5));
    }
}
