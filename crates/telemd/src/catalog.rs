//! Point catalog - the static description of every measurement point.
//!
//! The catalog is a two-level table, subsystem -> point name -> initial
//! value. The shape of the initial value decides the point's variant:
//! a primitive makes a scalar point, a table of primitives makes a
//! composite point. Read once at startup, never mutated.

use crate::state::StateTable;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::Path;
use telem_shared::{PointKey, PointValue, Scalar, TelemError};
use tracing::info;

/// Sub-field names that would collide with the sample envelope
const RESERVED_FIELDS: [&str; 2] = ["id", "timestamp"];

/// One catalog entry before key derivation
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    pub subsystem: String,
    pub point: String,
    pub initial: PointValue,
}

/// Parsed point catalog
#[derive(Debug, Clone, Default)]
pub struct PointCatalog {
    entries: Vec<CatalogEntry>,
}

impl PointCatalog {
    /// Load a catalog file, picking the format from the extension
    pub fn load(path: &Path) -> Result<Self, TelemError> {
        let content = fs::read_to_string(path)?;
        let catalog = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&content)?,
            Some("json") => Self::from_json_str(&content)?,
            other => {
                return Err(TelemError::Catalog(format!(
                    "unsupported catalog extension {:?} for {}",
                    other,
                    path.display()
                )))
            }
        };
        info!(
            "Loaded catalog from {} ({} points)",
            path.display(),
            catalog.len()
        );
        Ok(catalog)
    }

    /// Parse a JSON catalog. Repeated names are kept so they can be
    /// reported instead of silently overwritten.
    pub fn from_json_str(content: &str) -> Result<Self, TelemError> {
        let node: Node = serde_json::from_str(content)?;
        Self::from_node(&node)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, TelemError> {
        let table: toml::Table = toml::from_str(content)?;
        let value = serde_json::to_value(table)?;
        Self::from_node(&Node::from(&value))
    }

    /// Parse a nested `subsystem -> point -> initial value` document
    fn from_node(node: &Node) -> Result<Self, TelemError> {
        let subsystems = node
            .as_table()
            .ok_or_else(|| TelemError::Catalog("top level must be a table of subsystems".into()))?;

        let mut seen_subsystems = HashSet::new();
        let mut entries = Vec::new();
        for (subsystem, points) in subsystems {
            check_name(subsystem, "subsystem")?;
            if !seen_subsystems.insert(subsystem.as_str()) {
                return Err(TelemError::DuplicateKey(subsystem.clone()));
            }
            let points = points.as_table().ok_or_else(|| {
                TelemError::Catalog(format!("subsystem '{}' must be a table of points", subsystem))
            })?;

            let mut seen_points = HashSet::new();
            for (point, initial) in points {
                check_name(point, "point")?;
                if !seen_points.insert(point.as_str()) {
                    return Err(TelemError::DuplicateKey(
                        PointKey::join(subsystem, point).to_string(),
                    ));
                }
                let initial = parse_initial(subsystem, point, initial)?;
                entries.push(CatalogEntry {
                    subsystem: subsystem.clone(),
                    point: point.clone(),
                    initial,
                });
            }
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Derive the flat state table.
    ///
    /// Two entries that join to the same key are a fatal configuration
    /// error, e.g. subsystem `a.b` point `c` next to subsystem `a` point `b.c`.
    pub fn build_state(&self) -> Result<StateTable, TelemError> {
        let mut points = BTreeMap::new();
        for entry in &self.entries {
            let key = PointKey::join(&entry.subsystem, &entry.point);
            if points.contains_key(&key) {
                return Err(TelemError::DuplicateKey(key.to_string()));
            }
            points.insert(key, entry.initial.clone());
        }
        Ok(StateTable::new(points))
    }
}

/// Raw catalog document. Tables keep every key in document order,
/// duplicates included.
#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf(Value),
    Table(Vec<(String, Node)>),
}

impl Node {
    fn as_table(&self) -> Option<&[(String, Node)]> {
        match self {
            Node::Table(entries) => Some(entries),
            Node::Leaf(_) => None,
        }
    }
}

impl From<&Value> for Node {
    fn from(value: &Value) -> Self {
        match value {
            Value::Object(map) => Node::Table(
                map.iter()
                    .map(|(k, v)| (k.clone(), Node::from(v)))
                    .collect(),
            ),
            other => Node::Leaf(other.clone()),
        }
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(NodeVisitor)
    }
}

struct NodeVisitor;

impl<'de> Visitor<'de> for NodeVisitor {
    type Value = Node;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a catalog value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Node, E> {
        Ok(Node::Leaf(Value::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Node, E> {
        Ok(Node::Leaf(Value::from(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Node, E> {
        Ok(Node::Leaf(Value::from(v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Node, E> {
        Ok(Node::Leaf(Value::from(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Node, E> {
        Ok(Node::Leaf(Value::String(v.to_owned())))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Node, E> {
        Ok(Node::Leaf(Value::String(v)))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Leaf(Value::Null))
    }

    fn visit_none<E: de::Error>(self) -> Result<Node, E> {
        Ok(Node::Leaf(Value::Null))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Node, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Node::Leaf(Value::Array(items)))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Node, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut entries = Vec::new();
        while let Some((key, value)) = map.next_entry::<String, Node>()? {
            entries.push((key, value));
        }
        Ok(Node::Table(entries))
    }
}

fn check_name(name: &str, what: &str) -> Result<(), TelemError> {
    if name.trim().is_empty() {
        return Err(TelemError::Catalog(format!("empty {} name", what)));
    }
    Ok(())
}

fn parse_initial(subsystem: &str, point: &str, node: &Node) -> Result<PointValue, TelemError> {
    match node {
        Node::Leaf(value) => Scalar::from_json(value)
            .map(PointValue::Scalar)
            .ok_or_else(|| {
                TelemError::Catalog(format!(
                    "{}.{}: initial value must be a primitive or a table of primitives",
                    subsystem, point
                ))
            }),
        Node::Table(fields) => parse_composite(subsystem, point, fields),
    }
}

fn parse_composite(
    subsystem: &str,
    point: &str,
    fields: &[(String, Node)],
) -> Result<PointValue, TelemError> {
    if fields.is_empty() {
        return Err(TelemError::Catalog(format!(
            "{}.{}: composite point has no sub-fields",
            subsystem, point
        )));
    }
    // A lone `value` field reads back as a scalar sample.
    if fields.len() == 1 && fields[0].0 == "value" {
        return Err(TelemError::Catalog(format!(
            "{}.{}: a composite point cannot have 'value' as its only sub-field",
            subsystem, point
        )));
    }

    let mut parsed = BTreeMap::new();
    for (name, node) in fields {
        check_name(name, "sub-field")?;
        if RESERVED_FIELDS.contains(&name.as_str()) {
            return Err(TelemError::Catalog(format!(
                "{}.{}.{}: sub-field name is reserved",
                subsystem, point, name
            )));
        }
        let scalar = match node {
            Node::Leaf(value) => Scalar::from_json(value),
            Node::Table(_) => None,
        }
        .ok_or_else(|| {
            TelemError::Catalog(format!(
                "{}.{}.{}: sub-field must be a primitive",
                subsystem, point, name
            ))
        })?;
        if parsed.insert(name.clone(), scalar).is_some() {
            return Err(TelemError::DuplicateKey(
                PointKey::join(subsystem, point).field(name),
            ));
        }
    }
    Ok(PointValue::Composite(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use telem_shared::value::PointShape;

    #[test]
    fn test_build_state_from_json() {
        let catalog = PointCatalog::from_json_str(
            r#"{"nav": {"heading": 10, "power": {"voltage": 5, "current": 1}}}"#,
        )
        .unwrap();
        let state = catalog.build_state().unwrap();

        let keys: Vec<&str> = state.keys().map(|k| k.as_str()).collect();
        assert_eq!(keys, vec!["nav.heading", "nav.power"]);
        assert_eq!(
            state.get("nav.heading"),
            Some(&PointValue::Scalar(Scalar::Int(10)))
        );
        let power = state.get("nav.power").unwrap();
        assert_eq!(power.shape(), PointShape::Composite);
        assert_eq!(power.field_names(), vec!["current", "voltage"]);
    }

    #[test]
    fn test_build_state_from_toml() {
        let catalog = PointCatalog::from_toml_str(
            r#"
[adcs]
mode = "standby"
enabled = true

[adcs.gyr]
x = 0.0
y = 0.0
z = 0.0
"#,
        )
        .unwrap();
        let state = catalog.build_state().unwrap();
        assert_eq!(state.len(), 3);
        assert_eq!(
            state.get("adcs.mode"),
            Some(&PointValue::Scalar(Scalar::Text("standby".into())))
        );
        assert_eq!(state.get("adcs.gyr").unwrap().field_names(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_duplicate_key_after_join_is_fatal() {
        let catalog = PointCatalog::from_json_str(r#"{"a.b": {"c": 1}, "a": {"b.c": 2}}"#).unwrap();
        let err = catalog.build_state().unwrap_err();
        assert!(matches!(err, TelemError::DuplicateKey(ref k) if k == "a.b.c"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_malformed_catalogs_rejected() {
        let cases = [
            r#"[1, 2]"#,
            r#"{"nav": 3}"#,
            r#"{"nav": {"heading": null}}"#,
            r#"{"nav": {"heading": [1, 2]}}"#,
            r#"{"nav": {"power": {}}}"#,
            r#"{"nav": {"power": {"voltage": {"deep": 1}}}}"#,
            r#"{"": {"heading": 1}}"#,
            r#"{"nav": {"power": {"id": 7, "voltage": 5}}}"#,
            r#"{"nav": {"power": {"timestamp": 3}}}"#,
            r#"{"nav": {"power": {"value": 1}}}"#,
        ];
        for case in cases {
            let result = PointCatalog::from_json_str(case);
            assert!(
                matches!(result, Err(TelemError::Catalog(_))),
                "expected catalog error for {}",
                case
            );
        }
    }

    #[test]
    fn test_value_allowed_next_to_other_sub_fields() {
        let catalog =
            PointCatalog::from_json_str(r#"{"nav": {"power": {"value": 1, "unit": "W"}}}"#).unwrap();
        let state = catalog.build_state().unwrap();
        assert_eq!(state.get("nav.power").unwrap().field_names(), vec!["unit", "value"]);
    }

    #[test]
    fn test_reserved_sub_field_rejected_in_toml() {
        let result = PointCatalog::from_toml_str("[nav.power]\nid = 7\nvoltage = 5\n");
        assert!(matches!(result, Err(TelemError::Catalog(_))));
    }

    #[test]
    fn test_repeated_names_in_json_are_fatal() {
        let err = PointCatalog::from_json_str(r#"{"nav": {"heading": 10, "heading": {"a": 1}}}"#)
            .unwrap_err();
        assert!(matches!(err, TelemError::DuplicateKey(ref k) if k == "nav.heading"));
        assert!(err.is_fatal());

        let err = PointCatalog::from_json_str(r#"{"nav": {"heading": 1}, "nav": {"roll": 2}}"#)
            .unwrap_err();
        assert!(matches!(err, TelemError::DuplicateKey(ref k) if k == "nav"));

        let err =
            PointCatalog::from_json_str(r#"{"nav": {"power": {"voltage": 5, "voltage": 6}}}"#)
                .unwrap_err();
        assert!(matches!(err, TelemError::DuplicateKey(ref k) if k == "nav.power.voltage"));
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        fs::write(&path, "nav: {}").unwrap();
        assert!(matches!(
            PointCatalog::load(&path),
            Err(TelemError::Catalog(_))
        ));
    }

    #[test]
    fn test_example_catalog_builds() {
        let catalog =
            PointCatalog::from_json_str(include_str!("../../../config/catalog.example.json")).unwrap();
        let state = catalog.build_state().unwrap();
        assert_eq!(state.len(), 8);
        assert_eq!(state.fetch_targets().len(), 6 + 3 + 3);
    }
}
