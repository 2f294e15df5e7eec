//! Wire <-> UI field table.
//!
//! The save tool uses camelCase keys (`tyres.frontLeft`); the UI record
//! uses PascalCase (`Tyres.FrontLeft`). [`FIELD_MAP`] is the single
//! source for the renaming, the per-field normalisation and the tool's
//! JSON schema.

use serde_json::{Map, Value, json};

use super::{RecordError, TyreCondition, VehicleRecord};

/// How a field's value is validated and described in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Free text
    Text,
    /// Whole number
    Integer,
    /// List of free-text notes
    TextList,
    /// One of the [`TyreCondition`] values
    Tyre,
}

/// One row of the renaming table.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    /// Path in the tool's parameter object
    pub wire: &'static [&'static str],
    /// Path in the UI record
    pub record: &'static [&'static str],
    pub kind: FieldKind,
}

pub const FIELD_MAP: &[FieldMapping] = &[
    FieldMapping {
        wire: &["make"],
        record: &["Make"],
        kind: FieldKind::Text,
    },
    FieldMapping {
        wire: &["model"],
        record: &["Model"],
        kind: FieldKind::Text,
    },
    FieldMapping {
        wire: &["year"],
        record: &["Year"],
        kind: FieldKind::Integer,
    },
    FieldMapping {
        wire: &["mileage"],
        record: &["Mileage"],
        kind: FieldKind::Integer,
    },
    FieldMapping {
        wire: &["conditionNotes"],
        record: &["ConditionNotes"],
        kind: FieldKind::TextList,
    },
    FieldMapping {
        wire: &["tyres", "frontLeft"],
        record: &["Tyres", "FrontLeft"],
        kind: FieldKind::Tyre,
    },
    FieldMapping {
        wire: &["tyres", "frontRight"],
        record: &["Tyres", "FrontRight"],
        kind: FieldKind::Tyre,
    },
    FieldMapping {
        wire: &["tyres", "backLeft"],
        record: &["Tyres", "BackLeft"],
        kind: FieldKind::Tyre,
    },
    FieldMapping {
        wire: &["tyres", "backRight"],
        record: &["Tyres", "BackRight"],
        kind: FieldKind::Tyre,
    },
];

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |node, key| node.get(key))
}

fn insert(root: &mut Map<String, Value>, path: &[&str], value: Value) {
    let Some((leaf, parents)) = path.split_last() else {
        return;
    };
    let mut node = root;
    for key in parents {
        let entry = node
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(map) = entry else {
            return;
        };
        node = map;
    }
    node.insert(leaf.to_string(), value);
}

/// Coerce a wire value into what the UI record accepts.
///
/// Anything that does not fit becomes the explicit "no value" marker.
fn normalise(kind: FieldKind, value: Option<&Value>, field: &str) -> Value {
    match (kind, value) {
        (FieldKind::Text, Some(Value::String(s))) => Value::String(s.clone()),
        (FieldKind::Integer, Some(Value::Number(n))) => {
            if let Some(i) = n.as_i64() {
                json!(i)
            } else if let Some(f) = n.as_f64().filter(|f| f.fract() == 0.0) {
                json!(f as i64)
            } else {
                Value::Null
            }
        }
        (FieldKind::Integer, Some(Value::String(s))) => s
            .trim()
            .parse::<i64>()
            .map(|i| json!(i))
            .unwrap_or(Value::Null),
        (FieldKind::TextList, Some(Value::Array(items))) => Value::Array(
            items
                .iter()
                .filter(|item| item.is_string())
                .cloned()
                .collect(),
        ),
        (FieldKind::TextList, Some(Value::String(s))) => json!([s]),
        (FieldKind::TextList, _) => json!([]),
        (FieldKind::Tyre, Some(Value::String(s))) => match TyreCondition::parse(s) {
            Some(condition) => json!(condition.as_str()),
            None => {
                tracing::warn!(field, value = %s, "Unknown tyre condition, dropping value");
                Value::Null
            }
        },
        (_, None | Some(Value::Null)) => Value::Null,
        (_, Some(other)) => {
            tracing::warn!(
                field,
                found = json_type_name(other),
                "Unexpected value type, dropping value"
            );
            Value::Null
        }
    }
}

/// Map the save tool's arguments into a [`VehicleRecord`].
pub fn from_wire(wire: &Value) -> Result<VehicleRecord, RecordError> {
    if !wire.is_object() {
        return Err(RecordError::NotAnObject(json_type_name(wire)));
    }

    let mut record = Map::new();
    for mapping in FIELD_MAP {
        let field = mapping.wire.join(".");
        let value = normalise(mapping.kind, lookup(wire, mapping.wire), &field);
        insert(&mut record, mapping.record, value);
    }

    Ok(serde_json::from_value(Value::Object(record))?)
}

/// Map a [`VehicleRecord`] into the save tool's parameter shape.
pub fn to_wire(record: &VehicleRecord) -> Value {
    let ui = serde_json::to_value(record).unwrap_or(Value::Null);

    let mut wire = Map::new();
    for mapping in FIELD_MAP {
        let value = lookup(&ui, mapping.record).cloned().unwrap_or(Value::Null);
        insert(&mut wire, mapping.wire, value);
    }
    Value::Object(wire)
}

fn leaf_schema(kind: FieldKind) -> Value {
    match kind {
        FieldKind::Text => json!({ "type": "string" }),
        FieldKind::Integer => json!({ "type": "integer" }),
        FieldKind::TextList => json!({ "type": "array", "items": { "type": "string" } }),
        FieldKind::Tyre => {
            let values: Vec<&str> = TyreCondition::all().iter().map(|c| c.as_str()).collect();
            json!({ "type": "string", "enum": values })
        }
    }
}

/// JSON schema for the save tool's parameters.
pub fn tool_parameters_schema() -> Value {
    let mut root = Map::new();
    root.insert("type".into(), json!("object"));

    for mapping in FIELD_MAP {
        // wire ["tyres", "frontLeft"] -> properties.tyres.properties.frontLeft
        let mut path: Vec<&str> = Vec::with_capacity(mapping.wire.len() * 2 + 1);
        for (depth, key) in mapping.wire.iter().enumerate() {
            path.push("properties");
            path.push(*key);
            if depth + 1 < mapping.wire.len() {
                path.push("type");
                insert(&mut root, &path, json!("object"));
                path.pop();
            }
        }
        insert(&mut root, &path, leaf_schema(mapping.kind));
    }

    Value::Object(root)
}
