//! Structured record extracted from the conversation.
//!
//! The remote model fills in a vehicle inspection record by calling the
//! save tool with the whole object every time. The UI receives the record
//! in its own (PascalCase) shape; [`fields`] maps between the two.
//!
//! Every field is always present in the UI shape. Missing values are
//! serialized as `null`, never omitted.

mod fields;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use fields::{FIELD_MAP, FieldKind, FieldMapping, from_wire, to_wire, tool_parameters_schema};

/// Errors raised while decoding tool payloads.
#[derive(Debug, Error)]
pub enum RecordError {
    /// Arguments are not valid JSON
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Arguments are valid JSON but not an object
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Tyre condition as reported by the inspector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TyreCondition {
    NeedsReplacement,
    Worn,
    Good,
    New,
}

impl TyreCondition {
    /// Wire value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeedsReplacement => "NeedsReplacement",
            Self::Worn => "Worn",
            Self::Good => "Good",
            Self::New => "New",
        }
    }

    /// Parse an exact wire value.
    pub fn parse(s: &str) -> Option<Self> {
        Self::all().iter().copied().find(|c| c.as_str() == s)
    }

    /// All conditions, in schema order.
    pub fn all() -> &'static [TyreCondition] {
        &[Self::NeedsReplacement, Self::Worn, Self::Good, Self::New]
    }
}

impl std::fmt::Display for TyreCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Condition of each of the four tyres.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TyreSet {
    pub front_left: Option<TyreCondition>,
    pub front_right: Option<TyreCondition>,
    pub back_left: Option<TyreCondition>,
    pub back_right: Option<TyreCondition>,
}

/// The record shown in the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VehicleRecord {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i64>,
    pub mileage: Option<i64>,
    #[serde(default)]
    pub condition_notes: Vec<String>,
    #[serde(default)]
    pub tyres: TyreSet,
}

impl VehicleRecord {
    /// Decode the JSON argument string of a save-tool call.
    pub fn from_tool_arguments(arguments: &str) -> Result<Self, RecordError> {
        let value: serde_json::Value = serde_json::from_str(arguments)?;
        from_wire(&value)
    }

    /// Encode in the tool's parameter shape.
    pub fn to_wire(&self) -> serde_json::Value {
        to_wire(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tyre_condition_parse() {
        for condition in TyreCondition::all() {
            assert_eq!(TyreCondition::parse(condition.as_str()), Some(*condition));
        }
        assert_eq!(TyreCondition::parse("worn"), None);
        assert_eq!(TyreCondition::parse("Bald"), None);
    }

    #[test]
    fn test_record_serializes_explicit_nulls() {
        let json = serde_json::to_value(VehicleRecord::default()).unwrap();
        let object = json.as_object().unwrap();

        for key in ["Make", "Model", "Year", "Mileage"] {
            assert!(object.contains_key(key), "{key} missing");
            assert!(object[key].is_null());
        }
        assert_eq!(json["ConditionNotes"], serde_json::json!([]));
        assert!(json["Tyres"]["FrontLeft"].is_null());
        assert!(json["Tyres"]["BackRight"].is_null());
    }

    #[test]
    fn test_from_tool_arguments_partial() {
        let record =
            VehicleRecord::from_tool_arguments(r#"{"make":"Toyota","tyres":{"frontLeft":"Worn"}}"#)
                .unwrap();

        assert_eq!(record.make.as_deref(), Some("Toyota"));
        assert_eq!(record.tyres.front_left, Some(TyreCondition::Worn));
        assert_eq!(record.model, None);
        assert_eq!(record.year, None);

        let ui = serde_json::to_value(&record).unwrap();
        assert!(ui.as_object().unwrap().contains_key("Model"));
        assert!(ui["Model"].is_null());
        assert!(ui["Year"].is_null());
        assert_eq!(ui["Tyres"]["FrontLeft"], "Worn");
    }

    #[test]
    fn test_from_tool_arguments_malformed() {
        assert!(matches!(
            VehicleRecord::from_tool_arguments("{\"make\": "),
            Err(RecordError::InvalidJson(_))
        ));
        assert!(matches!(
            VehicleRecord::from_tool_arguments("[1, 2]"),
            Err(RecordError::NotAnObject("array"))
        ));
    }
}
