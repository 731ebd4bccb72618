//! Rich-text editor deltas (Quill format).
//!
//! ```json
//! {"ops": [{"retain": 3}, {"insert": "ab", "attributes": {"bold": true}}, {"delete": 2}]}
//! ```
//!
//! Lengths are UTF-16 code units, matching the editor.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;
use yrs::types::Attrs;
use yrs::Any;

/// Formatting attributes of an op.
pub type Attributes = Map<String, Value>;

/// A single delta operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeltaOp {
    Insert {
        insert: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Retain {
        retain: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attributes: Option<Attributes>,
    },
    Delete {
        delete: u32,
    },
}

/// An ordered list of delta operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditorDelta {
    pub ops: Vec<DeltaOp>,
}

impl EditorDelta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retain(mut self, len: u32) -> Self {
        self.ops.push(DeltaOp::Retain { retain: len, attributes: None });
        self
    }

    /// Retain `len` units and apply `attributes` to them.
    pub fn format(mut self, len: u32, attributes: Attributes) -> Self {
        self.ops.push(DeltaOp::Retain {
            retain: len,
            attributes: Some(attributes),
        });
        self
    }

    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.ops.push(DeltaOp::Insert { insert: text.into(), attributes: None });
        self
    }

    pub fn insert_with(mut self, text: impl Into<String>, attributes: Attributes) -> Self {
        self.ops.push(DeltaOp::Insert {
            insert: text.into(),
            attributes: Some(attributes),
        });
        self
    }

    pub fn delete(mut self, len: u32) -> Self {
        self.ops.push(DeltaOp::Delete { delete: len });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Parse a Quill JSON delta. Null attribute values are normalized.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let mut delta: Self = serde_json::from_str(json)?;
        delta.normalize();
        Ok(delta)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Replace every `null` attribute value with `false`.
    pub fn normalize(&mut self) {
        for op in &mut self.ops {
            if let DeltaOp::Insert { attributes: Some(attrs), .. }
            | DeltaOp::Retain { attributes: Some(attrs), .. } = op
            {
                normalize_attributes(attrs);
            }
        }
    }
}

/// Turn explicit `null` values into `false` so toggled-off formatting is
/// communicated instead of dropped.
pub fn normalize_attributes(attributes: &mut Attributes) {
    for value in attributes.values_mut() {
        if value.is_null() {
            *value = Value::Bool(false);
        }
    }
}

/// UTF-16 length of `text`, the unit used by editor offsets.
pub fn utf16_len(text: &str) -> u32 {
    text.encode_utf16().count() as u32
}

/// Convert editor attributes into a Yrs attribute map (normalized).
pub fn to_attrs(attributes: &Attributes) -> Attrs {
    attributes
        .iter()
        .map(|(key, value)| {
            let value = if value.is_null() { Any::Bool(false) } else { json_to_any(value) };
            (Arc::from(key.as_str()), value)
        })
        .collect()
}

/// Convert a Yrs attribute map into editor attributes (normalized).
pub fn from_attrs(attrs: &Attrs) -> Attributes {
    attrs
        .iter()
        .map(|(key, value)| (key.to_string(), any_to_json(value)))
        .collect()
}

fn json_to_any(value: &Value) -> Any {
    match value {
        Value::Null => Any::Null,
        Value::Bool(b) => Any::Bool(*b),
        Value::Number(n) => Any::Number(n.as_f64().unwrap_or_default()),
        Value::String(s) => Any::String(Arc::from(s.as_str())),
        Value::Array(items) => {
            let items: Vec<Any> = items.iter().map(json_to_any).collect();
            Any::Array(Arc::from(items))
        }
        Value::Object(map) => {
            let map: HashMap<String, Any> =
                map.iter().map(|(k, v)| (k.clone(), json_to_any(v))).collect();
            Any::Map(Arc::new(map))
        }
    }
}

fn any_to_json(value: &Any) -> Value {
    match value {
        Any::Null | Any::Undefined => Value::Bool(false),
        Any::Bool(b) => Value::Bool(*b),
        Any::Number(n) => number_to_json(*n),
        Any::BigInt(n) => Value::Number(Number::from(*n)),
        Any::String(s) => Value::String(s.to_string()),
        Any::Buffer(bytes) => Value::Array(bytes.iter().map(|b| Value::from(*b)).collect()),
        Any::Array(items) => Value::Array(items.iter().map(any_to_json).collect()),
        Any::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), any_to_json(v)))
                .collect(),
        ),
    }
}

// Editors send header levels and similar values as integers.
fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_quill_delta() {
        let delta = EditorDelta::from_json(
            r#"{"ops":[{"retain":3},{"insert":"ab","attributes":{"bold":true}},{"delete":2}]}"#,
        )
        .unwrap();

        let expected = EditorDelta::new()
            .retain(3)
            .insert_with("ab", attrs(json!({"bold": true})))
            .delete(2);
        assert_eq!(delta, expected);
    }

    #[test]
    fn test_serialize_skips_missing_attributes() {
        let delta = EditorDelta::new().retain(1).insert("x").delete(1);
        assert_eq!(
            delta.to_json().unwrap(),
            r#"{"ops":[{"retain":1},{"insert":"x"},{"delete":1}]}"#
        );
    }

    #[test]
    fn test_null_attribute_normalized_on_parse() {
        let delta =
            EditorDelta::from_json(r#"{"ops":[{"insert":"a","attributes":{"bold":null}}]}"#)
                .unwrap();
        assert_eq!(delta, EditorDelta::new().insert_with("a", attrs(json!({"bold": false}))));
    }

    #[test]
    fn test_normalize_retain_attributes() {
        let mut delta = EditorDelta::new().format(4, attrs(json!({"italic": null, "bold": true})));
        delta.normalize();
        assert_eq!(
            delta,
            EditorDelta::new().format(4, attrs(json!({"italic": false, "bold": true})))
        );
    }

    #[test]
    fn test_attrs_conversion() {
        let source = attrs(json!({"bold": null, "header": 1, "color": "#f00"}));
        let yrs_attrs = to_attrs(&source);
        assert_eq!(yrs_attrs.get("bold"), Some(&Any::Bool(false)));
        assert_eq!(yrs_attrs.get("header"), Some(&Any::Number(1.0)));

        let back = from_attrs(&yrs_attrs);
        assert_eq!(back, attrs(json!({"bold": false, "header": 1, "color": "#f00"})));
    }

    #[test]
    fn test_null_any_becomes_false() {
        let mut yrs_attrs = Attrs::new();
        yrs_attrs.insert(Arc::from("bold"), Any::Null);
        assert_eq!(from_attrs(&yrs_attrs), attrs(json!({"bold": false})));
    }

    #[test]
    fn test_utf16_len() {
        assert_eq!(utf16_len("abc"), 3);
        assert_eq!(utf16_len("😀"), 2);
        assert_eq!(utf16_len("é"), 1);
    }

    #[test]
    fn test_reject_embed_insert() {
        assert!(EditorDelta::from_json(r#"{"ops":[{"insert":{"image":"x.png"}}]}"#).is_err());
    }
}
