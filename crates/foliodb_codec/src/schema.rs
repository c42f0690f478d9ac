//! Collection schemas.

use crate::error::{CodecError, CodecResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// The JSON type a schema field accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Any JSON number.
    Number,
    /// JSON number with no fractional part.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// Nested JSON object.
    Object,
    /// JSON array.
    Array,
    /// Any JSON value.
    Any,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::Any => true,
        }
    }
}

/// A single field's schema rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Accepted JSON type.
    pub field_type: FieldType,
    /// Whether the field must be present.
    pub required: bool,
}

/// Schema a collection validates its documents against.
///
/// Documents always carry a string `id` field; the schema describes the
/// remaining fields. Fields not named by the schema are accepted.
///
/// # Example
///
/// ```
/// use foliodb_codec::{FieldType, Schema};
///
/// let schema = Schema::new()
///     .required("name", FieldType::String)
///     .optional("age", FieldType::Integer);
///
/// let doc = serde_json::json!({"id": "1", "name": "John", "age": 30});
/// assert!(schema.validate(&doc).is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    fields: BTreeMap<String, FieldSpec>,
}

impl Schema {
    /// Creates an empty schema that accepts any object with an `id`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a required field.
    #[must_use]
    pub fn required(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                field_type,
                required: true,
            },
        );
        self
    }

    /// Adds an optional field.
    #[must_use]
    pub fn optional(mut self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                field_type,
                required: false,
            },
        );
        self
    }

    /// Validates a JSON value against this schema.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Validation`] naming the first violated rule.
    pub fn validate(&self, value: &Value) -> CodecResult<()> {
        let object = value
            .as_object()
            .ok_or(CodecError::NotAnObject)?;

        match object.get("id") {
            Some(Value::String(id)) if !id.is_empty() => {}
            Some(_) => return Err(CodecError::validation("field 'id' must be a string")),
            None => return Err(CodecError::validation("missing required field 'id'")),
        }

        for (name, spec) in &self.fields {
            match object.get(name) {
                Some(field_value) => {
                    if !spec.field_type.accepts(field_value) {
                        return Err(CodecError::validation(format!(
                            "field '{name}' has the wrong type, expected {:?}",
                            spec.field_type
                        )));
                    }
                }
                None if spec.required => {
                    return Err(CodecError::validation(format!(
                        "missing required field '{name}'"
                    )));
                }
                None => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_schema() -> Schema {
        Schema::new()
            .required("name", FieldType::String)
            .optional("age", FieldType::Integer)
    }

    #[test]
    fn accepts_valid_document() {
        let doc = json!({"id": "1", "name": "John", "age": 30});
        assert!(user_schema().validate(&doc).is_ok());
    }

    #[test]
    fn optional_field_may_be_absent() {
        let doc = json!({"id": "1", "name": "John"});
        assert!(user_schema().validate(&doc).is_ok());
    }

    #[test]
    fn rejects_missing_id() {
        let doc = json!({"name": "John"});
        assert!(matches!(
            user_schema().validate(&doc),
            Err(CodecError::Validation { .. })
        ));
    }

    #[test]
    fn rejects_non_string_id() {
        let doc = json!({"id": 7, "name": "John"});
        assert!(user_schema().validate(&doc).is_err());
    }

    #[test]
    fn rejects_missing_required_field() {
        let doc = json!({"id": "1"});
        assert!(user_schema().validate(&doc).is_err());
    }

    #[test]
    fn rejects_wrong_type() {
        let doc = json!({"id": "1", "name": 42});
        assert!(user_schema().validate(&doc).is_err());
    }

    #[test]
    fn rejects_fractional_integer() {
        let doc = json!({"id": "1", "name": "John", "age": 30.5});
        assert!(user_schema().validate(&doc).is_err());
    }

    #[test]
    fn extra_fields_are_accepted() {
        let doc = json!({"id": "1", "name": "John", "nickname": "J"});
        assert!(user_schema().validate(&doc).is_ok());
    }

    #[test]
    fn rejects_non_object() {
        assert!(matches!(
            user_schema().validate(&json!([1, 2, 3])),
            Err(CodecError::NotAnObject)
        ));
    }

    #[test]
    fn schema_serde_roundtrip() {
        let schema = user_schema();
        let bytes = serde_json::to_vec(&schema).unwrap();
        let decoded: Schema = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(schema, decoded);
    }
}
