//! Document type and the schema-checked codec.

use crate::error::{CodecError, CodecResult};
use crate::schema::Schema;
use serde_json::{Map, Value};

/// A JSON document: an object keyed by field name.
///
/// Every document carries a string `id` field, unique within its
/// collection.
pub type Document = Map<String, Value>;

/// Returns the document's `id` field.
///
/// # Errors
///
/// Returns a validation error if `id` is missing or not a string.
pub fn document_id(doc: &Document) -> CodecResult<&str> {
    match doc.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Ok(id),
        _ => Err(CodecError::validation(
            "document must carry a non-empty string 'id'",
        )),
    }
}

/// Encodes and decodes documents for one collection, enforcing its
/// schema on both directions.
#[derive(Debug, Clone)]
pub struct DocumentCodec {
    schema: Schema,
}

impl DocumentCodec {
    /// Creates a codec for the given schema.
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }

    /// Returns the codec's schema.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Validates and serializes a document.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Validation`] if the document violates the
    /// schema.
    pub fn encode(&self, doc: &Document) -> CodecResult<Vec<u8>> {
        let value = Value::Object(doc.clone());
        self.schema.validate(&value)?;
        Ok(serde_json::to_vec_pretty(&value)?)
    }

    /// Parses and validates raw bytes into a document.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Json`] for malformed JSON and
    /// [`CodecError::Validation`] if the parsed object violates the
    /// schema.
    pub fn decode(&self, raw: &[u8]) -> CodecResult<Document> {
        let value: Value = serde_json::from_slice(raw)?;
        self.schema.validate(&value)?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(CodecError::NotAnObject),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FieldType;
    use serde_json::json;

    fn codec() -> DocumentCodec {
        DocumentCodec::new(Schema::new().required("name", FieldType::String))
    }

    fn doc(value: Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn encode_decode_roundtrip() {
        let codec = codec();
        let original = doc(json!({"id": "1", "name": "John", "age": 30}));

        let bytes = codec.encode(&original).unwrap();
        let decoded = codec.decode(&bytes).unwrap();

        assert_eq!(original, decoded);
    }

    #[test]
    fn encode_rejects_invalid_document() {
        let codec = codec();
        let invalid = doc(json!({"id": "1"}));
        assert!(matches!(
            codec.encode(&invalid),
            Err(CodecError::Validation { .. })
        ));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let codec = codec();
        assert!(matches!(
            codec.decode(b"{not json"),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn decode_rejects_schema_violation() {
        let codec = codec();
        let raw = serde_json::to_vec(&json!({"id": "1", "name": 42})).unwrap();
        assert!(matches!(
            codec.decode(&raw),
            Err(CodecError::Validation { .. })
        ));
    }

    #[test]
    fn document_id_reads_id_field() {
        let d = doc(json!({"id": "abc", "name": "x"}));
        assert_eq!(document_id(&d).unwrap(), "abc");
    }

    #[test]
    fn document_id_rejects_missing() {
        let d = doc(json!({"name": "x"}));
        assert!(document_id(&d).is_err());
    }
}
