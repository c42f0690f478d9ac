//! # FolioDB Codec
//!
//! Schema model and JSON document codec for FolioDB.
//!
//! Collections validate every document against a caller-supplied
//! [`Schema`]; the [`DocumentCodec`] enforces the schema on both the
//! encode and decode path, so nothing that violates the schema ever
//! reaches or leaves disk unnoticed.
//!
//! ## Usage
//!
//! ```
//! use foliodb_codec::{DocumentCodec, FieldType, Schema};
//!
//! let codec = DocumentCodec::new(
//!     Schema::new().required("name", FieldType::String),
//! );
//!
//! let doc = serde_json::json!({"id": "1", "name": "John"})
//!     .as_object()
//!     .unwrap()
//!     .clone();
//! let bytes = codec.encode(&doc).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod document;
mod error;
mod schema;

pub use document::{document_id, Document, DocumentCodec};
pub use error::{CodecError, CodecResult};
pub use schema::{FieldSpec, FieldType, Schema};
