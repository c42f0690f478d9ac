//! # FolioDB Core
//!
//! Durability and consistency engine for FolioDB, an embedded
//! file-backed JSON document database.
//!
//! This crate provides:
//! - WAL (Write-Ahead Log) with CRC-checked records and replay
//! - Ordered operation channel feeding the background applier
//! - Per-collection document storage with caching and metadata
//! - Directory-swap transactions with crash recovery
//! - The [`Database`] facade tying the pipeline together

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod applier;
pub mod channel;
pub mod config;
pub mod database;
pub mod dir;
pub mod error;
pub mod index;
pub mod metadata;
pub mod query;
pub mod store;
pub mod transaction;
pub mod types;
pub mod wal;

pub use config::Config;
pub use database::{Collection, Database, TransactionScope};
pub use error::{CoreError, CoreResult};
pub use index::IndexDefinition;
pub use metadata::CollectionMetadata;
pub use query::{Filter, FindOptions, Order};
pub use types::{SegmentId, WalPosition};
pub use wal::{LoggedOperation, Operation};

// The document model is re-exported so most callers only need this
// crate.
pub use foliodb_codec::{Document, FieldSpec, FieldType, Schema};
