//! # FolioDB Storage
//!
//! Filesystem primitives for FolioDB.
//!
//! This crate provides the lowest-level storage layer:
//!
//! - [`FileSystem`] - the whole-file filesystem contract consumed by the
//!   database core, with a distinguishable not-found reason on every
//!   fallible operation
//! - [`OsFileSystem`] - OS-backed persistent implementation
//! - [`MemoryFileSystem`] - in-memory implementation for testing
//! - [`AtomicWriter`] - per-filename serialized, coalescing temp-file +
//!   rename writer
//! - [`Cache`] - generic TTL + recency eviction cache
//!
//! ## Design Principles
//!
//! - Backends are whole-file stores; they do not interpret content
//! - No knowledge of FolioDB's collections, WAL, or schemas
//! - Must be `Send + Sync` for concurrent access
//!
//! ## Example
//!
//! ```
//! use foliodb_storage::{AtomicWriter, FileSystem, MemoryFileSystem};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! let fs = Arc::new(MemoryFileSystem::new());
//! let writer = AtomicWriter::new(fs.clone());
//! writer.write(Path::new("/db/doc.json"), b"{}").unwrap();
//! assert_eq!(fs.read(Path::new("/db/doc.json")).unwrap(), b"{}");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod cache;
mod error;
mod fs;
mod memory;
mod os;

pub use atomic::AtomicWriter;
pub use cache::Cache;
pub use error::{StorageError, StorageResult};
pub use fs::FileSystem;
pub use memory::MemoryFileSystem;
pub use os::OsFileSystem;
