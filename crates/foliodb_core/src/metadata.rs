//! Per-collection metadata, persisted alongside the documents.
//!
//! Each collection directory carries a `_metadata.json` with the
//! collection's document count, timestamps, optional schema, and index
//! definitions. The file goes through the same atomic writer as the
//! documents, so readers never see a half-written state.

use crate::dir::METADATA_FILE;
use crate::error::CoreResult;
use crate::index::IndexDefinition;
use crate::types::unix_millis;
use foliodb_codec::Schema;
use foliodb_storage::{AtomicWriter, FileSystem};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Persistent description of one collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    /// Collection name.
    pub name: String,
    /// Number of live documents.
    pub document_count: u64,
    /// Creation time, milliseconds since the epoch.
    pub created_at: u64,
    /// Last mutation time, milliseconds since the epoch.
    pub updated_at: u64,
    /// Optional schema enforced on writes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Schema>,
    /// Registered secondary index definitions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDefinition>,
}

impl CollectionMetadata {
    fn new(name: String, schema: Option<Schema>) -> Self {
        let now = unix_millis();
        Self {
            name,
            document_count: 0,
            created_at: now,
            updated_at: now,
            schema,
            indexes: Vec::new(),
        }
    }
}

/// Owns and persists one collection's metadata.
pub struct MetadataStore {
    path: PathBuf,
    writer: Arc<AtomicWriter>,
    state: Mutex<CollectionMetadata>,
}

impl MetadataStore {
    /// Loads metadata from the collection directory, creating it if the
    /// file is absent.
    ///
    /// An existing file wins over the supplied schema; a supplied schema
    /// fills in a metadata file that has none.
    pub fn load_or_create(
        fs: &Arc<dyn FileSystem>,
        writer: Arc<AtomicWriter>,
        collection_dir: PathBuf,
        name: &str,
        schema: Option<Schema>,
    ) -> CoreResult<Self> {
        let path = collection_dir.join(METADATA_FILE);

        let metadata = match fs.read(&path) {
            Ok(bytes) => {
                let mut loaded: CollectionMetadata =
                    serde_json::from_slice(&bytes).map_err(foliodb_codec::CodecError::from)?;
                if loaded.schema.is_none() {
                    loaded.schema = schema;
                }
                loaded
            }
            Err(e) if e.is_not_found() => CollectionMetadata::new(name.to_string(), schema),
            Err(e) => return Err(e.into()),
        };

        let store = Self {
            path,
            writer,
            state: Mutex::new(metadata),
        };
        store.persist(&store.state.lock())?;
        Ok(store)
    }

    /// Returns a snapshot of the current metadata.
    #[must_use]
    pub fn snapshot(&self) -> CollectionMetadata {
        self.state.lock().clone()
    }

    /// Returns the live document count.
    #[must_use]
    pub fn document_count(&self) -> u64 {
        self.state.lock().document_count
    }

    /// Returns the schema enforced on writes, if any.
    #[must_use]
    pub fn schema(&self) -> Option<Schema> {
        self.state.lock().schema.clone()
    }

    /// Records a document write; `created` bumps the count.
    pub fn record_write(&self, created: bool) -> CoreResult<()> {
        let mut state = self.state.lock();
        if created {
            state.document_count += 1;
        }
        state.updated_at = unix_millis();
        self.persist(&state)
    }

    /// Records a document removal.
    pub fn record_delete(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.document_count = state.document_count.saturating_sub(1);
        state.updated_at = unix_millis();
        self.persist(&state)
    }

    /// Registers an index definition. Re-registering a field replaces
    /// its definition.
    pub fn add_index(&self, definition: IndexDefinition) -> CoreResult<()> {
        let mut state = self.state.lock();
        state.indexes.retain(|d| d.field != definition.field);
        state.indexes.push(definition);
        state.updated_at = unix_millis();
        self.persist(&state)
    }

    fn persist(&self, state: &CollectionMetadata) -> CoreResult<()> {
        let bytes =
            serde_json::to_vec_pretty(state).map_err(foliodb_codec::CodecError::from)?;
        self.writer.write(&self.path, &bytes)?;
        Ok(())
    }
}

impl std::fmt::Debug for MetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foliodb_storage::MemoryFileSystem;
    use std::path::Path;

    fn setup() -> (Arc<dyn FileSystem>, Arc<AtomicWriter>) {
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        let writer = Arc::new(AtomicWriter::new(Arc::clone(&fs)));
        (fs, writer)
    }

    fn open(fs: &Arc<dyn FileSystem>, writer: &Arc<AtomicWriter>) -> MetadataStore {
        fs.create_dir_all(Path::new("/db/data/users")).unwrap();
        MetadataStore::load_or_create(
            fs,
            Arc::clone(writer),
            PathBuf::from("/db/data/users"),
            "users",
            None,
        )
        .unwrap()
    }

    #[test]
    fn creates_fresh_metadata() {
        let (fs, writer) = setup();
        let store = open(&fs, &writer);

        let snapshot = store.snapshot();
        assert_eq!(snapshot.name, "users");
        assert_eq!(snapshot.document_count, 0);
        assert!(fs.exists(Path::new("/db/data/users/_metadata.json")));
    }

    #[test]
    fn counts_survive_reload() {
        let (fs, writer) = setup();
        {
            let store = open(&fs, &writer);
            store.record_write(true).unwrap();
            store.record_write(true).unwrap();
            store.record_write(false).unwrap();
            store.record_delete().unwrap();
        }

        let store = open(&fs, &writer);
        assert_eq!(store.document_count(), 1);
    }

    #[test]
    fn delete_never_underflows() {
        let (fs, writer) = setup();
        let store = open(&fs, &writer);
        store.record_delete().unwrap();
        assert_eq!(store.document_count(), 0);
    }

    #[test]
    fn index_registration_replaces_by_field() {
        let (fs, writer) = setup();
        let store = open(&fs, &writer);

        store.add_index(IndexDefinition::new("email")).unwrap();
        store
            .add_index(IndexDefinition::new("email").unique())
            .unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.indexes.len(), 1);
        assert!(snapshot.indexes[0].unique);
    }

    #[test]
    fn existing_schema_wins_over_supplied() {
        use foliodb_codec::Schema;

        let (fs, writer) = setup();
        fs.create_dir_all(Path::new("/db/data/users")).unwrap();

        let with_schema = Schema::new().required("name", foliodb_codec::FieldType::String);
        {
            MetadataStore::load_or_create(
                &fs,
                Arc::clone(&writer),
                PathBuf::from("/db/data/users"),
                "users",
                Some(with_schema.clone()),
            )
            .unwrap();
        }

        let store = MetadataStore::load_or_create(
            &fs,
            Arc::clone(&writer),
            PathBuf::from("/db/data/users"),
            "users",
            None,
        )
        .unwrap();
        assert_eq!(store.schema(), Some(with_schema));
    }
}
