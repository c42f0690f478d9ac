//! Per-collection document storage.
//!
//! One `CollectionStore` owns a collection directory: one `.json` file
//! per document, `_metadata.json` for the collection itself. Reads go
//! through a TTL cache; writes go through the coalescing atomic writer
//! and invalidate the cache so the next read observes the new file.

use crate::dir::{validate_name, DOCUMENT_EXTENSION};
use crate::error::CoreResult;
use crate::metadata::{CollectionMetadata, MetadataStore};
use crate::query::FindOptions;
use foliodb_codec::{Document, DocumentCodec, Schema};
use foliodb_storage::{AtomicWriter, Cache, FileSystem};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Stores one collection's documents on disk.
pub struct CollectionStore {
    name: String,
    dir: PathBuf,
    fs: Arc<dyn FileSystem>,
    writer: Arc<AtomicWriter>,
    cache: Cache<String, Document>,
    codec: DocumentCodec,
    metadata: MetadataStore,
}

impl CollectionStore {
    /// Opens (or initializes) a collection directory.
    ///
    /// A schema already persisted in the collection's metadata wins over
    /// the supplied one; no schema at all means permissive validation
    /// (only the `id` field is required).
    pub fn open(
        fs: Arc<dyn FileSystem>,
        writer: Arc<AtomicWriter>,
        dir: PathBuf,
        name: &str,
        schema: Option<Schema>,
        cache_capacity: usize,
        cache_ttl: Duration,
    ) -> CoreResult<Self> {
        validate_name("collection name", name)?;
        fs.create_dir_all(&dir)?;

        let metadata =
            MetadataStore::load_or_create(&fs, Arc::clone(&writer), dir.clone(), name, schema)?;
        let codec = DocumentCodec::new(metadata.schema().unwrap_or_default());

        Ok(Self {
            name: name.to_string(),
            dir,
            fs,
            writer,
            cache: Cache::new(cache_capacity, cache_ttl),
            codec,
            metadata,
        })
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the collection codec.
    #[must_use]
    pub fn codec(&self) -> &DocumentCodec {
        &self.codec
    }

    /// Returns a snapshot of the collection metadata.
    #[must_use]
    pub fn metadata(&self) -> CollectionMetadata {
        self.metadata.snapshot()
    }

    /// Returns the live document count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.metadata.document_count()
    }

    /// Grants access to the metadata store for index registration.
    #[must_use]
    pub(crate) fn metadata_store(&self) -> &MetadataStore {
        &self.metadata
    }

    fn document_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{DOCUMENT_EXTENSION}"))
    }

    /// Reads one document, or `None` if it does not exist.
    ///
    /// Cache hits skip the filesystem; misses decode the file and
    /// populate the cache.
    pub fn read(&self, id: &str) -> CoreResult<Option<Document>> {
        validate_name("document id", id)?;

        if let Some(cached) = self.cache.get(&id.to_string()) {
            return Ok(Some(cached));
        }

        let raw = match self.fs.read(&self.document_path(id)) {
            Ok(raw) => raw,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let document = self.codec.decode(&raw)?;
        self.cache.update(id.to_string(), document.clone());
        Ok(Some(document))
    }

    /// Validates and writes one document, replacing any previous
    /// version. Returns whether the document was newly created.
    pub fn write(&self, id: &str, document: &Document) -> CoreResult<bool> {
        validate_name("document id", id)?;
        let encoded = self.codec.encode(document)?;

        let path = self.document_path(id);
        let created = !self.fs.exists(&path);
        self.writer.write(&path, &encoded)?;

        // Invalidate rather than populate: the next read decodes what
        // actually landed on disk.
        self.cache.delete(&id.to_string());
        self.metadata.record_write(created)?;
        Ok(created)
    }

    /// Removes one document. Returns whether it existed.
    pub fn remove(&self, id: &str) -> CoreResult<bool> {
        validate_name("document id", id)?;
        self.cache.delete(&id.to_string());

        match self.fs.remove_file(&self.document_path(id)) {
            Ok(()) => {
                self.metadata.record_delete()?;
                Ok(true)
            }
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether a document exists, bypassing the cache.
    #[must_use]
    pub fn exists(&self, id: &str) -> bool {
        self.fs.exists(&self.document_path(id))
    }

    /// Reads every document in the collection.
    ///
    /// Internal (`_`-prefixed) and non-document entries are skipped, as
    /// are documents that vanish between listing and reading.
    pub fn read_all(&self) -> CoreResult<Vec<Document>> {
        let mut documents = Vec::new();
        for name in self.fs.list(&self.dir)? {
            let Some(id) = name.strip_suffix(&format!(".{DOCUMENT_EXTENSION}")) else {
                continue;
            };
            if crate::dir::is_reserved_name(id) {
                continue;
            }
            if let Some(document) = self.read(id)? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    /// Loads the collection and applies filter, order, and limit.
    pub fn find(&self, options: &FindOptions) -> CoreResult<Vec<Document>> {
        Ok(options.apply(self.read_all()?))
    }
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use foliodb_storage::MemoryFileSystem;
    use serde_json::json;
    use std::path::Path;

    fn store() -> CollectionStore {
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        let writer = Arc::new(AtomicWriter::new(Arc::clone(&fs)));
        CollectionStore::open(
            fs,
            writer,
            PathBuf::from("/db/data/users"),
            "users",
            None,
            100,
            Duration::from_secs(60),
        )
        .unwrap()
    }

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn write_then_read() {
        let store = store();
        let d = doc(json!({"id": "1", "name": "John", "age": 30}));

        assert!(store.write("1", &d).unwrap());
        assert_eq!(store.read("1").unwrap(), Some(d));
    }

    #[test]
    fn read_missing_is_none() {
        let store = store();
        assert_eq!(store.read("nope").unwrap(), None);
    }

    #[test]
    fn overwrite_is_not_a_create() {
        let store = store();
        let d = doc(json!({"id": "1", "name": "John"}));

        assert!(store.write("1", &d).unwrap());
        assert!(!store.write("1", &d).unwrap());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn remove_reports_existence() {
        let store = store();
        store
            .write("1", &doc(json!({"id": "1", "name": "x"})))
            .unwrap();

        assert!(store.remove("1").unwrap());
        assert!(!store.remove("1").unwrap());
        assert_eq!(store.read("1").unwrap(), None);
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn read_after_write_sees_latest() {
        let store = store();
        store
            .write("1", &doc(json!({"id": "1", "name": "old"})))
            .unwrap();
        assert!(store.read("1").unwrap().is_some());

        store
            .write("1", &doc(json!({"id": "1", "name": "new"})))
            .unwrap();
        assert_eq!(store.read("1").unwrap().unwrap()["name"], "new");
    }

    #[test]
    fn read_all_skips_metadata() {
        let store = store();
        store
            .write("1", &doc(json!({"id": "1", "name": "a"})))
            .unwrap();
        store
            .write("2", &doc(json!({"id": "2", "name": "b"})))
            .unwrap();

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn find_filters_documents() {
        let store = store();
        for (id, age) in [("1", 25), ("2", 30), ("3", 35), ("4", 30)] {
            store
                .write(id, &doc(json!({"id": id, "age": age})))
                .unwrap();
        }

        let results = store
            .find(&FindOptions::new().filter(Filter::eq("age", 30)))
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|d| d["age"] == 30));
    }

    #[test]
    fn schema_violation_rejected_on_write() {
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        let writer = Arc::new(AtomicWriter::new(Arc::clone(&fs)));
        let schema = Schema::new().required("name", foliodb_codec::FieldType::String);
        let store = CollectionStore::open(
            fs,
            writer,
            PathBuf::from("/db/data/users"),
            "users",
            Some(schema),
            100,
            Duration::from_secs(60),
        )
        .unwrap();

        let invalid = doc(json!({"id": "1", "name": 42}));
        assert!(store.write("1", &invalid).is_err());
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn invalid_id_rejected() {
        let store = store();
        assert!(store.read("../escape").is_err());
        assert!(store
            .write("_internal", &doc(json!({"id": "_internal"})))
            .is_err());
    }

    #[test]
    fn document_lands_on_disk() {
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        let writer = Arc::new(AtomicWriter::new(Arc::clone(&fs)));
        let store = CollectionStore::open(
            Arc::clone(&fs),
            writer,
            PathBuf::from("/db/data/users"),
            "users",
            None,
            100,
            Duration::from_secs(60),
        )
        .unwrap();

        store
            .write("1", &doc(json!({"id": "1", "name": "x"})))
            .unwrap();
        assert!(fs.exists(Path::new("/db/data/users/1.json")));
    }
}
