//! Applies logged operations to collection state.
//!
//! The applier is the only component that mutates collection storage.
//! It serves two phases: strict startup replay, where any failure
//! aborts the open, and the steady-state background loop, where a
//! failed operation is logged with its WAL coordinates and dropped
//! from the live view so one bad entry cannot wedge the pipeline. The
//! dropped entry stays in the WAL, so replay retries it on the next
//! open.

use crate::dir::validate_name;
use crate::error::{CoreError, CoreResult};
use crate::store::CollectionStore;
use crate::wal::{LoggedOperation, Operation, WalReplay};
use foliodb_codec::{Document, DocumentCodec, Schema};
use foliodb_storage::{AtomicWriter, FileSystem};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Tracks how far application has caught up with publication.
///
/// `flush` is the read-your-writes barrier: it blocks until every
/// operation published before the call has been applied (or dropped).
#[derive(Debug, Default)]
pub struct ApplyProgress {
    state: Mutex<Counters>,
    advanced: Condvar,
}

#[derive(Debug, Default)]
struct Counters {
    published: u64,
    applied: u64,
}

impl ApplyProgress {
    /// Records one published operation.
    pub fn record_published(&self) {
        self.state.lock().published += 1;
    }

    /// Records one consumed operation, applied or dropped.
    pub fn record_applied(&self) {
        let mut state = self.state.lock();
        state.applied += 1;
        self.advanced.notify_all();
    }

    /// Blocks until everything published before this call is applied.
    pub fn flush(&self) {
        let mut state = self.state.lock();
        let target = state.published;
        while state.applied < target {
            self.advanced.wait(&mut state);
        }
    }

    /// Like [`flush`](Self::flush) with a deadline; returns whether the
    /// barrier was reached.
    pub fn flush_timeout(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock();
        let target = state.published;
        while state.applied < target {
            let now = std::time::Instant::now();
            if now >= deadline {
                return false;
            }
            self.advanced.wait_for(&mut state, deadline - now);
        }
        true
    }
}

/// Owns the collection stores and applies operations to them.
pub struct StateApplier {
    fs: Arc<dyn FileSystem>,
    writer: Arc<AtomicWriter>,
    data_dir: PathBuf,
    cache_capacity: usize,
    cache_ttl: Duration,
    stores: RwLock<HashMap<String, Arc<CollectionStore>>>,
    schemas: RwLock<HashMap<String, Schema>>,
}

impl StateApplier {
    /// Creates an applier over the live data directory.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        writer: Arc<AtomicWriter>,
        data_dir: PathBuf,
        cache_capacity: usize,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            fs,
            writer,
            data_dir,
            cache_capacity,
            cache_ttl,
            stores: RwLock::new(HashMap::new()),
            schemas: RwLock::new(HashMap::new()),
        }
    }

    /// Registers a schema used when the named collection is first
    /// opened. A schema already persisted on disk still wins.
    pub fn register_schema(&self, collection: &str, schema: Schema) {
        self.schemas.write().insert(collection.to_string(), schema);
    }

    /// Returns the store for a collection, opening it on first use.
    pub fn store(&self, collection: &str) -> CoreResult<Arc<CollectionStore>> {
        if let Some(store) = self.stores.read().get(collection) {
            return Ok(Arc::clone(store));
        }

        let mut stores = self.stores.write();
        // Raced another opener between the read and write locks.
        if let Some(store) = stores.get(collection) {
            return Ok(Arc::clone(store));
        }

        let schema = self.schemas.read().get(collection).cloned();
        let store = Arc::new(CollectionStore::open(
            Arc::clone(&self.fs),
            Arc::clone(&self.writer),
            self.data_dir.join(collection),
            collection,
            schema,
            self.cache_capacity,
            self.cache_ttl,
        )?);
        stores.insert(collection.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// Returns the store only if the collection already exists, in
    /// memory or on disk. Read paths use this so a lookup in a
    /// never-created collection is a miss, not a create.
    pub fn existing_store(&self, collection: &str) -> CoreResult<Option<Arc<CollectionStore>>> {
        if self.stores.read().contains_key(collection) {
            return Ok(Some(self.store(collection)?));
        }
        validate_name("collection name", collection)?;
        if self.fs.exists(&self.data_dir.join(collection)) {
            return Ok(Some(self.store(collection)?));
        }
        Ok(None)
    }

    /// Returns the store for a collection that already exists.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CollectionNotFound`] if the collection has
    /// never been created or loaded.
    pub fn get_collection(&self, collection: &str) -> CoreResult<Arc<CollectionStore>> {
        self.existing_store(collection)?
            .ok_or_else(|| CoreError::collection_not_found(collection))
    }

    /// Validates a document against the collection's effective schema:
    /// the persisted one when the collection exists, otherwise the
    /// registered (or permissive) one. Never creates the collection, so
    /// a rejected document leaves no trace.
    pub fn validate_document(&self, collection: &str, document: &Document) -> CoreResult<()> {
        if let Some(store) = self.existing_store(collection)? {
            store.codec().encode(document)?;
            return Ok(());
        }
        let schema = self.schemas.read().get(collection).cloned().unwrap_or_default();
        DocumentCodec::new(schema).encode(document)?;
        Ok(())
    }

    /// Names of every loaded or on-disk collection.
    pub fn collection_names(&self) -> CoreResult<Vec<String>> {
        let mut names: Vec<String> = self
            .fs
            .list(&self.data_dir)?
            .into_iter()
            .filter(|n| !crate::dir::is_reserved_name(n))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Applies one operation to collection state.
    ///
    /// # Errors
    ///
    /// Any storage or validation failure is wrapped as an apply error
    /// naming the operation.
    pub fn apply(&self, operation: &Operation) -> CoreResult<()> {
        let store = self.store(operation.collection()).map_err(|e| {
            CoreError::apply(format!(
                "{} {}/{}: {e}",
                operation.tag(),
                operation.collection(),
                operation.id()
            ))
        })?;

        let result = match operation {
            Operation::Create { id, data, .. } | Operation::Update { id, data, .. } => {
                store.write(id, data).map(|_| ())
            }
            // Deleting an absent document is a no-op by the time the
            // applier sees it.
            Operation::Delete { id, .. } => store.remove(id).map(|_| ()),
        };

        result.map_err(|e| {
            CoreError::apply(format!(
                "{} {}/{}: {e}",
                operation.tag(),
                operation.collection(),
                operation.id()
            ))
        })
    }

    /// Replays the WAL strictly: the first corrupt or inapplicable
    /// entry aborts with an error. Returns the number of entries
    /// applied.
    pub fn replay(&self, replay: WalReplay) -> CoreResult<u64> {
        let mut applied = 0u64;
        for entry in replay {
            let entry = entry?;
            self.apply(&entry.operation)?;
            applied += 1;
        }
        if applied > 0 {
            tracing::info!(applied, "WAL replay complete");
        }
        Ok(applied)
    }

    /// Drops every open store so the next access reloads from disk.
    ///
    /// Called after a transaction swap replaces the live tree.
    pub fn reset(&self) {
        self.stores.write().clear();
    }
}

impl std::fmt::Debug for StateApplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateApplier")
            .field("data_dir", &self.data_dir)
            .field("open_stores", &self.stores.read().len())
            .finish_non_exhaustive()
    }
}

/// Starts the background thread that drains the operation channel.
///
/// The thread exits when the channel closes. A failing operation is
/// logged with its WAL coordinates and dropped from the live view;
/// progress advances either way so `flush` never hangs on a bad entry.
/// The WAL entry itself survives and is retried by replay on the next
/// open (unless a transaction commit checkpoints past it first).
pub fn spawn_consumer(
    applier: Arc<StateApplier>,
    receiver: Receiver<LoggedOperation>,
    progress: Arc<ApplyProgress>,
) -> CoreResult<JoinHandle<()>> {
    let handle = std::thread::Builder::new()
        .name("foliodb-apply".into())
        .spawn(move || {
            while let Ok(entry) = receiver.recv() {
                if let Err(e) = applier.apply(&entry.operation) {
                    tracing::error!(
                        position = %entry.position,
                        collection = entry.operation.collection(),
                        id = entry.operation.id(),
                        error = %e,
                        "dropping inapplicable operation"
                    );
                }
                progress.record_applied();
            }
        })?;
    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OperationChannel;
    use crate::types::{SegmentId, WalPosition};
    use crate::wal::WalManager;
    use foliodb_storage::{MemoryFileSystem, StorageError, StorageResult};
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn applier() -> Arc<StateApplier> {
        let fs: Arc<dyn FileSystem> = Arc::new(MemoryFileSystem::new());
        fs.create_dir_all(std::path::Path::new("/db/data")).unwrap();
        let writer = Arc::new(AtomicWriter::new(Arc::clone(&fs)));
        Arc::new(StateApplier::new(
            fs,
            writer,
            PathBuf::from("/db/data"),
            100,
            Duration::from_secs(60),
        ))
    }

    fn create(collection: &str, id: &str) -> Operation {
        Operation::Create {
            collection: collection.into(),
            id: id.into(),
            data: json!({"id": id, "name": "x"}).as_object().unwrap().clone(),
        }
    }

    #[test]
    fn apply_create_then_read() {
        let applier = applier();
        applier.apply(&create("users", "1")).unwrap();

        let store = applier.store("users").unwrap();
        assert!(store.read("1").unwrap().is_some());
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn apply_update_replaces() {
        let applier = applier();
        applier.apply(&create("users", "1")).unwrap();
        applier
            .apply(&Operation::Update {
                collection: "users".into(),
                id: "1".into(),
                data: json!({"id": "1", "name": "y"}).as_object().unwrap().clone(),
            })
            .unwrap();

        let store = applier.store("users").unwrap();
        assert_eq!(store.read("1").unwrap().unwrap()["name"], "y");
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn apply_delete_of_missing_is_ok() {
        let applier = applier();
        applier
            .apply(&Operation::Delete {
                collection: "users".into(),
                id: "ghost".into(),
            })
            .unwrap();
    }

    #[test]
    fn validate_document_does_not_create_collection() {
        let applier = applier();
        applier.register_schema(
            "users",
            Schema::new().required("name", foliodb_codec::FieldType::String),
        );

        let bad = json!({"id": "1", "name": 42}).as_object().unwrap().clone();
        assert!(applier.validate_document("users", &bad).is_err());

        let good = json!({"id": "1", "name": "x"}).as_object().unwrap().clone();
        applier.validate_document("users", &good).unwrap();

        assert!(applier.existing_store("users").unwrap().is_none());
        assert!(applier.collection_names().unwrap().is_empty());
    }

    #[test]
    fn existing_store_does_not_create() {
        let applier = applier();
        assert!(applier.existing_store("users").unwrap().is_none());

        applier.apply(&create("users", "1")).unwrap();
        assert!(applier.existing_store("users").unwrap().is_some());
    }

    #[test]
    fn get_collection_fails_for_unknown() {
        let applier = applier();
        let err = applier.get_collection("users").unwrap_err();
        assert!(matches!(err, crate::CoreError::CollectionNotFound { .. }));
        assert!(err.is_not_found());

        applier.apply(&create("users", "1")).unwrap();
        assert!(applier.get_collection("users").is_ok());
    }

    #[test]
    fn collection_names_skip_reserved() {
        let applier = applier();
        applier.apply(&create("users", "1")).unwrap();
        applier.apply(&create("orders", "1")).unwrap();

        assert_eq!(applier.collection_names().unwrap(), ["orders", "users"]);
    }

    #[test]
    fn apply_error_names_the_operation() {
        let applier = applier();
        let err = applier
            .apply(&Operation::Create {
                collection: "_internal".into(),
                id: "1".into(),
                data: json!({"id": "1"}).as_object().unwrap().clone(),
            })
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("CreateOp"));
        assert!(message.contains("_internal"));
    }

    #[test]
    fn consumer_applies_published_operations() {
        let applier = applier();
        let channel = OperationChannel::new();
        let progress = Arc::new(ApplyProgress::default());
        let handle = spawn_consumer(
            Arc::clone(&applier),
            channel.register_consumer(),
            Arc::clone(&progress),
        )
        .unwrap();

        for i in 0..5 {
            progress.record_published();
            channel.publish(LoggedOperation {
                operation: create("users", &i.to_string()),
                position: WalPosition::new(SegmentId::new(0), i),
            });
        }
        progress.flush();

        let store = applier.store("users").unwrap();
        assert_eq!(store.count(), 5);

        channel.close();
        handle.join().unwrap();
    }

    #[test]
    fn consumer_drops_bad_operation_and_continues() {
        let applier = applier();
        let channel = OperationChannel::new();
        let progress = Arc::new(ApplyProgress::default());
        let handle = spawn_consumer(
            Arc::clone(&applier),
            channel.register_consumer(),
            Arc::clone(&progress),
        )
        .unwrap();

        // Reserved collection name cannot be applied.
        progress.record_published();
        channel.publish(LoggedOperation {
            operation: create("_bad", "1"),
            position: WalPosition::new(SegmentId::new(0), 0),
        });
        progress.record_published();
        channel.publish(LoggedOperation {
            operation: create("users", "1"),
            position: WalPosition::new(SegmentId::new(0), 100),
        });
        progress.flush();

        let store = applier.store("users").unwrap();
        assert!(store.read("1").unwrap().is_some());

        channel.close();
        handle.join().unwrap();
    }

    /// Filesystem whose renames fail a fixed number of times.
    #[derive(Debug)]
    struct FlakyRenameFs {
        inner: MemoryFileSystem,
        failures_left: AtomicU32,
    }

    impl FileSystem for FlakyRenameFs {
        fn read(&self, path: &Path) -> StorageResult<Vec<u8>> {
            self.inner.read(path)
        }
        fn write(&self, path: &Path, data: &[u8]) -> StorageResult<()> {
            self.inner.write(path, data)
        }
        fn rename(&self, from: &Path, to: &Path) -> StorageResult<()> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "simulated rename failure",
                )));
            }
            self.inner.rename(from, to)
        }
        fn remove_file(&self, path: &Path) -> StorageResult<()> {
            self.inner.remove_file(path)
        }
        fn list(&self, dir: &Path) -> StorageResult<Vec<String>> {
            self.inner.list(dir)
        }
        fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path)
        }
        fn create_dir_all(&self, path: &Path) -> StorageResult<()> {
            self.inner.create_dir_all(path)
        }
        fn remove_dir_all(&self, path: &Path) -> StorageResult<()> {
            self.inner.remove_dir_all(path)
        }
        fn copy_dir(&self, from: &Path, to: &Path) -> StorageResult<()> {
            self.inner.copy_dir(from, to)
        }
        fn sync_dir(&self, path: &Path) -> StorageResult<()> {
            self.inner.sync_dir(path)
        }
    }

    #[test]
    fn dropped_operation_is_retried_by_replay() {
        let fs: Arc<dyn FileSystem> = Arc::new(FlakyRenameFs {
            inner: MemoryFileSystem::new(),
            failures_left: AtomicU32::new(1),
        });
        fs.create_dir_all(Path::new("/db/data")).unwrap();
        let writer = Arc::new(AtomicWriter::with_retry(
            Arc::clone(&fs),
            1,
            Duration::ZERO,
        ));
        let applier = Arc::new(StateApplier::new(
            Arc::clone(&fs),
            writer,
            PathBuf::from("/db/data"),
            100,
            Duration::from_secs(60),
        ));

        let temp = tempfile::tempdir().unwrap();
        let wal = WalManager::open(temp.path(), false, u64::MAX).unwrap();
        let position = wal.append(&create("users", "1")).unwrap();

        let channel = OperationChannel::new();
        let progress = Arc::new(ApplyProgress::default());
        let handle = spawn_consumer(
            Arc::clone(&applier),
            channel.register_consumer(),
            Arc::clone(&progress),
        )
        .unwrap();
        progress.record_published();
        channel.publish(LoggedOperation {
            operation: create("users", "1"),
            position,
        });
        progress.flush();
        channel.close();
        handle.join().unwrap();

        // The failed apply is dropped from the live view.
        assert!(applier.store("users").unwrap().read("1").unwrap().is_none());

        // Its WAL entry survives; the next open replays it successfully.
        let writer = Arc::new(AtomicWriter::new(Arc::clone(&fs)));
        let reopened = StateApplier::new(
            Arc::clone(&fs),
            writer,
            PathBuf::from("/db/data"),
            100,
            Duration::from_secs(60),
        );
        assert_eq!(reopened.replay(wal.replay().unwrap()).unwrap(), 1);
        assert!(reopened.store("users").unwrap().read("1").unwrap().is_some());
    }

    #[test]
    fn flush_with_nothing_published_returns() {
        let progress = ApplyProgress::default();
        progress.flush();
        assert!(progress.flush_timeout(Duration::from_millis(10)));
    }
}
