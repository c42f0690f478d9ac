//! Database facade wiring the durability pipeline together.
//!
//! A mutation travels: validate -> WAL append (durable) -> operation
//! channel -> background applier -> collection storage. The WAL append
//! is the acknowledgement point; application to the live tree is
//! asynchronous, with [`Database::flush`] as the read-your-writes
//! barrier.

use crate::applier::{spawn_consumer, ApplyProgress, StateApplier};
use crate::channel::OperationChannel;
use crate::config::Config;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::metadata::CollectionMetadata;
use crate::query::FindOptions;
use crate::transaction::TransactionManager;
use crate::types::{SegmentId, WalPosition};
use crate::wal::{LoggedOperation, Operation, WalManager};
use crate::index::IndexDefinition;
use foliodb_codec::{document_id, Document, Schema};
use foliodb_storage::{AtomicWriter, FileSystem, OsFileSystem};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread::JoinHandle;

struct DatabaseInner {
    // Held for the exclusive lock.
    _dir: DatabaseDir,
    fs: Arc<dyn FileSystem>,
    wal: WalManager,
    channel: OperationChannel,
    applier: Arc<StateApplier>,
    progress: Arc<ApplyProgress>,
    transactions: TransactionManager,
    consumer: Mutex<Option<JoinHandle<()>>>,
    config: Config,
}

/// An embedded, WAL-backed JSON document database.
///
/// Cloning the handle is cheap; all clones share one pipeline.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Opens a database directory with default configuration.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a database directory.
    ///
    /// Acquires the exclusive lock, resolves any interrupted
    /// transaction swap, strictly replays the WAL, and starts the
    /// background applier.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::DatabaseLocked`] if another handle owns the
    /// directory, and surfaces WAL corruption or replay failures.
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = DatabaseDir::open(path, config.create_if_missing)?;
        let fs: Arc<dyn FileSystem> = Arc::new(OsFileSystem::new());

        let transactions = TransactionManager::new(
            Arc::clone(&fs),
            dir.root().to_path_buf(),
            dir.data_dir(),
            dir.staging_dir(),
        );
        transactions.recover_layout()?;

        let writer = Arc::new(AtomicWriter::with_retry(
            Arc::clone(&fs),
            config.rename_retry_budget,
            config.rename_retry_backoff,
        ));
        let applier = Arc::new(StateApplier::new(
            Arc::clone(&fs),
            writer,
            dir.data_dir(),
            config.cache_capacity,
            config.cache_ttl,
        ));

        let wal = WalManager::open(&dir.wal_dir(), config.sync_on_write, config.max_segment_size)?;
        applier.replay(wal.replay()?)?;

        let channel = OperationChannel::new();
        let progress = Arc::new(ApplyProgress::default());
        let consumer = spawn_consumer(
            Arc::clone(&applier),
            channel.register_consumer(),
            Arc::clone(&progress),
        )?;

        tracing::info!(path = %path.display(), "database open");
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                _dir: dir,
                fs,
                wal,
                channel,
                applier,
                progress,
                transactions,
                consumer: Mutex::new(Some(consumer)),
                config,
            }),
        })
    }

    /// Returns a handle to a collection, creating it lazily on first
    /// write.
    #[must_use]
    pub fn collection(&self, name: &str) -> Collection {
        Collection {
            name: name.to_string(),
            inner: Arc::clone(&self.inner),
        }
    }

    /// Like [`collection`](Self::collection), registering a schema
    /// enforced on every write. A schema already persisted for the
    /// collection wins over the one supplied here.
    #[must_use]
    pub fn collection_with_schema(&self, name: &str, schema: Schema) -> Collection {
        self.inner.applier.register_schema(name, schema);
        self.collection(name)
    }

    /// Names of every existing collection.
    pub fn list_collections(&self) -> CoreResult<Vec<String>> {
        self.inner.applier.collection_names()
    }

    /// Subscribes to every operation acknowledged from here on.
    pub fn subscribe(&self) -> Receiver<LoggedOperation> {
        self.inner.channel.subscribe()
    }

    /// Blocks until every acknowledged operation is visible to reads.
    pub fn flush(&self) {
        self.inner.progress.flush();
    }

    /// Deletes WAL segments numbered `<= up_to`.
    ///
    /// Drains the pipeline first so no unapplied entry is discarded.
    pub fn checkpoint(&self, up_to: SegmentId) -> CoreResult<()> {
        self.flush();
        self.inner.wal.checkpoint(up_to)
    }

    /// Returns the WAL segment currently being appended to.
    #[must_use]
    pub fn current_segment(&self) -> SegmentId {
        self.inner.wal.current_segment()
    }

    /// Runs `work` in a directory-swap transaction.
    ///
    /// The pipeline is drained first so the staged copy starts from a
    /// settled tree. `work` mutates an isolated copy through its
    /// [`TransactionScope`]; commit makes every staged change visible
    /// at once, and any failure leaves the live tree untouched.
    ///
    /// Commit also retires the WAL up to the drain point: the swap
    /// bypasses the WAL, so entries appended before it describe a
    /// superseded tree and must not be replayed over the committed one.
    pub fn with_transaction<T>(
        &self,
        work: impl FnOnce(&TransactionScope) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.flush();
        let segment_at_flush = self.inner.wal.current_segment();

        let inner = &self.inner;
        let value = inner.transactions.run(|staging| {
            let scope = TransactionScope {
                applier: StateApplier::new(
                    Arc::clone(&inner.fs),
                    Arc::new(AtomicWriter::with_retry(
                        Arc::clone(&inner.fs),
                        inner.config.rename_retry_budget,
                        inner.config.rename_retry_backoff,
                    )),
                    staging.to_path_buf(),
                    inner.config.cache_capacity,
                    inner.config.cache_ttl,
                ),
            };
            work(&scope)
        })?;

        // The live tree was just replaced wholesale; open stores point
        // at the superseded one.
        inner.applier.reset();

        // Everything drained before the swap is already reflected in
        // (or superseded by) the committed tree. Replaying it on the
        // next open would roll committed changes back.
        self.flush();
        inner.wal.checkpoint(segment_at_flush)?;
        Ok(value)
    }

    /// Shuts the pipeline down: drains pending operations, stops the
    /// applier thread, and releases the lock on drop of the last
    /// handle.
    pub fn close(&self) {
        self.flush();
        self.inner.channel.close();
        if let Some(handle) = self.inner.consumer.lock().take() {
            if handle.join().is_err() {
                tracing::error!("applier thread panicked during shutdown");
            }
        }
        tracing::info!("database closed");
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        self.channel.close();
        if let Some(handle) = self.consumer.lock().take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("root", &self.inner._dir.root())
            .finish_non_exhaustive()
    }
}

/// Handle to one collection of a [`Database`].
#[derive(Clone)]
pub struct Collection {
    name: String,
    inner: Arc<DatabaseInner>,
}

impl Collection {
    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Creates a document. The `id` field names the document; creating
    /// an id that already exists replaces it.
    ///
    /// Returns once the operation is durable in the WAL. Visibility to
    /// reads follows asynchronously; use [`Database::flush`] to wait.
    ///
    /// # Errors
    ///
    /// Validation failures (missing `id`, schema violation) are
    /// rejected before anything is logged.
    pub fn create(&self, document: Document) -> CoreResult<WalPosition> {
        let id = self.validate(&document)?;
        self.log_and_publish(Operation::Create {
            collection: self.name.clone(),
            id,
            data: document,
        })
    }

    /// Replaces a document wholesale.
    pub fn update(&self, document: Document) -> CoreResult<WalPosition> {
        let id = self.validate(&document)?;
        self.log_and_publish(Operation::Update {
            collection: self.name.clone(),
            id,
            data: document,
        })
    }

    /// Removes a document. Removing an id that does not exist is
    /// acknowledged and applies as a no-op.
    pub fn remove(&self, id: &str) -> CoreResult<WalPosition> {
        crate::dir::validate_name("document id", id)?;
        self.log_and_publish(Operation::Delete {
            collection: self.name.clone(),
            id: id.to_string(),
        })
    }

    /// Reads one document; `None` when the document or the whole
    /// collection does not exist.
    pub fn find_by_id(&self, id: &str) -> CoreResult<Option<Document>> {
        match self.inner.applier.existing_store(&self.name)? {
            Some(store) => store.read(id),
            None => Ok(None),
        }
    }

    /// Loads the collection and applies filter, order, and limit.
    pub fn find(&self, options: &FindOptions) -> CoreResult<Vec<Document>> {
        match self.inner.applier.existing_store(&self.name)? {
            Some(store) => store.find(options),
            None => Ok(Vec::new()),
        }
    }

    /// Returns the live document count (0 for an absent collection).
    pub fn count(&self) -> CoreResult<u64> {
        Ok(self
            .inner
            .applier
            .existing_store(&self.name)?
            .map_or(0, |store| store.count()))
    }

    /// Returns the collection metadata, if the collection exists.
    pub fn metadata(&self) -> CoreResult<Option<CollectionMetadata>> {
        Ok(self
            .inner
            .applier
            .existing_store(&self.name)?
            .map(|store| store.metadata()))
    }

    /// Registers a secondary index definition in the collection
    /// metadata. Definitions are recorded and listed; no index data
    /// structures are maintained.
    pub fn add_index(&self, definition: IndexDefinition) -> CoreResult<()> {
        let store = self.inner.applier.store(&self.name)?;
        store.metadata_store().add_index(definition)
    }

    /// Fail-fast validation: schema problems surface here, before the
    /// operation is acknowledged. A rejected document must not leave a
    /// trace, so nothing is materialized on disk.
    fn validate(&self, document: &Document) -> CoreResult<String> {
        let id = document_id(document)?.to_string();
        crate::dir::validate_name("document id", &id)?;
        self.inner.applier.validate_document(&self.name, document)?;
        Ok(id)
    }

    fn log_and_publish(&self, operation: Operation) -> CoreResult<WalPosition> {
        let position = self.inner.wal.append(&operation)?;
        self.inner.progress.record_published();
        self.inner.channel.publish(LoggedOperation {
            operation,
            position,
        });
        Ok(position)
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Access to the staged data tree inside a transaction.
///
/// Mutations here bypass the WAL: durability comes from the commit
/// swap itself, all-or-nothing.
pub struct TransactionScope {
    applier: StateApplier,
}

impl TransactionScope {
    /// Creates or replaces a document in the staged tree.
    pub fn create(&self, collection: &str, document: Document) -> CoreResult<()> {
        let id = document_id(&document)?.to_string();
        let store = self.applier.store(collection)?;
        store.write(&id, &document)?;
        Ok(())
    }

    /// Replaces a document in the staged tree.
    pub fn update(&self, collection: &str, document: Document) -> CoreResult<()> {
        self.create(collection, document)
    }

    /// Removes a document from the staged tree.
    pub fn remove(&self, collection: &str, id: &str) -> CoreResult<bool> {
        let store = self.applier.store(collection)?;
        store.remove(id)
    }

    /// Reads a document from the staged tree.
    pub fn find_by_id(&self, collection: &str, id: &str) -> CoreResult<Option<Document>> {
        match self.applier.existing_store(collection)? {
            Some(store) => store.read(id),
            None => Ok(None),
        }
    }

    /// Aborts the transaction with a reason.
    pub fn abort<T>(&self, reason: impl Into<String>) -> CoreResult<T> {
        Err(CoreError::transaction_aborted(reason.into()))
    }
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn doc(value: serde_json::Value) -> Document {
        value.as_object().unwrap().clone()
    }

    fn test_config() -> Config {
        // Tests don't need every append fsynced.
        Config::new().sync_on_write(false)
    }

    #[test]
    fn create_then_read_after_flush() {
        let temp = tempdir().unwrap();
        let db = Database::open_with_config(&temp.path().join("db"), test_config()).unwrap();
        let users = db.collection("users");

        users
            .create(doc(json!({"id": "1", "name": "John", "age": 30})))
            .unwrap();
        db.flush();

        let found = users.find_by_id("1").unwrap().unwrap();
        assert_eq!(found["name"], "John");
        assert_eq!(found["age"], 30);
        db.close();
    }

    #[test]
    fn read_from_absent_collection_is_none() {
        let temp = tempdir().unwrap();
        let db = Database::open_with_config(&temp.path().join("db"), test_config()).unwrap();

        assert_eq!(db.collection("ghosts").find_by_id("1").unwrap(), None);
        assert_eq!(db.collection("ghosts").count().unwrap(), 0);
        db.close();
    }

    #[test]
    fn create_without_id_is_rejected_before_logging() {
        let temp = tempdir().unwrap();
        let db = Database::open_with_config(&temp.path().join("db"), test_config()).unwrap();

        let err = db
            .collection("users")
            .create(doc(json!({"name": "no id"})))
            .unwrap_err();
        assert!(matches!(err, CoreError::Codec(_)));
        db.close();
    }

    #[test]
    fn schema_violations_fail_fast() {
        let temp = tempdir().unwrap();
        let db = Database::open_with_config(&temp.path().join("db"), test_config()).unwrap();
        let users = db.collection_with_schema(
            "users",
            Schema::new().required("name", foliodb_codec::FieldType::String),
        );

        assert!(users.create(doc(json!({"id": "1", "name": 42}))).is_err());
        db.flush();
        assert_eq!(users.count().unwrap(), 0);
        // The rejected create must not materialize the collection.
        assert!(db.list_collections().unwrap().is_empty());
        db.close();
    }

    #[test]
    fn second_open_is_locked_out() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");
        let db = Database::open_with_config(&path, test_config()).unwrap();

        let second = Database::open_with_config(&path, test_config());
        assert!(matches!(second, Err(CoreError::DatabaseLocked)));
        db.close();
    }

    #[test]
    fn state_survives_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");

        {
            let db = Database::open_with_config(&path, test_config()).unwrap();
            let users = db.collection("users");
            users.create(doc(json!({"id": "1", "name": "a"}))).unwrap();
            users.create(doc(json!({"id": "2", "name": "b"}))).unwrap();
            users.remove("1").unwrap();
            db.close();
        }

        let db = Database::open_with_config(&path, test_config()).unwrap();
        let users = db.collection("users");
        assert_eq!(users.find_by_id("1").unwrap(), None);
        assert!(users.find_by_id("2").unwrap().is_some());
        db.close();
    }

    #[test]
    fn subscribe_observes_operations() {
        let temp = tempdir().unwrap();
        let db = Database::open_with_config(&temp.path().join("db"), test_config()).unwrap();
        let rx = db.subscribe();

        db.collection("users")
            .create(doc(json!({"id": "1", "name": "x"})))
            .unwrap();

        let entry = rx.recv().unwrap();
        assert_eq!(entry.operation.collection(), "users");
        assert_eq!(entry.operation.id(), "1");
        db.close();
    }

    #[test]
    fn transaction_commit_is_atomic() {
        let temp = tempdir().unwrap();
        let db = Database::open_with_config(&temp.path().join("db"), test_config()).unwrap();
        db.collection("users")
            .create(doc(json!({"id": "1", "name": "old"})))
            .unwrap();

        db.with_transaction(|tx| {
            tx.update("users", doc(json!({"id": "1", "name": "new"})))?;
            tx.create("users", doc(json!({"id": "2", "name": "added"})))?;
            Ok(())
        })
        .unwrap();

        let users = db.collection("users");
        assert_eq!(users.find_by_id("1").unwrap().unwrap()["name"], "new");
        assert!(users.find_by_id("2").unwrap().is_some());
        db.close();
    }

    #[test]
    fn committed_transaction_survives_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");

        {
            let db = Database::open_with_config(&path, test_config()).unwrap();
            let users = db.collection("users");
            users.create(doc(json!({"id": "1", "name": "old"}))).unwrap();
            users.create(doc(json!({"id": "3", "name": "doomed"}))).unwrap();

            db.with_transaction(|tx| {
                tx.update("users", doc(json!({"id": "1", "name": "new"})))?;
                tx.create("users", doc(json!({"id": "2", "name": "added"})))?;
                tx.remove("users", "3")?;
                Ok(())
            })
            .unwrap();
            db.close();
        }

        // Replay must not roll the committed swap back to the
        // pre-transaction WAL entries.
        let db = Database::open_with_config(&path, test_config()).unwrap();
        let users = db.collection("users");
        assert_eq!(users.find_by_id("1").unwrap().unwrap()["name"], "new");
        assert!(users.find_by_id("2").unwrap().is_some());
        assert_eq!(users.find_by_id("3").unwrap(), None);
        db.close();
    }

    #[test]
    fn writes_after_transaction_survive_reopen() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");

        {
            let db = Database::open_with_config(&path, test_config()).unwrap();
            db.collection("users")
                .create(doc(json!({"id": "1", "name": "a"})))
                .unwrap();
            db.with_transaction(|tx| {
                tx.create("users", doc(json!({"id": "2", "name": "b"})))
            })
            .unwrap();
            db.collection("users")
                .create(doc(json!({"id": "3", "name": "c"})))
                .unwrap();
            db.close();
        }

        let db = Database::open_with_config(&path, test_config()).unwrap();
        assert_eq!(db.collection("users").count().unwrap(), 3);
        db.close();
    }

    #[test]
    fn failed_transaction_changes_nothing() {
        let temp = tempdir().unwrap();
        let db = Database::open_with_config(&temp.path().join("db"), test_config()).unwrap();
        db.collection("users")
            .create(doc(json!({"id": "1", "name": "old"})))
            .unwrap();

        let result: CoreResult<()> = db.with_transaction(|tx| {
            tx.update("users", doc(json!({"id": "1", "name": "new"})))?;
            tx.abort("changed my mind")
        });

        assert!(matches!(result, Err(CoreError::TransactionAborted { .. })));
        let users = db.collection("users");
        assert_eq!(users.find_by_id("1").unwrap().unwrap()["name"], "old");
        db.close();
    }

    #[test]
    fn checkpoint_trims_replay() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("db");
        let config = test_config().max_segment_size(64);

        {
            let db = Database::open_with_config(&path, config.clone()).unwrap();
            let users = db.collection("users");
            for i in 0..8 {
                users
                    .create(doc(json!({"id": i.to_string(), "name": "x"})))
                    .unwrap();
            }
            let current = db.current_segment();
            assert!(current > SegmentId::new(0));
            db.checkpoint(SegmentId::new(current.as_u64() - 1)).unwrap();
            db.close();
        }

        // Replay after checkpoint still reconstructs full state from
        // the applied tree plus the surviving tail.
        let db = Database::open_with_config(&path, config).unwrap();
        assert_eq!(db.collection("users").count().unwrap(), 8);
        db.close();
    }

    #[test]
    fn list_collections() {
        let temp = tempdir().unwrap();
        let db = Database::open_with_config(&temp.path().join("db"), test_config()).unwrap();
        db.collection("users")
            .create(doc(json!({"id": "1"})))
            .unwrap();
        db.collection("orders")
            .create(doc(json!({"id": "1"})))
            .unwrap();
        db.flush();

        assert_eq!(db.list_collections().unwrap(), ["orders", "users"]);
        db.close();
    }
}
