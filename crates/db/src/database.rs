//! Database handles bound to, or independent of, an open transaction

use std::{fmt, sync::Arc};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    config::DbConfig,
    error::DbError,
    store::Store,
    txn::{CommitHook, Txn},
};

/// Errors that may carry a store error and can therefore be retried.
pub trait RetryableError: From<DbError> {
    /// The store error carried by this error, if any
    fn db_error(&self) -> Option<DbError>;

    /// Whether the operation failed on an optimistic conflict
    fn is_conflict(&self) -> bool {
        self.db_error() == Some(DbError::Conflict)
    }

    /// Whether the operation exceeded the transaction write budget
    fn is_txn_too_big(&self) -> bool {
        self.db_error() == Some(DbError::TxnTooBig)
    }
}

impl RetryableError for DbError {
    fn db_error(&self) -> Option<DbError> {
        Some(*self)
    }
}

/// Options for [`Database::begin_transaction`]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxOptions {
    /// Open a snapshot that rejects writes
    pub read_only: bool,
}

impl TxOptions {
    /// Read-only transaction options
    pub const fn read_only() -> Self {
        Self { read_only: true }
    }
}

type SharedTxn = Arc<Mutex<Txn>>;

/// Commits or rolls back a transaction opened by [`Database::begin_transaction`].
///
/// A controller returned for a nested begin owns nothing: its commit and
/// rollback are no-ops and the outer controller decides. Dropping an owning
/// controller without committing rolls the transaction back.
pub struct TxController {
    txn: Option<SharedTxn>,
}

impl fmt::Debug for TxController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxController")
            .field("owning", &self.txn.is_some())
            .finish()
    }
}

impl TxController {
    const fn nested() -> Self {
        Self { txn: None }
    }

    /// Whether this controller ends the transaction it belongs to
    pub const fn is_owning(&self) -> bool {
        self.txn.is_some()
    }

    /// Commit the transaction
    pub fn commit(mut self) -> Result<(), DbError> {
        match self.txn.take() {
            Some(txn) => txn.lock().commit(),
            None => Ok(()),
        }
    }

    /// Discard the transaction
    pub fn rollback(mut self) {
        if let Some(txn) = self.txn.take() {
            txn.lock().discard();
        }
    }
}

impl Drop for TxController {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            txn.lock().discard();
        }
    }
}

/// A handle onto the store, optionally bound to an open transaction.
///
/// Every operation of a bound handle joins its transaction. An unbound handle
/// runs each `view` and `update` in a transaction of its own.
#[derive(Clone)]
pub struct Database {
    store: Store,
    txn: Option<SharedTxn>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("store", &self.store)
            .field("in_transaction", &self.txn.is_some())
            .finish()
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new(DbConfig::default())
    }
}

impl Database {
    /// Open an empty database
    pub fn new(config: DbConfig) -> Self {
        Self {
            store: Store::new(config),
            txn: None,
        }
    }

    /// Underlying store
    pub const fn store(&self) -> &Store {
        &self.store
    }

    /// Store configuration
    pub fn config(&self) -> &DbConfig {
        self.store.config()
    }

    /// Whether this handle is bound to an open transaction
    pub const fn is_in_transaction(&self) -> bool {
        self.txn.is_some()
    }

    /// Another unbound handle onto the same data
    pub fn new_connection(&self) -> Self {
        Self {
            store: self.store.clone(),
            txn: None,
        }
    }

    /// Run `f` against the bound transaction or a fresh read-only snapshot.
    ///
    /// `f` must not call back into this handle.
    pub fn view<T, E>(&self, f: impl FnOnce(&Txn) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        match &self.txn {
            Some(txn) => {
                let guard = txn.lock();
                guard.ensure_open()?;
                f(&*guard)
            }
            None => {
                let txn = self.store.begin(false);
                f(&txn)
            }
        }
    }

    /// Run `f` against the bound transaction, or against a fresh transaction
    /// that is committed when `f` succeeds.
    ///
    /// `f` must not call back into this handle.
    pub fn update<T, E>(&self, f: impl FnOnce(&mut Txn) -> Result<T, E>) -> Result<T, E>
    where
        E: From<DbError>,
    {
        match &self.txn {
            Some(txn) => {
                let mut guard = txn.lock();
                guard.ensure_open()?;
                f(&mut *guard)
            }
            None => {
                let mut txn = self.store.begin(true);
                let value = f(&mut txn)?;
                txn.commit()?;
                Ok(value)
            }
        }
    }

    /// Open a transaction and return its controller with a handle bound to it.
    ///
    /// A handle that is already bound hands out itself and a non-owning
    /// controller, so nested code joins the outer transaction.
    pub fn begin_transaction(&self, options: TxOptions) -> (TxController, Self) {
        if self.txn.is_some() {
            return (TxController::nested(), self.clone());
        }
        let txn = Arc::new(Mutex::new(self.store.begin(!options.read_only)));
        let controller = TxController {
            txn: Some(Arc::clone(&txn)),
        };
        let database = Self {
            store: self.store.clone(),
            txn: Some(txn),
        };
        (controller, database)
    }

    /// Run `f` in a transaction and commit it.
    ///
    /// At the top level a conflicting commit reruns `f` in a new transaction,
    /// up to `max_conflict_retries` times. Nested calls join the outer
    /// transaction and leave retrying to it.
    pub fn execute_in_transaction<T, E, F>(&self, options: TxOptions, mut f: F) -> Result<T, E>
    where
        E: RetryableError,
        F: FnMut(&Self) -> Result<T, E>,
    {
        if self.txn.is_some() {
            return f(self);
        }

        let max_retries = self.config().max_conflict_retries;
        let mut attempt = 0;
        loop {
            let (controller, database) = self.begin_transaction(options);
            let result = f(&database).and_then(|value| {
                controller.commit()?;
                Ok(value)
            });
            match result {
                Err(err) if err.is_conflict() && attempt < max_retries => {
                    attempt += 1;
                    warn!(attempt, max_retries, "Transaction conflict, retrying");
                }
                result => return result,
            }
        }
    }

    /// Run `f` and undo its writes if it fails.
    ///
    /// On an unbound handle this opens a transaction that commits only when
    /// `f` succeeds.
    pub fn with_savepoint<T, E, F>(&self, f: F) -> Result<T, E>
    where
        E: From<DbError>,
        F: FnOnce(&Self) -> Result<T, E>,
    {
        let Some(txn) = &self.txn else {
            let (controller, database) = self.begin_transaction(TxOptions::default());
            let value = f(&database)?;
            controller.commit()?;
            return Ok(value);
        };

        let savepoint = txn.lock().savepoint();
        let result = f(self);
        if result.is_err() {
            debug!("Rolling back to savepoint");
            txn.lock().rollback_to(savepoint);
        }
        result
    }

    /// Run `hook` after the bound transaction commits, or right away on an
    /// unbound handle.
    pub fn after_commit(&self, hook: CommitHook) {
        match &self.txn {
            Some(txn) => txn.lock().on_commit(hook),
            None => hook(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        cell::Cell,
        sync::atomic::{AtomicUsize, Ordering},
    };

    fn read(db: &Database, key: &[u8]) -> Option<Vec<u8>> {
        db.view(|txn| txn.get(key)).unwrap()
    }

    #[test]
    fn test_update_and_view() {
        let db = Database::default();
        db.update(|txn| txn.upsert(b"a", vec![1])).unwrap();
        assert_eq!(read(&db, b"a"), Some(vec![1]));
        assert_eq!(read(&db.new_connection(), b"a"), Some(vec![1]));
    }

    #[test]
    fn test_failed_update_is_not_committed() {
        let db = Database::default();
        let result: Result<(), DbError> = db.update(|txn| {
            txn.upsert(b"a", vec![1])?;
            Err(DbError::KeyExists)
        });
        assert_eq!(result, Err(DbError::KeyExists));
        assert_eq!(read(&db, b"a"), None);
    }

    #[test]
    fn test_retry_on_conflict() {
        let db = Database::default();
        db.update(|txn| txn.upsert(b"counter", vec![0])).unwrap();

        let attempts = Cell::new(0);
        db.execute_in_transaction(TxOptions::default(), |tx_db| {
            attempts.set(attempts.get() + 1);
            let value = tx_db.view(|txn| txn.get(b"counter"))?.unwrap_or_default();
            if attempts.get() == 1 {
                db.new_connection()
                    .update(|txn| txn.upsert(b"counter", vec![7]))?;
            }
            tx_db.update(|txn| txn.upsert(b"copy", value))
        })
        .unwrap();

        assert_eq!(attempts.get(), 2);
        assert_eq!(read(&db, b"copy"), Some(vec![7]));
    }

    #[test]
    fn test_retries_are_bounded() {
        let config = DbConfig {
            max_conflict_retries: 2,
            ..DbConfig::default()
        };
        let db = Database::new(config);

        let attempts = Cell::new(0);
        let result = db.execute_in_transaction(TxOptions::default(), |tx_db| {
            attempts.set(attempts.get() + 1);
            tx_db.view(|txn| txn.get(b"k"))?;
            db.new_connection()
                .update(|txn| txn.upsert(b"k", vec![attempts.get()]))?;
            tx_db.update(|txn| txn.upsert(b"other", vec![]))
        });

        assert_eq!(result, Err(DbError::Conflict));
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_read_only_snapshot_with_concurrent_writer() {
        let db = Database::default();
        db.update(|txn| txn.upsert(b"k", vec![0])).unwrap();

        let attempts = Cell::new(0);
        let value = db
            .execute_in_transaction(TxOptions::read_only(), |tx_db| {
                attempts.set(attempts.get() + 1);
                let value = tx_db.view(|txn| txn.get(b"k"))?;
                db.new_connection()
                    .update(|txn| txn.upsert(b"k", vec![attempts.get()]))?;
                Ok::<_, DbError>(value)
            })
            .unwrap();

        assert_eq!(attempts.get(), 1);
        assert_eq!(value, Some(vec![0]));
        assert_eq!(read(&db, b"k"), Some(vec![1]));
    }

    #[test]
    fn test_nested_transaction_joins_outer() {
        let db = Database::default();
        let (outer, tx_db) = db.begin_transaction(TxOptions::default());

        let (inner, nested_db) = tx_db.begin_transaction(TxOptions::default());
        assert!(!inner.is_owning());
        nested_db.update(|txn| txn.upsert(b"a", vec![1])).unwrap();
        inner.commit().unwrap();

        assert_eq!(read(&db, b"a"), None);
        outer.commit().unwrap();
        assert_eq!(read(&db, b"a"), Some(vec![1]));
    }

    #[test]
    fn test_dropped_controller_rolls_back() {
        let db = Database::default();
        {
            let (_controller, tx_db) = db.begin_transaction(TxOptions::default());
            tx_db.update(|txn| txn.upsert(b"a", vec![1])).unwrap();
        }
        assert_eq!(read(&db, b"a"), None);
    }

    #[test]
    fn test_after_commit_hooks() {
        let db = Database::default();
        let runs = Arc::new(AtomicUsize::new(0));

        let (controller, tx_db) = db.begin_transaction(TxOptions::default());
        let counter = Arc::clone(&runs);
        tx_db.after_commit(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        controller.rollback();
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        let (controller, tx_db) = db.begin_transaction(TxOptions::default());
        let counter = Arc::clone(&runs);
        tx_db.after_commit(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        controller.commit().unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        let counter = Arc::clone(&runs);
        db.after_commit(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_with_savepoint_rolls_back_on_error() {
        let db = Database::default();
        let (controller, tx_db) = db.begin_transaction(TxOptions::default());
        tx_db.update(|txn| txn.upsert(b"kept", vec![1])).unwrap();

        let result: Result<(), DbError> = tx_db.with_savepoint(|sp_db| {
            sp_db.update(|txn| txn.upsert(b"dropped", vec![2]))?;
            Err(DbError::TxnTooBig)
        });
        assert!(result.unwrap_err().is_txn_too_big());

        controller.commit().unwrap();
        assert_eq!(read(&db, b"kept"), Some(vec![1]));
        assert_eq!(read(&db, b"dropped"), None);
    }

    #[test]
    fn test_read_only_transaction() {
        let db = Database::default();
        let (controller, tx_db) = db.begin_transaction(TxOptions::read_only());
        assert_eq!(
            tx_db.update(|txn| txn.upsert(b"a", vec![1])),
            Err(DbError::ReadOnly)
        );
        controller.commit().unwrap();
    }

    #[test]
    fn test_bound_handle_after_commit_is_finished() {
        let db = Database::default();
        let (controller, tx_db) = db.begin_transaction(TxOptions::default());
        controller.commit().unwrap();
        assert_eq!(read_result(&tx_db), Err(DbError::Finished));
    }

    fn read_result(db: &Database) -> Result<Option<Vec<u8>>, DbError> {
        db.view(|txn| txn.get(b"a"))
    }
}
