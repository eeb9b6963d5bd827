//! Storage facade tying the trees and the record stores to one database handle

use commander_db::{Database, TxController, TxOptions};

use crate::{
    account_tree::AccountTree, config::Config, error::StorageError, state_tree::StateTree,
};

/// Entry point to the commander state.
///
/// Cloning is cheap. A clone, or a copy made with
/// [`Storage::copy_with_new_database`], works on the same data; a copy bound
/// to an open transaction makes every operation join that transaction.
#[derive(Clone, Debug)]
pub struct Storage {
    pub(crate) database: Database,
    /// State tree on the same database handle
    pub state_tree: StateTree,
    /// Account tree on the same database handle
    pub account_tree: AccountTree,
}

impl Storage {
    /// Open storage on a new empty database
    pub fn new(config: &Config) -> Result<Self, StorageError> {
        Self::from_database(Database::new(config.db.clone()))
    }

    /// Open storage on an existing database
    pub fn from_database(database: Database) -> Result<Self, StorageError> {
        Ok(Self {
            state_tree: StateTree::new(database.clone())?,
            account_tree: AccountTree::new(database.clone()),
            database,
        })
    }

    /// Database handle used by this storage
    pub const fn database(&self) -> &Database {
        &self.database
    }

    /// The same storage on another handle of the same database
    pub fn copy_with_new_database(&self, database: Database) -> Self {
        Self {
            state_tree: self.state_tree.copy_with_new_database(database.clone()),
            account_tree: self.account_tree.copy_with_new_database(database.clone()),
            database,
        }
    }

    /// The same storage on a handle that is not bound to any transaction
    pub fn new_connection(&self) -> Self {
        self.copy_with_new_database(self.database.new_connection())
    }

    /// Open a transaction and return its controller with storage bound to it
    pub fn begin_transaction(&self, options: TxOptions) -> (TxController, Self) {
        let (controller, database) = self.database.begin_transaction(options);
        (controller, self.copy_with_new_database(database))
    }

    /// Run `f` in a transaction, retrying it on conflict at the top level
    pub fn execute_in_transaction<T>(
        &self,
        options: TxOptions,
        mut f: impl FnMut(&Self) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.database.execute_in_transaction(options, |database| {
            f(&self.copy_with_new_database(database.clone()))
        })
    }

    /// Run `f` in a read-write transaction
    pub fn execute_in_read_write_transaction<T>(
        &self,
        f: impl FnMut(&Self) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        self.execute_in_transaction(TxOptions::default(), f)
    }
}
