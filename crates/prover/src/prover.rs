use commander_db::TxOptions;
use commander_storage::Storage;

use crate::error::ProverError;

/// Builds proofs against the state held by a [`Storage`].
#[derive(Clone, Debug)]
pub struct Prover {
    storage: Storage,
}

impl Prover {
    /// Prover reading from `storage`
    pub const fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Storage the proofs are read from
    pub const fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Run `f` against one read-only snapshot of the storage
    pub(crate) fn read_snapshot<T>(
        &self,
        mut f: impl FnMut(&Storage) -> Result<T, ProverError>,
    ) -> Result<T, ProverError> {
        let storage = &self.storage;
        storage
            .database()
            .execute_in_transaction(TxOptions::read_only(), |database| {
                f(&storage.copy_with_new_database(database.clone()))
            })
    }
}
