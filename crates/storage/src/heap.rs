//! Fee-ordered view of the executable mempool transactions of one type

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap},
};

use alloy_primitives::U256;
use commander_db::CursorOptions;

use crate::{
    error::StorageError,
    keys::{pending_tx_account_prefix, pending_tx_key},
    models::PendingTx,
    storage::Storage,
    types::TxType,
};

#[derive(Debug)]
struct HeapEntry {
    seq: u64,
    tx: PendingTx,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tx
            .fee
            .cmp(&other.tx.fee)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

/// Max-heap of executable transactions ordered by fee.
///
/// Equal fees pop in push order. Popping a transaction schedules it for
/// deletion from the mempool; [`MempoolHeap::savepoint`] performs the
/// deletions. The heap reads the mempool through cursors, so building
/// batches does not conflict with transactions admitted meanwhile.
#[derive(Debug)]
pub struct MempoolHeap {
    storage: Storage,
    tx_type: TxType,
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
    /// Nonce of the last transaction pushed for each sender
    last_pushed: HashMap<u32, U256>,
    to_be_deleted: Vec<Vec<u8>>,
}

impl Storage {
    /// Heap over the executable lowest-nonce transactions of `tx_type`.
    ///
    /// The heap keeps this storage handle, so it should be bound to the
    /// transaction that applies the popped transactions.
    pub fn new_mempool_heap(&self, tx_type: TxType) -> Result<MempoolHeap, StorageError> {
        let mut heap = MempoolHeap {
            storage: self.clone(),
            tx_type,
            heap: BinaryHeap::new(),
            next_seq: 0,
            last_pushed: HashMap::new(),
            to_be_deleted: Vec::new(),
        };
        for tx in self.lowest_nonce_pending_txs()? {
            if self.tx_is_executable(tx_type, &tx)? {
                heap.push(tx);
            }
        }
        Ok(heap)
    }
}

impl MempoolHeap {
    /// Transaction type held by the heap
    pub const fn tx_type(&self) -> TxType {
        self.tx_type
    }

    /// Number of transactions in the heap
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Whether the heap is exhausted
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Highest-fee transaction
    pub fn peek_highest_fee_executable_tx(&self) -> Option<&PendingTx> {
        self.heap.peek().map(|entry| &entry.tx)
    }

    /// Pop the highest-fee transaction and schedule its deletion.
    ///
    /// Call this after the peeked transaction was applied to the state tree:
    /// the sender's next transaction takes its place, and a transfer receiver
    /// whose head transaction became executable joins the heap.
    pub fn drop_highest_fee_executable_tx(&mut self) -> Result<Option<PendingTx>, StorageError> {
        let Some(HeapEntry { tx, .. }) = self.heap.pop() else {
            return Ok(None);
        };
        self.to_be_deleted
            .push(pending_tx_key(tx.from_state_id, tx.nonce)?);

        if let Some(next) = self.next_tx_for_account(tx.from_state_id)?
            && next.tx_type() == self.tx_type
        {
            self.push(next);
        }

        if let Some(receiver) = tx.transfer_receiver() {
            self.push_receiver_head(receiver)?;
        }
        Ok(Some(tx))
    }

    fn push_receiver_head(&mut self, receiver: u32) -> Result<(), StorageError> {
        let previously_pushed = self.last_pushed.contains_key(&receiver);
        let Some(next) = self.next_tx_for_account(receiver)? else {
            return Ok(());
        };
        if previously_pushed {
            let current_nonce = self
                .storage
                .state_tree
                .leaf_or_empty(receiver)?
                .user_state
                .nonce;
            if current_nonce != next.nonce {
                return Ok(());
            }
        }
        if self.storage.tx_is_executable(self.tx_type, &next)? {
            self.push(next);
        }
        Ok(())
    }

    /// Delete every popped transaction from the mempool
    pub fn savepoint(&mut self) -> Result<(), StorageError> {
        let keys = std::mem::take(&mut self.to_be_deleted);
        self.storage.database.update(|txn| {
            keys.iter().try_for_each(|key| txn.delete(key))
        })?;
        Ok(())
    }

    /// # Panics
    ///
    /// If `tx` is not of the heap's type.
    fn push(&mut self, tx: PendingTx) {
        assert!(
            tx.tx_type() == self.tx_type,
            "cannot push {:?} into a {:?} heap",
            tx.tx_type(),
            self.tx_type
        );
        self.last_pushed.insert(tx.from_state_id, tx.nonce);
        self.heap.push(HeapEntry {
            seq: self.next_seq,
            tx,
        });
        self.next_seq += 1;
    }

    /// Next transaction of `state_id` after the last one pushed, or its
    /// lowest-nonce transaction if none was pushed.
    fn next_tx_for_account(&self, state_id: u32) -> Result<Option<PendingTx>, StorageError> {
        let last_key = self
            .last_pushed
            .get(&state_id)
            .map(|nonce| pending_tx_key(state_id, *nonce))
            .transpose()?;

        self.storage.database.view(|txn| {
            let mut cursor = txn.cursor(CursorOptions::prefix(&pending_tx_account_prefix(state_id)))?;
            if let Some(last_key) = &last_key {
                cursor.seek(last_key);
                if cursor.key() == Some(last_key.as_slice()) {
                    cursor.next();
                }
            }
            cursor
                .value()
                .map(PendingTx::from_bytes)
                .transpose()
        })
    }
}
