//! Transactions and cursors

use std::{
    cell::RefCell,
    collections::{BTreeMap, HashSet},
    fmt, mem,
    ops::Bound,
};

use crate::{
    INDEX_PREFIX,
    error::DbError,
    store::{Key, Store, Value},
};

/// Side effect executed once a transaction commits successfully.
pub type CommitHook = Box<dyn FnOnce() + Send>;

/// Position inside a transaction's write journal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Savepoint {
    journal_len: usize,
    hooks_len: usize,
}

/// A read-write or read-only transaction over a [`Store`] snapshot.
pub struct Txn {
    store: Store,
    read_ts: u64,
    writable: bool,
    writes: BTreeMap<Key, Option<Value>>,
    /// Previous buffered write of every key touched, used by `rollback_to`
    journal: Vec<(Key, Option<Option<Value>>)>,
    reads: RefCell<HashSet<Key>>,
    hooks: Vec<CommitHook>,
    finished: bool,
}

impl fmt::Debug for Txn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Txn")
            .field("read_ts", &self.read_ts)
            .field("writable", &self.writable)
            .field("writes", &self.writes.len())
            .field("reads", &self.reads.borrow().len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Txn {
    pub(crate) fn new(store: Store, read_ts: u64, writable: bool) -> Self {
        Self {
            store,
            read_ts,
            writable,
            writes: BTreeMap::new(),
            journal: Vec::new(),
            reads: RefCell::new(HashSet::new()),
            hooks: Vec::new(),
            finished: false,
        }
    }

    /// Whether the transaction accepts writes
    pub const fn is_writable(&self) -> bool {
        self.writable
    }

    /// Number of buffered writes
    pub fn pending_writes(&self) -> usize {
        self.writes.len()
    }

    pub(crate) const fn ensure_open(&self) -> Result<(), DbError> {
        if self.finished {
            return Err(DbError::Finished);
        }
        Ok(())
    }

    fn register_read(&self, key: &[u8]) {
        self.reads.borrow_mut().insert(key.to_vec());
    }

    fn lookup(&self, key: &[u8]) -> Option<Value> {
        match self.writes.get(key) {
            Some(buffered) => buffered.clone(),
            None => self.store.read_at(key, self.read_ts),
        }
    }

    /// Point lookup. The key joins the read set.
    pub fn get(&self, key: &[u8]) -> Result<Option<Value>, DbError> {
        self.ensure_open()?;
        self.register_read(key);
        Ok(self.lookup(key))
    }

    /// Point existence check. The key joins the read set.
    pub fn exists(&self, key: &[u8]) -> Result<bool, DbError> {
        Ok(self.get(key)?.is_some())
    }

    /// Write a key that must not exist yet
    pub fn insert(&mut self, key: &[u8], value: Value) -> Result<(), DbError> {
        if self.exists(key)? {
            return Err(DbError::KeyExists);
        }
        self.write(key, Some(value))
    }

    /// Write a key whether or not it exists
    pub fn upsert(&mut self, key: &[u8], value: Value) -> Result<(), DbError> {
        self.write(key, Some(value))
    }

    /// Remove a key
    pub fn delete(&mut self, key: &[u8]) -> Result<(), DbError> {
        self.write(key, None)
    }

    fn write(&mut self, key: &[u8], value: Option<Value>) -> Result<(), DbError> {
        self.ensure_open()?;
        if !self.writable {
            return Err(DbError::ReadOnly);
        }
        if !self.writes.contains_key(key) && self.writes.len() >= self.store.config().max_txn_writes
        {
            return Err(DbError::TxnTooBig);
        }
        let previous = self.writes.insert(key.to_vec(), value);
        self.journal.push((key.to_vec(), previous));
        Ok(())
    }

    /// Open a cursor over the keys sharing `options.prefix`.
    ///
    /// The cursor walks the store lazily, one key per step, merging the
    /// buffered writes of this transaction into the snapshot.
    pub fn cursor(&self, options: CursorOptions) -> Result<Cursor<'_>, DbError> {
        self.ensure_open()?;
        let mut cursor = Cursor {
            txn: self,
            end: prefix_end(&options.prefix),
            prefix: options.prefix,
            reverse: options.reverse,
            current: None,
        };
        cursor.rewind();
        Ok(cursor)
    }

    /// First visible entry in the range, or the last one when `reverse`
    fn first_in_range(
        &self,
        lower: Bound<Key>,
        upper: Bound<Key>,
        reverse: bool,
    ) -> Option<(Key, Value)> {
        if range_is_empty(&lower, &upper) {
            return None;
        }
        let stored = self.store.first_visible(
            (lower.clone(), upper.clone()),
            self.read_ts,
            reverse,
            |key| self.writes.contains_key(key),
        );
        let mut buffered = self
            .writes
            .range::<Key, _>((lower, upper))
            .filter_map(|(key, value)| value.as_ref().map(|value| (key.clone(), value.clone())));
        let buffered = if reverse {
            buffered.next_back()
        } else {
            buffered.next()
        };
        match (stored, buffered) {
            (Some(stored), Some(buffered)) => {
                if (stored.0 < buffered.0) != reverse {
                    Some(stored)
                } else {
                    Some(buffered)
                }
            }
            (stored, buffered) => stored.or(buffered),
        }
    }

    /// Mark the current position of the write journal
    pub fn savepoint(&self) -> Savepoint {
        Savepoint {
            journal_len: self.journal.len(),
            hooks_len: self.hooks.len(),
        }
    }

    /// Undo every write and hook registered after `savepoint`
    pub fn rollback_to(&mut self, savepoint: Savepoint) {
        while self.journal.len() > savepoint.journal_len {
            let Some((key, previous)) = self.journal.pop() else {
                break;
            };
            match previous {
                Some(value) => self.writes.insert(key, value),
                None => self.writes.remove(&key),
            };
        }
        self.hooks.truncate(savepoint.hooks_len);
    }

    /// Register a side effect that runs only if the transaction commits
    pub fn on_commit(&mut self, hook: CommitHook) {
        self.hooks.push(hook);
    }

    /// Commit the buffered writes
    pub fn commit(&mut self) -> Result<(), DbError> {
        self.ensure_open()?;
        self.finished = true;

        let writes = mem::take(&mut self.writes);
        self.journal.clear();
        let reads = mem::take(&mut *self.reads.borrow_mut());
        self.store.commit(self.read_ts, &reads, writes)?;

        for hook in self.hooks.drain(..) {
            hook();
        }
        Ok(())
    }

    /// Drop the buffered writes and release the snapshot
    pub fn discard(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.writes.clear();
        self.journal.clear();
        self.hooks.clear();
        self.store.release(self.read_ts);
    }

    /// Add `primary` to the secondary index `index` under `field`.
    ///
    /// Field values of one index must have a fixed width.
    pub fn index_insert(&mut self, index: &str, field: &[u8], primary: &[u8]) -> Result<(), DbError> {
        self.upsert(&index_key(index, field, primary), Vec::new())
    }

    /// Remove `primary` from the secondary index `index`
    pub fn index_delete(&mut self, index: &str, field: &[u8], primary: &[u8]) -> Result<(), DbError> {
        self.delete(&index_key(index, field, primary))
    }

    /// Primary keys stored under `field` in the secondary index `index`
    pub fn index_lookup(&self, index: &str, field: &[u8]) -> Result<Vec<Key>, DbError> {
        let prefix = index_key(index, field, &[]);
        let mut cursor = self.cursor(CursorOptions::prefix(&prefix))?;
        let mut primaries = Vec::new();
        while let Some(key) = cursor.key() {
            let primary = key[prefix.len()..].to_vec();
            cursor.touch();
            primaries.push(primary);
            cursor.next();
        }
        Ok(primaries)
    }
}

impl Drop for Txn {
    fn drop(&mut self) {
        self.discard();
    }
}

/// Key of a secondary index entry
pub(crate) fn index_key(index: &str, field: &[u8], primary: &[u8]) -> Key {
    let mut key =
        Vec::with_capacity(INDEX_PREFIX.len() + index.len() + 1 + field.len() + primary.len());
    key.extend_from_slice(INDEX_PREFIX);
    key.extend_from_slice(index.as_bytes());
    key.push(b':');
    key.extend_from_slice(field);
    key.extend_from_slice(primary);
    key
}

/// Cursor configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CursorOptions {
    /// Only keys starting with this prefix are visited
    pub prefix: Vec<u8>,
    /// Visit keys in descending order
    pub reverse: bool,
}

impl CursorOptions {
    /// Forward cursor over `prefix`
    pub fn prefix(prefix: &[u8]) -> Self {
        Self {
            prefix: prefix.to_vec(),
            reverse: false,
        }
    }

    /// Visit keys in descending order
    pub const fn reverse(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// Ordered iteration over a transaction's view of a key prefix.
///
/// Moving the cursor and inspecting keys does not add anything to the read
/// set. [`Cursor::value`] does, because reading an item proves it exists.
pub struct Cursor<'t> {
    txn: &'t Txn,
    prefix: Key,
    /// Exclusive upper bound of the keys sharing `prefix`
    end: Bound<Key>,
    reverse: bool,
    current: Option<(Key, Value)>,
}

impl fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("prefix", &hex::encode(&self.prefix))
            .field("current", &self.current.as_ref().map(|(key, _)| hex::encode(key)))
            .field("reverse", &self.reverse)
            .finish()
    }
}

impl Cursor<'_> {
    /// Move to the first entry
    pub fn rewind(&mut self) {
        self.current = self.txn.first_in_range(
            Bound::Included(self.prefix.clone()),
            self.end.clone(),
            self.reverse,
        );
    }

    /// Move to the first key `>= key`, or `<= key` for reverse cursors
    pub fn seek(&mut self, key: &[u8]) {
        let lower = Bound::Included(self.prefix.clone());
        self.current = if self.reverse {
            let upper = match &self.end {
                Bound::Excluded(end) if key >= end.as_slice() => self.end.clone(),
                _ => Bound::Included(key.to_vec()),
            };
            self.txn.first_in_range(lower, upper, true)
        } else {
            let lower = if key > self.prefix.as_slice() {
                Bound::Included(key.to_vec())
            } else {
                lower
            };
            self.txn.first_in_range(lower, self.end.clone(), false)
        };
    }

    /// Advance by one entry
    pub fn next(&mut self) {
        let Some((key, _)) = self.current.take() else {
            return;
        };
        self.current = if self.reverse {
            self.txn.first_in_range(
                Bound::Included(self.prefix.clone()),
                Bound::Excluded(key),
                true,
            )
        } else {
            self.txn
                .first_in_range(Bound::Excluded(key), self.end.clone(), false)
        };
    }

    /// Whether the cursor points at an entry
    pub const fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Whether the cursor points at an entry whose key starts with `prefix`
    pub fn valid_for_prefix(&self, prefix: &[u8]) -> bool {
        self.key().is_some_and(|key| key.starts_with(prefix))
    }

    /// Current key
    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(key, _)| key.as_slice())
    }

    /// Current value. The key joins the read set.
    pub fn value(&self) -> Option<&[u8]> {
        let (key, value) = self.current.as_ref()?;
        self.txn.register_read(key);
        Some(value.as_slice())
    }

    /// Add the current key to the read set without reading its value
    pub fn touch(&self) {
        if let Some((key, _)) = &self.current {
            self.txn.register_read(key);
        }
    }
}

/// Smallest key greater than every key starting with `prefix`
fn prefix_end(prefix: &[u8]) -> Bound<Key> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < u8::MAX {
            end.push(last + 1);
            return Bound::Excluded(end);
        }
    }
    Bound::Unbounded
}

fn range_is_empty(lower: &Bound<Key>, upper: &Bound<Key>) -> bool {
    match (lower, upper) {
        (Bound::Included(lower), Bound::Included(upper)) => lower > upper,
        (Bound::Included(lower) | Bound::Excluded(lower), Bound::Excluded(upper))
        | (Bound::Excluded(lower), Bound::Included(upper)) => lower >= upper,
        _ => false,
    }
}
