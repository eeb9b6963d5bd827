//! Versioned in-memory storage

use std::{
    collections::{BTreeMap, HashSet},
    ops::Bound,
    sync::Arc,
};

use parking_lot::RwLock;

use crate::{config::DbConfig, error::DbError, txn::Txn};

pub(crate) type Key = Vec<u8>;
pub(crate) type Value = Vec<u8>;

/// A committed value of a key. `None` marks a deletion.
#[derive(Debug)]
struct Version {
    ts: u64,
    value: Option<Value>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Versions of every key, oldest first
    entries: BTreeMap<Key, Vec<Version>>,
    /// Timestamp of the latest commit
    last_commit_ts: u64,
    /// Snapshot timestamp -> number of open transactions reading at it
    active_reads: BTreeMap<u64, usize>,
}

impl Inner {
    fn visible(versions: &[Version], ts: u64) -> Option<&Value> {
        versions
            .iter()
            .rev()
            .find(|version| version.ts <= ts)
            .and_then(|version| version.value.as_ref())
    }

    fn release(&mut self, read_ts: u64) {
        if let Some(count) = self.active_reads.get_mut(&read_ts) {
            *count -= 1;
            if *count == 0 {
                self.active_reads.remove(&read_ts);
            }
        }
    }

    /// Oldest snapshot any open transaction may still read.
    fn watermark(&self) -> u64 {
        self.active_reads
            .keys()
            .next()
            .copied()
            .unwrap_or(self.last_commit_ts)
    }

    fn prune(&mut self, key: &[u8], watermark: u64) {
        let Some(versions) = self.entries.get_mut(key) else {
            return;
        };
        if let Some(position) = versions.iter().rposition(|version| version.ts <= watermark) {
            versions.drain(..position);
        }
        let only_tombstone =
            versions.len() == 1 && versions[0].value.is_none() && versions[0].ts <= watermark;
        if only_tombstone {
            self.entries.remove(key);
        }
    }
}

#[derive(Debug)]
struct Shared {
    inner: RwLock<Inner>,
    config: DbConfig,
}

/// Handle onto an in-memory MVCC key-value store.
///
/// Clones share the same underlying data.
#[derive(Clone, Debug)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Store {
    /// Create an empty store
    pub fn new(config: DbConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: RwLock::new(Inner::default()),
                config,
            }),
        }
    }

    /// Store configuration
    pub fn config(&self) -> &DbConfig {
        &self.shared.config
    }

    /// Begin a transaction reading at the latest committed snapshot
    pub fn begin(&self, writable: bool) -> Txn {
        let read_ts = {
            let mut inner = self.shared.inner.write();
            let ts = inner.last_commit_ts;
            *inner.active_reads.entry(ts).or_default() += 1;
            ts
        };
        Txn::new(self.clone(), read_ts, writable)
    }

    /// Number of live keys in the latest snapshot
    pub fn key_count(&self) -> usize {
        let inner = self.shared.inner.read();
        inner
            .entries
            .values()
            .filter(|versions| versions.last().is_some_and(|version| version.value.is_some()))
            .count()
    }

    pub(crate) fn release(&self, read_ts: u64) {
        self.shared.inner.write().release(read_ts);
    }

    pub(crate) fn read_at(&self, key: &[u8], ts: u64) -> Option<Value> {
        let inner = self.shared.inner.read();
        inner
            .entries
            .get(key)
            .and_then(|versions| Inner::visible(versions, ts))
            .cloned()
    }

    /// First entry in `range` visible at `ts`, walking backwards when
    /// `reverse` is set. Keys for which `skip` holds are passed over.
    pub(crate) fn first_visible(
        &self,
        range: (Bound<Key>, Bound<Key>),
        ts: u64,
        reverse: bool,
        skip: impl Fn(&[u8]) -> bool,
    ) -> Option<(Key, Value)> {
        let inner = self.shared.inner.read();
        let mut entries = inner.entries.range::<Key, _>(range);
        let pick = |(key, versions): (&Key, &Vec<Version>)| {
            if skip(key) {
                return None;
            }
            Inner::visible(versions, ts).map(|value| (key.clone(), value.clone()))
        };
        if reverse {
            entries.rev().find_map(pick)
        } else {
            entries.find_map(pick)
        }
    }

    /// Validate the read set and apply the writes atomically.
    ///
    /// A transaction without writes always commits: it only observed the
    /// snapshot at `read_ts`. The snapshot is released whether or not the
    /// commit succeeds.
    pub(crate) fn commit(
        &self,
        read_ts: u64,
        reads: &HashSet<Key>,
        writes: BTreeMap<Key, Option<Value>>,
    ) -> Result<(), DbError> {
        let mut inner = self.shared.inner.write();
        if writes.is_empty() {
            inner.release(read_ts);
            return Ok(());
        }

        let conflicted = reads.iter().any(|key| {
            inner
                .entries
                .get(key)
                .and_then(|versions| versions.last())
                .is_some_and(|latest| latest.ts > read_ts)
        });
        if conflicted {
            inner.release(read_ts);
            return Err(DbError::Conflict);
        }

        let commit_ts = inner.last_commit_ts + 1;
        for (key, value) in &writes {
            inner
                .entries
                .entry(key.clone())
                .or_default()
                .push(Version {
                    ts: commit_ts,
                    value: value.clone(),
                });
        }
        inner.last_commit_ts = commit_ts;
        inner.release(read_ts);

        let watermark = inner.watermark();
        for key in writes.keys() {
            inner.prune(key, watermark);
        }
        Ok(())
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new(DbConfig::default())
    }
}
