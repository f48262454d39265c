//! Keyed store of failure records.
//!
//! # Locking contract
//!
//! - Reads ([`RecordStore::load`], [`RecordStore::snapshot`]) take only the
//!   shard read lock of the underlying `DashMap` and return owned copies of the
//!   latest stored record. They never wait on the write gate.
//! - Every read-modify-write goes through [`RecordStore::update`], which holds
//!   one store-wide write gate for the whole load → mutate → store sequence.
//!   Same-key writers are therefore fully serialized and no update is lost.
//!   Callbacks must not call back into the store.
//! - Records are never removed; an update that leaves the slot empty is a
//!   no-op.

use dashmap::DashMap;
use parking_lot::Mutex;

use super::record::FailureRecord;

/// Concurrent keyed storage for [`FailureRecord`]s.
pub trait RecordStore: Send + Sync {
    /// Latest stored copy of the record for `key`
    fn load(&self, key: &str) -> Option<FailureRecord>;

    /// Atomically read, modify and store the record for `key`.
    ///
    /// `f` receives the current record (`None` if absent) and may create,
    /// mutate or leave it untouched. A `Some` slot is written back.
    fn update(&self, key: &str, f: &mut dyn FnMut(&mut Option<FailureRecord>));

    /// Copy of every record
    fn snapshot(&self) -> Vec<FailureRecord>;

    /// Number of records
    fn len(&self) -> usize;

    /// Whether the store holds no records
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// `DashMap`-backed store with a single write gate.
#[derive(Debug, Default)]
pub struct ShardedRecordStore {
    records: DashMap<String, FailureRecord>,
    write_gate: Mutex<()>,
}

impl ShardedRecordStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordStore for ShardedRecordStore {
    fn load(&self, key: &str) -> Option<FailureRecord> {
        self.records.get(key).map(|r| r.value().clone())
    }

    fn update(&self, key: &str, f: &mut dyn FnMut(&mut Option<FailureRecord>)) {
        let _gate = self.write_gate.lock();
        // Copy out before mutating: holding a shard ref across `insert` on
        // the same shard would deadlock.
        let mut slot = self.records.get(key).map(|r| r.value().clone());
        f(&mut slot);
        if let Some(record) = slot {
            self.records.insert(key.to_string(), record);
        }
    }

    fn snapshot(&self) -> Vec<FailureRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
