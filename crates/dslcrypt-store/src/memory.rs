//! In-memory implementation of the ObjectStore trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence, and can be told to
//! fail its next commit.

use std::collections::BTreeMap;

use bytes::Bytes;
use dslcrypt_core::ObjectId;
use parking_lot::RwLock;

use crate::error::{Result, StoreError};
use crate::traits::{ObjectStore, Transaction, TxOp};

type Records = BTreeMap<u64, Bytes>;

/// In-memory object store.
///
/// All data is lost when the store is dropped.
pub struct MemoryObjectStore {
    inner: RwLock<MemoryStoreInner>,
}

struct MemoryStoreInner {
    /// Next id `allocate_object` hands out. Ids start at 1.
    next_id: u64,

    objects: BTreeMap<ObjectId, Records>,

    /// Reason to abort the next commit with, if armed.
    fail_next: Option<String>,

    committed: u64,
}

impl MemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryStoreInner {
                next_id: 1,
                objects: BTreeMap::new(),
                fail_next: None,
                committed: 0,
            }),
        }
    }

    /// Make the next `commit` fail with [`StoreError::Aborted`] without
    /// applying anything.
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        self.inner.write().fail_next = Some(reason.into());
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        self.inner.read().committed
    }

    /// Total number of records across all objects.
    pub fn record_count(&self) -> usize {
        self.inner.read().objects.values().map(BTreeMap::len).sum()
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStoreInner {
    /// Validate `tx` and compute the resulting object states without
    /// touching the committed ones. `None` marks a freed object.
    fn stage(&self, tx: &Transaction) -> Result<BTreeMap<ObjectId, Option<Records>>> {
        let mut staged: BTreeMap<ObjectId, Option<Records>> = BTreeMap::new();

        for op in tx.ops() {
            match op {
                TxOp::CreateObject(obj) => {
                    if obj.is_null() || obj.get() >= self.next_id {
                        return Err(StoreError::InvalidData(format!(
                            "object {} was never allocated",
                            obj
                        )));
                    }
                    if self.current(&staged, *obj).is_some() {
                        return Err(StoreError::ObjectExists(*obj));
                    }
                    staged.insert(*obj, Some(Records::new()));
                }
                TxOp::PutRecord { obj, key, data } => {
                    let mut records = self
                        .current(&staged, *obj)
                        .ok_or(StoreError::ObjectNotFound(*obj))?;
                    records.insert(*key, data.clone());
                    staged.insert(*obj, Some(records));
                }
                TxOp::FreeObject(obj) => {
                    if self.current(&staged, *obj).is_none() {
                        return Err(StoreError::ObjectNotFound(*obj));
                    }
                    staged.insert(*obj, None);
                }
            }
        }

        Ok(staged)
    }

    fn current(&self, staged: &BTreeMap<ObjectId, Option<Records>>, obj: ObjectId) -> Option<Records> {
        match staged.get(&obj) {
            Some(state) => state.clone(),
            None => self.objects.get(&obj).cloned(),
        }
    }
}

impl ObjectStore for MemoryObjectStore {
    fn allocate_object(&self) -> Result<ObjectId> {
        let mut inner = self.inner.write();
        let obj = ObjectId::new(inner.next_id);
        inner.next_id += 1;
        Ok(obj)
    }

    fn object_exists(&self, obj: ObjectId) -> Result<bool> {
        Ok(self.inner.read().objects.contains_key(&obj))
    }

    fn read_records(&self, obj: ObjectId) -> Result<Vec<(u64, Bytes)>> {
        let inner = self.inner.read();
        let records = inner
            .objects
            .get(&obj)
            .ok_or(StoreError::ObjectNotFound(obj))?;
        Ok(records.iter().map(|(k, v)| (*k, v.clone())).collect())
    }

    fn commit(&self, tx: Transaction) -> Result<()> {
        let mut inner = self.inner.write();

        if let Some(reason) = inner.fail_next.take() {
            tracing::warn!(txg = tx.txg(), %reason, "injected commit failure");
            return Err(StoreError::Aborted(reason));
        }

        let staged = inner.stage(&tx)?;
        for (obj, state) in staged {
            match state {
                Some(records) => {
                    inner.objects.insert(obj, records);
                }
                None => {
                    inner.objects.remove(&obj);
                }
            }
        }
        inner.committed += 1;

        tracing::trace!(txg = tx.txg(), ops = tx.len(), "committed transaction");
        Ok(())
    }

    fn list_objects(&self) -> Result<Vec<ObjectId>> {
        Ok(self.inner.read().objects.keys().copied().collect())
    }
}
