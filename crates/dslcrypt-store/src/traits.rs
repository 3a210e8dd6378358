//! ObjectStore trait: the abstract interface for keychain persistence.
//!
//! Keychains persist through this trait so the key hierarchy stays
//! storage-agnostic. Implementations include SQLite (primary) and in-memory
//! (for tests).

use bytes::Bytes;
use dslcrypt_core::ObjectId;

use crate::error::Result;

/// One staged change in a [`Transaction`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOp {
    /// Create an allocated object.
    CreateObject(ObjectId),
    /// Insert or overwrite the record at `key`.
    PutRecord { obj: ObjectId, key: u64, data: Bytes },
    /// Free an object and all its records.
    FreeObject(ObjectId),
}

/// A batch of changes committed atomically at one transaction group.
///
/// Building a transaction touches nothing. Only [`ObjectStore::commit`]
/// applies it; dropping it uncommitted is an abort.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a transaction does nothing until committed"]
pub struct Transaction {
    txg: u64,
    ops: Vec<TxOp>,
}

impl Transaction {
    /// Begin a transaction in transaction group `txg`.
    pub fn new(txg: u64) -> Self {
        Self {
            txg,
            ops: Vec::new(),
        }
    }

    pub fn txg(&self) -> u64 {
        self.txg
    }

    pub fn create_object(&mut self, obj: ObjectId) -> &mut Self {
        self.ops.push(TxOp::CreateObject(obj));
        self
    }

    pub fn put_record(&mut self, obj: ObjectId, key: u64, data: impl Into<Bytes>) -> &mut Self {
        self.ops.push(TxOp::PutRecord {
            obj,
            key,
            data: data.into(),
        });
        self
    }

    pub fn free_object(&mut self, obj: ObjectId) -> &mut Self {
        self.ops.push(TxOp::FreeObject(obj));
        self
    }

    /// Staged operations, in order.
    pub fn ops(&self) -> &[TxOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// The ObjectStore trait: synchronous interface for object persistence.
///
/// An object is an ordered collection of `(key, record)` pairs. Keychains
/// key their records by effective txg.
///
/// # Design Notes
///
/// - **Atomic commits**: a transaction applies completely or not at all.
/// - **No id reuse**: an object id handed out by `allocate_object` is never
///   handed out again, even after the object is freed.
/// - **Validation**: creating an existing object fails with `ObjectExists`;
///   writing to or freeing a missing object fails with `ObjectNotFound`.
pub trait ObjectStore: Send + Sync {
    /// Reserve a fresh object id. The object exists once a committed
    /// transaction creates it.
    fn allocate_object(&self) -> Result<ObjectId>;

    /// Check if an object exists.
    fn object_exists(&self, obj: ObjectId) -> Result<bool>;

    /// Read every record of an object, ordered by key.
    ///
    /// Fails with `ObjectNotFound` if the object does not exist.
    fn read_records(&self, obj: ObjectId) -> Result<Vec<(u64, Bytes)>>;

    /// Apply a transaction atomically.
    fn commit(&self, tx: Transaction) -> Result<()>;

    /// List all existing objects, ordered by id.
    fn list_objects(&self) -> Result<Vec<ObjectId>>;
}

impl<S: ObjectStore + ?Sized> ObjectStore for std::sync::Arc<S> {
    fn allocate_object(&self) -> Result<ObjectId> {
        (**self).allocate_object()
    }

    fn object_exists(&self, obj: ObjectId) -> Result<bool> {
        (**self).object_exists(obj)
    }

    fn read_records(&self, obj: ObjectId) -> Result<Vec<(u64, Bytes)>> {
        (**self).read_records(obj)
    }

    fn commit(&self, tx: Transaction) -> Result<()> {
        (**self).commit(tx)
    }

    fn list_objects(&self) -> Result<Vec<ObjectId>> {
        (**self).list_objects()
    }
}
