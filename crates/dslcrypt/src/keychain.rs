//! Keychains: the versioned history of data-encryption keys for one
//! key-bearing object.
//!
//! A keychain holds one entry per key version, ordered by the txg at which
//! the key became effective. Lookups find the newest entry effective at a
//! given txg, so data written before a rotation stays readable.
//!
//! Every entry is persisted as a [`DslCryptoKeyPhys`] record keyed by its
//! txg, wrapped under the single [`WrappingKey`] the chain shares.
//!
//! # Locking
//!
//! The entry list sits behind a reader/writer lock. Lookups share it;
//! rotation, clone and rewrap take it exclusively. Holds are counted
//! atomically, outside the lock.
//!
//! A key returned by [`Keychain::lookup_key`] keeps the read lock until it
//! is dropped. Reads take the lock recursively, so a thread holding one key
//! can look up another even while a rotation is queued for the write lock.
//! Do not rotate or rewrap the same keychain on that thread while holding
//! a key.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dslcrypt_core::{
    create_key, generate_key, CryptAlgorithm, DslCryptoKeyPhys, KeyMaterial, ObjectId,
    WrappingKey,
};
use dslcrypt_store::{ObjectStore, Transaction};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

use crate::error::{KeyError, Result};

/// One key version.
struct KeychainEntry {
    txg: u64,
    key: KeyMaterial,
}

struct KeychainInner {
    /// Sorted by strictly increasing txg. Non-empty while open.
    entries: Vec<KeychainEntry>,
    /// `None` once closed.
    wkey: Option<Arc<WrappingKey>>,
}

/// Lifecycle state of a keychain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeychainState {
    /// Entries and wrapping key are loaded.
    Open,
    /// The last hold was released; key material is gone.
    Closed,
}

/// A loaded keychain.
///
/// Only reachable through a [`KeychainHold`].
pub struct Keychain {
    obj: ObjectId,
    refcount: AtomicUsize,
    #[cfg(debug_assertions)]
    holders: parking_lot::Mutex<Vec<&'static str>>,
    inner: RwLock<KeychainInner>,
}

/// A counted, tagged reference to a [`Keychain`].
///
/// Dropping the hold releases it. The keychain closes when its last hold
/// is released.
pub struct KeychainHold {
    keychain: Arc<Keychain>,
    tag: &'static str,
}

impl KeychainHold {
    fn acquire(keychain: Arc<Keychain>, tag: &'static str) -> Self {
        keychain.refcount.fetch_add(1, Ordering::AcqRel);
        #[cfg(debug_assertions)]
        keychain.holders.lock().push(tag);
        Self { keychain, tag }
    }

    /// Take another hold on the same keychain.
    pub fn hold(&self, tag: &'static str) -> KeychainHold {
        Self::acquire(Arc::clone(&self.keychain), tag)
    }

    /// The tag this hold was taken with.
    pub fn tag(&self) -> &'static str {
        self.tag
    }
}

impl Deref for KeychainHold {
    type Target = Keychain;

    fn deref(&self) -> &Keychain {
        &self.keychain
    }
}

impl Drop for KeychainHold {
    fn drop(&mut self) {
        self.keychain.release(self.tag);
    }
}

impl fmt::Debug for KeychainHold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeychainHold")
            .field("kcobj", &self.keychain.obj)
            .field("tag", &self.tag)
            .finish()
    }
}

impl Keychain {
    fn open_with(
        obj: ObjectId,
        entries: Vec<KeychainEntry>,
        wkey: Arc<WrappingKey>,
        tag: &'static str,
    ) -> KeychainHold {
        let keychain = Arc::new(Self {
            obj,
            refcount: AtomicUsize::new(0),
            #[cfg(debug_assertions)]
            holders: parking_lot::Mutex::new(Vec::new()),
            inner: RwLock::new(KeychainInner {
                entries,
                wkey: Some(wkey),
            }),
        });
        KeychainHold::acquire(keychain, tag)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a keychain with one fresh `crypt` key effective at `txg`.
    ///
    /// Allocates the keychain object and commits its first record in a
    /// transaction at `txg`. Nothing is kept in memory if the commit fails.
    pub fn create<S: ObjectStore + ?Sized>(
        store: &S,
        wkey: Arc<WrappingKey>,
        crypt: CryptAlgorithm,
        txg: u64,
        tag: &'static str,
    ) -> Result<KeychainHold> {
        let key = generate_key(crypt)?;
        let phys = DslCryptoKeyPhys::seal(&wkey, &key)?;

        let obj = store.allocate_object()?;
        let mut tx = Transaction::new(txg);
        tx.create_object(obj)
            .put_record(obj, txg, phys.to_bytes().to_vec());
        commit(store, tx, obj)?;

        tracing::info!(
            kcobj = %obj,
            txg,
            %crypt,
            key = %key.fingerprint(),
            wkey = %wkey.fingerprint(),
            "created keychain"
        );

        Ok(Self::open_with(obj, vec![KeychainEntry { txg, key }], wkey, tag))
    }

    /// Open the keychain stored in `obj` by unwrapping every record with
    /// `wkey`.
    ///
    /// Fails with an authentication error if `wkey` is not the chain's
    /// wrapping key, and with [`KeyError::Corrupted`] if the object holds
    /// no records.
    pub fn open<S: ObjectStore + ?Sized>(
        store: &S,
        obj: ObjectId,
        wkey: Arc<WrappingKey>,
        tag: &'static str,
    ) -> Result<KeychainHold> {
        let records = store.read_records(obj)?;
        if records.is_empty() {
            return Err(KeyError::Corrupted(format!("keychain {} has no keys", obj)));
        }

        let mut entries = Vec::with_capacity(records.len());
        for (txg, bytes) in records {
            let phys = DslCryptoKeyPhys::from_bytes(&bytes)?;
            let key = phys.open(&wkey).map_err(|e| {
                tracing::warn!(
                    kcobj = %obj,
                    txg,
                    wkey = %wkey.fingerprint(),
                    error = %e,
                    "failed to unwrap keychain entry"
                );
                e
            })?;
            entries.push(KeychainEntry { txg, key });
        }

        tracing::debug!(kcobj = %obj, entries = entries.len(), "opened keychain");
        Ok(Self::open_with(obj, entries, wkey, tag))
    }

    /// Free the persistent object of keychain `obj` in a transaction at
    /// `txg`.
    pub fn destroy<S: ObjectStore + ?Sized>(store: &S, obj: ObjectId, txg: u64) -> Result<()> {
        let mut tx = Transaction::new(txg);
        tx.free_object(obj);
        commit(store, tx, obj)?;

        tracing::info!(kcobj = %obj, txg, "destroyed keychain");
        Ok(())
    }

    fn release(&self, tag: &'static str) {
        #[cfg(debug_assertions)]
        {
            let mut holders = self.holders.lock();
            let pos = holders.iter().position(|t| *t == tag);
            debug_assert!(
                pos.is_some(),
                "keychain {} released by {:?} without a matching hold",
                self.obj,
                tag
            );
            if let Some(pos) = pos {
                holders.swap_remove(pos);
            }
        }
        #[cfg(not(debug_assertions))]
        let _ = tag;

        if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.close();
        }
    }

    fn close(&self) {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.wkey = None;
        tracing::debug!(kcobj = %self.obj, "closed keychain");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Key Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// The key effective at `txg`: the entry with the greatest txg not
    /// after it.
    ///
    /// The returned guard shares the keychain's read lock.
    pub fn lookup_key(&self, txg: u64) -> Result<MappedRwLockReadGuard<'_, KeyMaterial>> {
        let inner = self.inner.read_recursive();
        if inner.wkey.is_none() {
            return Err(KeyError::NotLoaded(self.obj));
        }

        let idx = inner.entries.partition_point(|e| e.txg <= txg);
        if idx == 0 {
            return Err(KeyError::NoApplicableKey {
                kcobj: self.obj,
                txg,
            });
        }

        Ok(RwLockReadGuard::map(inner, |inner| &inner.entries[idx - 1].key))
    }

    /// Rotate to `raw`, effective at `txg`.
    ///
    /// The new key uses the algorithm of the current newest key. `txg` must
    /// be after every existing entry.
    pub fn add_key<S: ObjectStore + ?Sized>(&self, store: &S, raw: &[u8], txg: u64) -> Result<()> {
        self.append(store, txg, |crypt| create_key(crypt, raw))
    }

    /// Rotate to a freshly generated key, effective at `txg`.
    pub fn add_random_key<S: ObjectStore + ?Sized>(&self, store: &S, txg: u64) -> Result<()> {
        self.append(store, txg, generate_key)
    }

    fn append<S, F>(&self, store: &S, txg: u64, make_key: F) -> Result<()>
    where
        S: ObjectStore + ?Sized,
        F: FnOnce(CryptAlgorithm) -> dslcrypt_core::Result<KeyMaterial>,
    {
        let mut inner = self.inner.write();
        let wkey = self.open_wkey(&inner)?;

        let (max, crypt) = match inner.entries.last() {
            Some(last) => (last.txg, last.key.crypt()),
            None => return Err(self.empty()),
        };
        if txg <= max {
            return Err(KeyError::InvalidTxgOrder { txg, max });
        }

        let key = make_key(crypt)?;
        let phys = DslCryptoKeyPhys::seal(&wkey, &key)?;

        let mut tx = Transaction::new(txg);
        tx.put_record(self.obj, txg, phys.to_bytes().to_vec());
        commit(store, tx, self.obj)?;

        tracing::info!(
            kcobj = %self.obj,
            txg,
            key = %key.fingerprint(),
            "added key to keychain"
        );
        inner.entries.push(KeychainEntry { txg, key });
        Ok(())
    }

    /// Clone this keychain into a new object for a dataset cloned at
    /// `at_txg`.
    ///
    /// The clone holds copies of every entry effective up to `at_txg`,
    /// re-wrapped with fresh IVs under the same shared wrapping key, and
    /// rotates independently afterwards.
    pub fn clone_at<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        at_txg: u64,
        tag: &'static str,
    ) -> Result<KeychainHold> {
        let inner = self.inner.write();
        let wkey = self.open_wkey(&inner)?;

        let mut copies = Vec::new();
        for entry in inner.entries.iter().take_while(|e| e.txg <= at_txg) {
            copies.push(KeychainEntry {
                txg: entry.txg,
                key: entry.key.duplicate()?,
            });
        }
        if copies.is_empty() {
            return Err(KeyError::NoApplicableKey {
                kcobj: self.obj,
                txg: at_txg,
            });
        }

        let obj = store.allocate_object()?;
        let mut tx = Transaction::new(at_txg);
        tx.create_object(obj);
        for entry in &copies {
            let phys = DslCryptoKeyPhys::seal(&wkey, &entry.key)?;
            tx.put_record(obj, entry.txg, phys.to_bytes().to_vec());
        }
        commit(store, tx, obj)?;
        drop(inner);

        tracing::info!(
            kcobj = %obj,
            origin = %self.obj,
            at_txg,
            entries = copies.len(),
            "cloned keychain"
        );
        Ok(Self::open_with(obj, copies, wkey, tag))
    }

    /// Re-wrap every entry under `new_wkey`, committing all records in one
    /// transaction at `txg`, then release the old wrapping key.
    ///
    /// On failure the chain keeps its old wrapping key.
    pub fn rewrap<S: ObjectStore + ?Sized>(
        &self,
        store: &S,
        new_wkey: Arc<WrappingKey>,
        txg: u64,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let old = self.open_wkey(&inner)?;

        let mut tx = Transaction::new(txg);
        for entry in &inner.entries {
            let phys = DslCryptoKeyPhys::seal(&new_wkey, &entry.key)?;
            tx.put_record(self.obj, entry.txg, phys.to_bytes().to_vec());
        }
        commit(store, tx, self.obj)?;

        tracing::info!(
            kcobj = %self.obj,
            txg,
            entries = inner.entries.len(),
            old_wkey = %old.fingerprint(),
            new_wkey = %new_wkey.fingerprint(),
            "rewrapped keychain"
        );
        inner.wkey = Some(new_wkey);
        Ok(())
    }

    fn open_wkey(&self, inner: &KeychainInner) -> Result<Arc<WrappingKey>> {
        inner
            .wkey
            .as_ref()
            .map(Arc::clone)
            .ok_or(KeyError::NotLoaded(self.obj))
    }

    fn empty(&self) -> KeyError {
        KeyError::Corrupted(format!("open keychain {} has no keys", self.obj))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    /// The keychain object id (`kcobj`).
    pub fn object(&self) -> ObjectId {
        self.obj
    }

    /// Number of live holds.
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// Tags of live holds. Only tracked in debug builds; empty otherwise.
    pub fn holders(&self) -> Vec<&'static str> {
        #[cfg(debug_assertions)]
        {
            self.holders.lock().clone()
        }
        #[cfg(not(debug_assertions))]
        {
            Vec::new()
        }
    }

    pub fn state(&self) -> KeychainState {
        if self.inner.read_recursive().wkey.is_some() {
            KeychainState::Open
        } else {
            KeychainState::Closed
        }
    }

    pub fn entry_count(&self) -> usize {
        self.inner.read_recursive().entries.len()
    }

    /// Effective txgs of all entries, ascending.
    pub fn entry_txgs(&self) -> Vec<u64> {
        self.inner.read_recursive().entries.iter().map(|e| e.txg).collect()
    }

    /// Txg of the newest entry.
    pub fn max_txg(&self) -> Option<u64> {
        self.inner.read_recursive().entries.last().map(|e| e.txg)
    }

    /// Algorithm of the newest entry.
    pub fn crypt(&self) -> Option<CryptAlgorithm> {
        self.inner.read_recursive().entries.last().map(|e| e.key.crypt())
    }

    /// The shared wrapping key, if open.
    pub fn wrapping_key(&self) -> Option<Arc<WrappingKey>> {
        self.inner.read_recursive().wkey.clone()
    }
}

impl fmt::Debug for Keychain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keychain")
            .field("obj", &self.obj)
            .field("refcount", &self.refcount())
            .field("state", &self.state())
            .field("entries", &self.entry_txgs())
            .finish()
    }
}

fn commit<S: ObjectStore + ?Sized>(store: &S, tx: Transaction, obj: ObjectId) -> Result<()> {
    let txg = tx.txg();
    store.commit(tx).map_err(|e| {
        tracing::error!(kcobj = %obj, txg, error = %e, "keychain transaction failed");
        KeyError::Transaction(e)
    })
}
