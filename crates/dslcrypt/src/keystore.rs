//! The Keystore: pool-wide index of loaded keychains.
//!
//! The keystore owns one hold on every loaded keychain and one more per
//! dataset indexed to it. Both maps sit behind a single reader/writer lock
//! that is only held for map changes; unwrapping happens before the lock is
//! taken, so loads of different keychains do not serialize on crypto work.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::sync::Arc;

use dslcrypt_core::{CryptAlgorithm, DatasetId, ObjectId, WrappingKey, WrappingKeyProps};
use dslcrypt_store::ObjectStore;
use parking_lot::RwLock;

use crate::command::KeyCommand;
use crate::config::KeystoreConfig;
use crate::error::{KeyError, Result};
use crate::keychain::{Keychain, KeychainHold};

/// Tag of the keystore's own hold on each loaded keychain.
pub const KEYSTORE_TAG: &str = "keystore";

/// Tag of the hold each dataset index entry keeps on its keychain.
pub const DATASET_INDEX_TAG: &str = "dataset index";

/// Encryption facts about a dataset, as recorded by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatasetKeyInfo {
    pub dsobj: DatasetId,
    /// The dataset's keychain object; `None` if unencrypted.
    pub keychain: Option<ObjectId>,
}

impl DatasetKeyInfo {
    pub fn unencrypted(dsobj: DatasetId) -> Self {
        Self {
            dsobj,
            keychain: None,
        }
    }

    pub fn encrypted(dsobj: DatasetId, kcobj: ObjectId) -> Self {
        Self {
            dsobj,
            keychain: Some(kcobj),
        }
    }
}

/// Whether a dataset's keys can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyStatus {
    /// The dataset is not encrypted.
    None,
    /// Encrypted, but its keychain is not loaded.
    Unavailable,
    /// Encrypted and loaded.
    Available,
}

struct KeystoreInner {
    keychains: BTreeMap<ObjectId, KeychainHold>,
    /// Each entry holds its keychain, so every indexed keychain is loaded.
    index: BTreeMap<DatasetId, KeychainHold>,
}

/// The pool-wide keystore.
pub struct Keystore<S: ObjectStore> {
    store: Arc<S>,
    config: KeystoreConfig,
    inner: RwLock<KeystoreInner>,
}

impl<S: ObjectStore> Keystore<S> {
    /// Create an empty keystore over `store`.
    pub fn new(store: S, config: KeystoreConfig) -> Self {
        Self::with_shared_store(Arc::new(store), config)
    }

    /// Create an empty keystore over a store shared with other components.
    pub fn with_shared_store(store: Arc<S>, config: KeystoreConfig) -> Self {
        tracing::debug!(?config, "initialized keystore");
        Self {
            store,
            config,
            inner: RwLock::new(KeystoreInner {
                keychains: BTreeMap::new(),
                index: BTreeMap::new(),
            }),
        }
    }

    /// Get the store reference.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &KeystoreConfig {
        &self.config
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lookup
    // ─────────────────────────────────────────────────────────────────────────

    /// Hold a loaded keychain.
    pub fn lookup(&self, kcobj: ObjectId, tag: &'static str) -> Result<KeychainHold> {
        self.inner
            .read()
            .keychains
            .get(&kcobj)
            .map(|kc| kc.hold(tag))
            .ok_or(KeyError::NotLoaded(kcobj))
    }

    /// Hold the keychain a dataset is indexed to.
    pub fn lookup_by_dataset(&self, dsobj: DatasetId, tag: &'static str) -> Result<KeychainHold> {
        self.inner
            .read()
            .index
            .get(&dsobj)
            .map(|kc| kc.hold(tag))
            .ok_or(KeyError::NotIndexed(dsobj))
    }

    pub fn is_loaded(&self, kcobj: ObjectId) -> bool {
        self.inner.read().keychains.contains_key(&kcobj)
    }

    /// Ids of all loaded keychains, ascending.
    pub fn loaded(&self) -> Vec<ObjectId> {
        self.inner.read().keychains.keys().copied().collect()
    }

    /// All dataset index entries, ascending by dataset.
    pub fn indexed(&self) -> Vec<(DatasetId, ObjectId)> {
        self.inner
            .read()
            .index
            .iter()
            .map(|(ds, kc)| (*ds, kc.object()))
            .collect()
    }

    /// Key status of a dataset.
    pub fn key_status(&self, dataset: &DatasetKeyInfo) -> KeyStatus {
        let Some(kcobj) = dataset.keychain else {
            return KeyStatus::None;
        };

        let inner = self.inner.read();
        if inner.index.contains_key(&dataset.dsobj) || inner.keychains.contains_key(&kcobj) {
            KeyStatus::Available
        } else {
            KeyStatus::Unavailable
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Load / Unload
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a loaded keychain. The keystore takes its own hold.
    pub fn insert(&self, keychain: &KeychainHold) -> Result<()> {
        self.insert_hold(keychain.hold(KEYSTORE_TAG))
    }

    fn insert_hold(&self, hold: KeychainHold) -> Result<()> {
        let kcobj = hold.object();
        let mut inner = self.inner.write();
        if inner.keychains.contains_key(&kcobj) {
            drop(inner);
            drop(hold);
            return Err(KeyError::AlreadyLoaded(kcobj));
        }
        inner.keychains.insert(kcobj, hold);
        drop(inner);

        tracing::debug!(%kcobj, "inserted keychain into keystore");
        Ok(())
    }

    /// Unlock keychain `kcobj` with raw wrapping-key bytes of the configured
    /// wrapping algorithm.
    pub fn load(&self, kcobj: ObjectId, wkey_bytes: &[u8]) -> Result<()> {
        let wkey = WrappingKey::from_raw(self.config.wrapping_crypt, wkey_bytes)?;
        self.load_with_key(kcobj, Arc::new(wkey))
    }

    /// Unlock keychain `kcobj` with a wrapping key built from `props`.
    pub fn load_with_props(&self, kcobj: ObjectId, props: &WrappingKeyProps) -> Result<()> {
        let wkey = WrappingKey::from_props(props, &self.config.kdf)?;
        self.load_with_key(kcobj, Arc::new(wkey))
    }

    /// Unlock keychain `kcobj` with `wkey`.
    ///
    /// Reads and unwraps without the keystore lock; a concurrent load of the
    /// same keychain loses with [`KeyError::AlreadyLoaded`].
    pub fn load_with_key(&self, kcobj: ObjectId, wkey: Arc<WrappingKey>) -> Result<()> {
        if self.is_loaded(kcobj) {
            return Err(KeyError::AlreadyLoaded(kcobj));
        }

        let owner = wkey.owner();
        let hold = Keychain::open(&*self.store, kcobj, wkey, KEYSTORE_TAG)?;
        let entries = hold.entry_count();
        self.insert_hold(hold)?;

        tracing::info!(%kcobj, entries, ?owner, "loaded keychain");
        Ok(())
    }

    /// Lock keychain `kcobj`, dropping the keystore's hold.
    ///
    /// Refuses with [`KeyError::Busy`] while anything else holds it,
    /// including dataset index entries.
    pub fn unload(&self, kcobj: ObjectId) -> Result<()> {
        let mut inner = self.inner.write();
        let holds = inner
            .keychains
            .get(&kcobj)
            .map(|kc| kc.refcount())
            .ok_or(KeyError::NotLoaded(kcobj))?;
        if holds > 1 {
            return Err(KeyError::Busy { kcobj, holds });
        }
        let hold = inner.keychains.remove(&kcobj);
        drop(inner);
        drop(hold);

        tracing::info!(%kcobj, "unloaded keychain");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dataset Index
    // ─────────────────────────────────────────────────────────────────────────

    /// Index dataset `dsobj` to loaded keychain `kcobj`.
    pub fn create_index(&self, dsobj: DatasetId, kcobj: ObjectId) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.index.contains_key(&dsobj) {
            return Err(KeyError::AlreadyIndexed(dsobj));
        }
        let hold = inner
            .keychains
            .get(&kcobj)
            .map(|kc| kc.hold(DATASET_INDEX_TAG))
            .ok_or(KeyError::NotLoaded(kcobj))?;
        inner.index.insert(dsobj, hold);

        tracing::debug!(%dsobj, %kcobj, "indexed dataset");
        Ok(())
    }

    pub fn remove_index(&self, dsobj: DatasetId) -> Result<()> {
        let mut inner = self.inner.write();
        let hold = inner.index.remove(&dsobj).ok_or(KeyError::NotIndexed(dsobj))?;
        drop(inner);

        tracing::debug!(%dsobj, kcobj = %hold.object(), "removed dataset index");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Keychain Management
    // ─────────────────────────────────────────────────────────────────────────

    /// Create and load a keychain with a fresh key of `crypt` (`on` resolves
    /// to the configured default) effective at `txg`.
    pub fn create_keychain(
        &self,
        wkey: Arc<WrappingKey>,
        crypt: CryptAlgorithm,
        txg: u64,
    ) -> Result<ObjectId> {
        let crypt = self.config.resolve_crypt(crypt);
        let hold = Keychain::create(&*self.store, wkey, crypt, txg, KEYSTORE_TAG)?;
        let kcobj = hold.object();
        self.insert_hold(hold)?;
        Ok(kcobj)
    }

    /// Clone loaded keychain `origin` at `txg` and load the clone.
    pub fn clone_keychain(&self, origin: ObjectId, txg: u64) -> Result<ObjectId> {
        let parent = self.lookup(origin, "clone origin")?;
        let clone = parent.clone_at(&*self.store, txg, KEYSTORE_TAG)?;
        let kcobj = clone.object();
        self.insert_hold(clone)?;
        Ok(kcobj)
    }

    /// Rotate loaded keychain `kcobj` to a random key effective at `txg`.
    pub fn add_key(&self, kcobj: ObjectId, txg: u64) -> Result<()> {
        self.lookup(kcobj, "add key")?
            .add_random_key(&*self.store, txg)
    }

    /// Rotate loaded keychain `kcobj` to `raw`, effective at `txg`.
    pub fn add_key_raw(&self, kcobj: ObjectId, raw: &[u8], txg: u64) -> Result<()> {
        self.lookup(kcobj, "add key")?
            .add_key(&*self.store, raw, txg)
    }

    /// Re-wrap loaded keychain `kcobj` under `new_wkey`.
    pub fn rewrap(&self, kcobj: ObjectId, new_wkey: Arc<WrappingKey>, txg: u64) -> Result<()> {
        self.lookup(kcobj, "rewrap")?
            .rewrap(&*self.store, new_wkey, txg)
    }

    /// Re-wrap loaded keychain `kcobj` under a key built from `props`.
    pub fn rewrap_with_props(
        &self,
        kcobj: ObjectId,
        props: &WrappingKeyProps,
        txg: u64,
    ) -> Result<()> {
        let wkey = WrappingKey::from_props(props, &self.config.kdf)?;
        self.rewrap(kcobj, Arc::new(wkey), txg)
    }

    /// Destroy keychain `kcobj`, unloading it first if loaded.
    ///
    /// Refuses with [`KeyError::Busy`] while anything but the keystore holds
    /// it. The keychain stays loaded if the destroy transaction fails.
    ///
    /// The keystore lock is released before the transaction commits, so
    /// other keychains stay reachable meanwhile. `kcobj` itself reads as not
    /// loaded until the commit settles.
    pub fn destroy_keychain(&self, kcobj: ObjectId, txg: u64) -> Result<()> {
        let hold = {
            let mut inner = self.inner.write();
            if let Some(kc) = inner.keychains.get(&kcobj) {
                let holds = kc.refcount();
                if holds > 1 {
                    return Err(KeyError::Busy { kcobj, holds });
                }
            }
            inner.keychains.remove(&kcobj)
        };

        if let Err(e) = Keychain::destroy(&*self.store, kcobj, txg) {
            if let Some(hold) = hold {
                // A racing load may have refilled the slot; keep that one.
                if let Entry::Vacant(slot) = self.inner.write().keychains.entry(kcobj) {
                    slot.insert(hold);
                }
            }
            return Err(e);
        }

        drop(hold);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Administration
    // ─────────────────────────────────────────────────────────────────────────

    /// Run an administrative command.
    pub fn execute(&self, cmd: &KeyCommand) -> Result<()> {
        tracing::debug!(kind = ?cmd.kind(), kcobj = %cmd.kcobj(), "executing key command");
        match cmd {
            KeyCommand::LoadKey { kcobj, props } => self.load_with_props(*kcobj, props),
            KeyCommand::UnloadKey { kcobj } => self.unload(*kcobj),
            KeyCommand::AddKey { kcobj, txg } => self.add_key(*kcobj, *txg),
            KeyCommand::Rewrap { kcobj, props, txg } => self.rewrap_with_props(*kcobj, props, *txg),
        }
    }

    /// Decode and run a CBOR-encoded administrative command.
    pub fn execute_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.execute(&KeyCommand::from_bytes(bytes)?)
    }

    /// Check that the keystore is empty before the pool closes.
    ///
    /// Fails with [`KeyError::Busy`] naming a keychain that is still loaded
    /// or indexed.
    pub fn fini(&self) -> Result<()> {
        let inner = self.inner.read();
        if let Some(hold) = inner.index.values().next().or_else(|| inner.keychains.values().next())
        {
            return Err(KeyError::Busy {
                kcobj: hold.object(),
                holds: hold.refcount(),
            });
        }
        Ok(())
    }
}

impl<S: ObjectStore> Drop for Keystore<S> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if !inner.keychains.is_empty() || !inner.index.is_empty() {
            tracing::warn!(
                loaded = inner.keychains.len(),
                indexed = inner.index.len(),
                "keystore dropped with keychains loaded"
            );
        }
        // Index holds first, then the keystore's own.
        inner.index.clear();
        inner.keychains.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dslcrypt_core::KdfParams;
    use dslcrypt_store::MemoryObjectStore;

    const WKEY: [u8; 32] = [0x5c; 32];

    fn keystore() -> Keystore<MemoryObjectStore> {
        let config = KeystoreConfig {
            kdf: KdfParams {
                memory_kib: 256,
                time_cost: 1,
                parallelism: 1,
            },
            ..KeystoreConfig::default()
        };
        Keystore::new(MemoryObjectStore::new(), config)
    }

    fn wkey() -> Arc<WrappingKey> {
        Arc::new(WrappingKey::from_raw(CryptAlgorithm::Aes256Ccm, &WKEY).unwrap())
    }

    #[test]
    fn test_create_lookup_unload() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();

        {
            let kc = ks.lookup(kcobj, "test").unwrap();
            assert_eq!(kc.crypt(), Some(CryptAlgorithm::Aes256Ccm));
            assert_eq!(kc.refcount(), 2);
            assert!(matches!(ks.unload(kcobj), Err(KeyError::Busy { holds: 2, .. })));
        }

        ks.unload(kcobj).unwrap();
        assert!(matches!(ks.lookup(kcobj, "test"), Err(KeyError::NotLoaded(_))));
        assert!(matches!(ks.unload(kcobj), Err(KeyError::NotLoaded(_))));
    }

    #[test]
    fn test_load_after_unload() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::Aes128Gcm, 4).unwrap();
        ks.unload(kcobj).unwrap();

        ks.load(kcobj, &WKEY).unwrap();
        assert_eq!(ks.lookup(kcobj, "test").unwrap().entry_txgs(), vec![4]);
        assert!(matches!(ks.load(kcobj, &WKEY), Err(KeyError::AlreadyLoaded(_))));
    }

    #[test]
    fn test_load_wrong_key() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();
        ks.unload(kcobj).unwrap();

        let err = ks.load(kcobj, &[0u8; 32]).unwrap_err();
        assert!(err.is_auth_failure());
        assert!(!ks.is_loaded(kcobj));
    }

    #[test]
    fn test_insert_twice() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();
        let hold = ks.lookup(kcobj, "test").unwrap();

        assert!(matches!(ks.insert(&hold), Err(KeyError::AlreadyLoaded(_))));
        assert_eq!(hold.refcount(), 2);
    }

    #[test]
    fn test_index_lifecycle() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();
        let ds = DatasetId::new(40);

        assert!(matches!(
            ks.create_index(ds, ObjectId::new(999)),
            Err(KeyError::NotLoaded(_))
        ));
        ks.create_index(ds, kcobj).unwrap();
        assert!(matches!(ks.create_index(ds, kcobj), Err(KeyError::AlreadyIndexed(_))));
        assert_eq!(ks.indexed(), vec![(ds, kcobj)]);
        assert_eq!(ks.lookup_by_dataset(ds, "test").unwrap().object(), kcobj);

        // The index entry holds the keychain.
        assert!(matches!(ks.unload(kcobj), Err(KeyError::Busy { .. })));

        ks.remove_index(ds).unwrap();
        assert!(matches!(ks.remove_index(ds), Err(KeyError::NotIndexed(_))));
        assert!(matches!(
            ks.lookup_by_dataset(ds, "test"),
            Err(KeyError::NotIndexed(_))
        ));
        ks.unload(kcobj).unwrap();
    }

    #[test]
    fn test_key_status() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();
        let ds = DatasetId::new(7);

        assert_eq!(ks.key_status(&DatasetKeyInfo::unencrypted(ds)), KeyStatus::None);
        assert_eq!(
            ks.key_status(&DatasetKeyInfo::encrypted(ds, kcobj)),
            KeyStatus::Available
        );

        ks.unload(kcobj).unwrap();
        assert_eq!(
            ks.key_status(&DatasetKeyInfo::encrypted(ds, kcobj)),
            KeyStatus::Unavailable
        );
    }

    #[test]
    fn test_key_status_through_index() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();
        let ds = DatasetId::new(7);
        ks.create_index(ds, kcobj).unwrap();

        // The index entry alone makes the key available.
        let unloaded = ObjectId::new(999);
        assert!(!ks.is_loaded(unloaded));
        assert_eq!(
            ks.key_status(&DatasetKeyInfo::encrypted(ds, unloaded)),
            KeyStatus::Available
        );
        assert_eq!(
            ks.key_status(&DatasetKeyInfo::encrypted(DatasetId::new(8), unloaded)),
            KeyStatus::Unavailable
        );

        assert!(matches!(ks.unload(kcobj), Err(KeyError::Busy { .. })));
        ks.remove_index(ds).unwrap();
        ks.unload(kcobj).unwrap();
        assert_eq!(
            ks.key_status(&DatasetKeyInfo::encrypted(ds, kcobj)),
            KeyStatus::Unavailable
        );
    }

    #[test]
    fn test_clone_keychain() {
        let ks = keystore();
        let origin = ks.create_keychain(wkey(), CryptAlgorithm::On, 10).unwrap();
        ks.add_key(origin, 20).unwrap();

        let clone = ks.clone_keychain(origin, 15).unwrap();
        assert_eq!(ks.loaded(), vec![origin, clone]);
        assert_eq!(ks.lookup(clone, "test").unwrap().entry_txgs(), vec![10]);
    }

    #[test]
    fn test_rewrap_with_passphrase_then_reload() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();
        let props = WrappingKeyProps::passphrase(CryptAlgorithm::On, "new passphrase", b"pool salt".to_vec());

        ks.rewrap_with_props(kcobj, &props, 2).unwrap();
        ks.unload(kcobj).unwrap();

        assert!(ks.load(kcobj, &WKEY).unwrap_err().is_auth_failure());
        ks.load_with_props(kcobj, &props).unwrap();
    }

    #[test]
    fn test_destroy_keychain() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();

        let hold = ks.lookup(kcobj, "test").unwrap();
        assert!(matches!(
            ks.destroy_keychain(kcobj, 2),
            Err(KeyError::Busy { .. })
        ));
        drop(hold);

        ks.destroy_keychain(kcobj, 2).unwrap();
        assert!(!ks.is_loaded(kcobj));
        assert!(!ks.store().object_exists(kcobj).unwrap());
    }

    #[test]
    fn test_destroy_failure_keeps_loaded() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();
        ks.store().fail_next_commit("injected");

        assert!(matches!(
            ks.destroy_keychain(kcobj, 2),
            Err(KeyError::Transaction(_))
        ));
        assert!(ks.is_loaded(kcobj));
    }

    #[test]
    fn test_fini() {
        let ks = keystore();
        ks.fini().unwrap();

        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();
        assert!(matches!(ks.fini(), Err(KeyError::Busy { kcobj: k, .. }) if k == kcobj));

        ks.unload(kcobj).unwrap();
        ks.fini().unwrap();
    }

    #[test]
    fn test_drop_releases_holds() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();
        ks.create_index(DatasetId::new(1), kcobj).unwrap();
        let outside = ks.lookup(kcobj, "outside").unwrap();
        assert_eq!(outside.refcount(), 3);

        drop(ks);
        assert_eq!(outside.refcount(), 1);
    }

    #[test]
    fn test_execute_commands() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();

        let add = KeyCommand::AddKey { kcobj, txg: 9 };
        ks.execute_bytes(&add.to_bytes().unwrap()).unwrap();
        assert_eq!(ks.lookup(kcobj, "test").unwrap().entry_txgs(), vec![1, 9]);

        ks.execute(&KeyCommand::UnloadKey { kcobj }).unwrap();
        assert!(!ks.is_loaded(kcobj));

        let load = KeyCommand::LoadKey {
            kcobj,
            props: WrappingKeyProps::raw(CryptAlgorithm::Aes256Ccm, WKEY.to_vec()),
        };
        ks.execute_bytes(&load.to_bytes().unwrap()).unwrap();
        assert!(ks.is_loaded(kcobj));
    }

    #[test]
    fn test_loaded_key_keeps_owner() {
        let ks = keystore();
        let kcobj = ks.create_keychain(wkey(), CryptAlgorithm::On, 1).unwrap();
        let ds = DatasetId::new(40);
        assert_eq!(ks.lookup(kcobj, "test").unwrap().wrapping_key().unwrap().owner(), None);
        ks.unload(kcobj).unwrap();

        let load = KeyCommand::LoadKey {
            kcobj,
            props: WrappingKeyProps::raw(CryptAlgorithm::Aes256Ccm, WKEY.to_vec()).owned_by(ds),
        };
        ks.execute_bytes(&load.to_bytes().unwrap()).unwrap();

        let kc = ks.lookup(kcobj, "test").unwrap();
        assert_eq!(kc.wrapping_key().unwrap().owner(), Some(ds));
    }
}
