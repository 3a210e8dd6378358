//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::path::Path;
use std::sync::Arc;

use dslcrypt::{Keystore, KeystoreConfig};
use dslcrypt_core::{CryptAlgorithm, KdfParams, ObjectId, WrappingKey};
use dslcrypt_store::{MemoryObjectStore, ObjectStore, SqliteObjectStore};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

/// Argon2 parameters cheap enough for tests. Never use outside tests.
pub const FAST_KDF: KdfParams = KdfParams {
    memory_kib: 256,
    time_cost: 1,
    parallelism: 1,
};

/// Keystore configuration with [`FAST_KDF`].
pub fn fast_config() -> KeystoreConfig {
    KeystoreConfig {
        kdf: FAST_KDF,
        ..KeystoreConfig::default()
    }
}

/// A keystore over a store, a wrapping key, and a txg counter.
pub struct PoolFixture<S: ObjectStore = MemoryObjectStore> {
    pub keystore: Keystore<S>,
    wkey_bytes: [u8; 32],
    txg: u64,
}

impl PoolFixture<MemoryObjectStore> {
    /// Create an in-memory fixture with a random wrapping key.
    pub fn new() -> Self {
        let mut wkey_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut wkey_bytes);
        Self::build(MemoryObjectStore::new(), wkey_bytes)
    }

    /// Create with a deterministic wrapping key from seed.
    pub fn with_seed(seed: u64) -> Self {
        let mut wkey_bytes = [0u8; 32];
        StdRng::seed_from_u64(seed).fill_bytes(&mut wkey_bytes);
        Self::build(MemoryObjectStore::new(), wkey_bytes)
    }
}

impl PoolFixture<SqliteObjectStore> {
    /// Open a SQLite-backed fixture at `path` with a deterministic wrapping
    /// key, so a second fixture on the same path can load what the first
    /// wrote.
    pub fn on_disk(path: impl AsRef<Path>, seed: u64) -> dslcrypt::Result<Self> {
        let store = SqliteObjectStore::open(path)?;
        let mut wkey_bytes = [0u8; 32];
        StdRng::seed_from_u64(seed).fill_bytes(&mut wkey_bytes);
        Ok(Self::build(store, wkey_bytes))
    }
}

impl<S: ObjectStore> PoolFixture<S> {
    fn build(store: S, wkey_bytes: [u8; 32]) -> Self {
        Self {
            keystore: Keystore::new(store, fast_config()),
            wkey_bytes,
            txg: 0,
        }
    }

    /// Raw bytes of the fixture's wrapping key.
    pub fn wkey_bytes(&self) -> &[u8; 32] {
        &self.wkey_bytes
    }

    /// The fixture's wrapping key, under the configured wrapping algorithm.
    pub fn wrapping_key(&self) -> dslcrypt::Result<Arc<WrappingKey>> {
        let crypt = self.keystore.config().wrapping_crypt;
        Ok(Arc::new(WrappingKey::from_raw(crypt, &self.wkey_bytes)?))
    }

    /// Advance and return the txg counter.
    pub fn next_txg(&mut self) -> u64 {
        self.txg += 1;
        self.txg
    }

    /// Create and load a keychain of `crypt` at the next txg.
    pub fn create_keychain(&mut self, crypt: CryptAlgorithm) -> dslcrypt::Result<ObjectId> {
        let txg = self.next_txg();
        let wkey = self.wrapping_key()?;
        self.keystore.create_keychain(wkey, crypt, txg)
    }

    /// Rotate `kcobj` `count` times, one txg apart. Returns the new txgs.
    pub fn rotate(&mut self, kcobj: ObjectId, count: usize) -> dslcrypt::Result<Vec<u64>> {
        let mut txgs = Vec::with_capacity(count);
        for _ in 0..count {
            let txg = self.next_txg();
            self.keystore.add_key(kcobj, txg)?;
            txgs.push(txg);
        }
        Ok(txgs)
    }

    /// Unload then load `kcobj` again from the store.
    pub fn reload(&self, kcobj: ObjectId) -> dslcrypt::Result<()> {
        self.keystore.unload(kcobj)?;
        self.keystore.load(kcobj, &self.wkey_bytes)
    }

    /// Unload every loaded keychain and drop every index entry.
    pub fn unload_all(&self) -> dslcrypt::Result<()> {
        for (dsobj, _) in self.keystore.indexed() {
            self.keystore.remove_index(dsobj)?;
        }
        for kcobj in self.keystore.loaded() {
            self.keystore.unload(kcobj)?;
        }
        Ok(())
    }
}

impl Default for PoolFixture<MemoryObjectStore> {
    fn default() -> Self {
        Self::new()
    }
}

/// Create fixtures with distinct deterministic wrapping keys.
pub fn multi_pool_fixtures(count: usize) -> Vec<PoolFixture> {
    (0..count as u64).map(PoolFixture::with_seed).collect()
}
