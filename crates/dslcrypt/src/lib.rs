//! # dslcrypt
//!
//! The encryption key hierarchy of a storage pool: versioned keychains of
//! data-encryption keys, and the keystore that caches unwrapped keychains
//! for active use.
//!
//! ## Overview
//!
//! - **Wrapping keys** encrypt data keys and never touch data. They come
//!   from raw bytes or a passphrase.
//! - **Keychains** hold every version of a dataset's data key, each
//!   effective from a transaction group (txg) on. Rotation appends a new
//!   version; old data stays readable through the old ones.
//! - **The keystore** indexes loaded keychains by object and by dataset.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use dslcrypt::{Keystore, KeystoreConfig};
//! use dslcrypt::core::{CryptAlgorithm, WrappingKey};
//! use dslcrypt::store::SqliteObjectStore;
//!
//! fn example() -> dslcrypt::Result<()> {
//!     let store = SqliteObjectStore::open("pool.db")?;
//!     let keystore = Keystore::new(store, KeystoreConfig::default());
//!
//!     let wkey = Arc::new(WrappingKey::from_raw(CryptAlgorithm::Aes256Ccm, &[7u8; 32])?);
//!     let kcobj = keystore.create_keychain(wkey, CryptAlgorithm::On, 10)?;
//!
//!     // Rotate at txg 50; blocks from txg 10..50 keep using the first key.
//!     keystore.add_key(kcobj, 50)?;
//!
//!     let keychain = keystore.lookup(kcobj, "example")?;
//!     let key = keychain.lookup_key(30)?;
//!     println!("txg 30 uses key {}", key.fingerprint());
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `dslcrypt::core` - Algorithm table, crypto engine, wrapping keys
//! - `dslcrypt::store` - Object store abstraction and SQLite

pub mod command;
pub mod config;
pub mod error;
pub mod keychain;
pub mod keystore;

// Re-export component crates
pub use dslcrypt_core as core;
pub use dslcrypt_store as store;

// Re-export main types for convenience
pub use command::{CommandKind, KeyCommand};
pub use config::KeystoreConfig;
pub use error::{KeyError, Result};
pub use keychain::{Keychain, KeychainHold, KeychainState};
pub use keystore::{DatasetKeyInfo, KeyStatus, Keystore, DATASET_INDEX_TAG, KEYSTORE_TAG};

// Re-export commonly used core types
pub use dslcrypt_core::{
    CryptAlgorithm, DatasetId, KdfParams, KeyFingerprint, KeyMaterial, ObjectId, WrappingKey,
    WrappingKeyProps,
};
