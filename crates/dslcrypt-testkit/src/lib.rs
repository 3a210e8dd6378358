//! # dslcrypt Testkit
//!
//! Testing utilities for dslcrypt.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Known-answer vectors**: Wrapped-key records and bulk-encryption
//!   results computed by an independent AES implementation
//! - **Generators**: Proptest strategies for algorithms, keys, txg sequences
//!   and whole keychains
//! - **Fixtures**: A keystore with a wrapping key and a txg counter
//!
//! ## Known-Answer Vectors
//!
//! ```rust
//! use dslcrypt_testkit::vectors::verify_all_vectors;
//!
//! for (name, matches, detail) in verify_all_vectors() {
//!     assert!(matches, "{}: {}", name, detail);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use dslcrypt_store::MemoryObjectStore;
//! use dslcrypt_testkit::generators::{keychain_from_params, KeychainParams};
//!
//! proptest! {
//!     #[test]
//!     fn newest_entry_wins(params: KeychainParams) {
//!         let store = MemoryObjectStore::new();
//!         let kc = keychain_from_params(&store, &params).unwrap();
//!         prop_assert_eq!(kc.max_txg(), params.txgs.last().copied());
//!     }
//! }
//! ```
//!
//! ## Test Fixtures
//!
//! ```rust
//! use dslcrypt_core::CryptAlgorithm;
//! use dslcrypt_testkit::fixtures::PoolFixture;
//!
//! let mut fixture = PoolFixture::new();
//! let kcobj = fixture.create_keychain(CryptAlgorithm::On).unwrap();
//! fixture.rotate(kcobj, 2).unwrap();
//! fixture.unload_all().unwrap();
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{fast_config, multi_pool_fixtures, PoolFixture, FAST_KDF};
pub use generators::{keychain_from_params, KeychainParams};
pub use vectors::{aead_vectors, verify_all_vectors, wrap_vectors, AeadVector, WrapVector};
