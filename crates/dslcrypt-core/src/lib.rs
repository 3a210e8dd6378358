//! # dslcrypt core
//!
//! Pure primitives for dataset encryption keys: the algorithm parameter
//! table, the AEAD engine, wrapping keys, and the on-disk wrapped-key record.
//!
//! This crate contains no storage and no shared state. Everything here is
//! computation over key material.
//!
//! ## Key Types
//!
//! - [`CryptAlgorithm`] - Persisted algorithm id, with `inherit`/`on` resolution
//! - [`CryptInfo`] - One row of the parameter table
//! - [`KeyMaterial`] - An unwrapped key, zeroized on drop
//! - [`WrappingKey`] - Key-encryption key, raw or passphrase-derived
//! - [`DslCryptoKeyPhys`] - 72-byte on-disk form of a wrapped key
//!
//! ## Wrapping
//!
//! Data keys are only ever persisted wrapped. See [`wrap_key`] and
//! [`DslCryptoKeyPhys::seal`].

pub mod algorithm;
pub mod crypto;
pub mod error;
pub mod phys;
pub mod types;
pub mod wkey;

pub use algorithm::{crypt_info, crypt_info_by_id, CryptAlgorithm, CryptInfo, CryptMode, MAC_LEN};
pub use crypto::{
    create_key, decrypt, decrypt_in_place, destroy_key, encrypt, encrypt_in_place, generate_iv,
    generate_key, unwrap_key, wrap_key, wrap_key_with_iv, KeyFingerprint, KeyMaterial, WrappedKey,
};
pub use error::{CryptoError, Result};
pub use phys::{DslCryptoKeyPhys, PHYS_LEN};
pub use types::{DatasetId, ObjectId};
pub use wkey::{KdfParams, KeySource, WrappingKey, WrappingKeyProps};
