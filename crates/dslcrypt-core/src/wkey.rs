//! Wrapping keys.
//!
//! A wrapping key only ever encrypts other keys. It is built from raw bytes
//! or derived from a passphrase, and shared through `Arc` by every keychain
//! whose entries it wraps; the last `Arc` dropped zeroizes it.

use argon2::{Algorithm, Argon2, Params, Version};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::algorithm::{crypt_info, CryptAlgorithm};
use crate::crypto::{create_key, generate_key, KeyFingerprint, KeyMaterial};
use crate::error::{CryptoError, Result};
use crate::types::DatasetId;

/// Argon2id parameters for passphrase-derived wrapping keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Iterations.
    pub time_cost: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

/// Where the bytes of a wrapping key come from.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub enum KeySource {
    /// Raw key bytes of the wrapping algorithm's key length.
    Raw(Vec<u8>),
    /// A passphrase stretched with Argon2id.
    Passphrase { passphrase: String, salt: Vec<u8> },
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raw(bytes) => write!(f, "Raw(<{} bytes>)", bytes.len()),
            Self::Passphrase { salt, .. } => {
                write!(f, "Passphrase(<redacted>, salt={})", hex::encode(salt))
            }
        }
    }
}

/// Administrative description of a wrapping key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WrappingKeyProps {
    /// Wrapping algorithm. `On` resolves to the default cipher.
    pub crypt: CryptAlgorithm,
    pub source: KeySource,
    /// Dataset the key belongs to, carried onto the built [`WrappingKey`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<DatasetId>,
}

impl WrappingKeyProps {
    pub fn raw(crypt: CryptAlgorithm, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            crypt,
            source: KeySource::Raw(bytes.into()),
            owner: None,
        }
    }

    pub fn passphrase(
        crypt: CryptAlgorithm,
        passphrase: impl Into<String>,
        salt: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            crypt,
            source: KeySource::Passphrase {
                passphrase: passphrase.into(),
                salt: salt.into(),
            },
            owner: None,
        }
    }

    /// Attribute the key to dataset `owner`.
    pub fn owned_by(mut self, owner: DatasetId) -> Self {
        self.owner = Some(owner);
        self
    }
}

/// A key-encryption key.
pub struct WrappingKey {
    key: KeyMaterial,
    owner: Option<DatasetId>,
}

impl WrappingKey {
    /// Build from raw bytes of `crypt`'s key length.
    pub fn from_raw(crypt: CryptAlgorithm, raw: &[u8]) -> Result<Self> {
        Ok(Self {
            key: create_key(crypt, raw)?,
            owner: None,
        })
    }

    /// Generate a random wrapping key.
    pub fn generate(crypt: CryptAlgorithm) -> Result<Self> {
        Ok(Self {
            key: generate_key(crypt)?,
            owner: None,
        })
    }

    /// Derive a wrapping key from a passphrase with Argon2id.
    pub fn from_passphrase(
        crypt: CryptAlgorithm,
        passphrase: &[u8],
        salt: &[u8],
        kdf: &KdfParams,
    ) -> Result<Self> {
        let key_len = crypt_info(crypt)?.key_len;
        let params = Params::new(kdf.memory_kib, kdf.time_cost, kdf.parallelism, Some(key_len))
            .map_err(|e| CryptoError::KeyDerivation(format!("invalid argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut raw = Zeroizing::new(vec![0u8; key_len]);
        argon2
            .hash_password_into(passphrase, salt, &mut raw)
            .map_err(|e| CryptoError::KeyDerivation(format!("argon2 failed: {e}")))?;

        Self::from_raw(crypt, &raw)
    }

    /// Build a wrapping key from its administrative description.
    pub fn from_props(props: &WrappingKeyProps, kdf: &KdfParams) -> Result<Self> {
        let crypt = props.crypt.resolve(CryptAlgorithm::DEFAULT);
        let mut key = match &props.source {
            KeySource::Raw(bytes) => Self::from_raw(crypt, bytes)?,
            KeySource::Passphrase { passphrase, salt } => {
                Self::from_passphrase(crypt, passphrase.as_bytes(), salt, kdf)?
            }
        };
        key.owner = props.owner;
        Ok(key)
    }

    /// Record the dataset that owns this key.
    pub fn with_owner(mut self, owner: DatasetId) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn owner(&self) -> Option<DatasetId> {
        self.owner
    }

    /// The wrapping algorithm.
    pub fn crypt(&self) -> CryptAlgorithm {
        self.key.crypt()
    }

    pub fn fingerprint(&self) -> KeyFingerprint {
        self.key.fingerprint()
    }

    /// The underlying key material.
    pub fn material(&self) -> &KeyMaterial {
        &self.key
    }

    /// Number of live holders of a shared wrapping key.
    pub fn holds(this: &Arc<Self>) -> usize {
        Arc::strong_count(this)
    }
}

impl fmt::Debug for WrappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrappingKey")
            .field("crypt", &self.crypt())
            .field("fingerprint", &self.fingerprint())
            .field("owner", &self.owner)
            .finish()
    }
}
