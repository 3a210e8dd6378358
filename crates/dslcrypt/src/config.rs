//! Keystore configuration.

use dslcrypt_core::{CryptAlgorithm, KdfParams};
use serde::{Deserialize, Serialize};

/// Configuration for the Keystore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Algorithm for wrapping keys built from raw bytes.
    pub wrapping_crypt: CryptAlgorithm,
    /// Data-key algorithm used when a caller asks for `on`.
    pub default_crypt: CryptAlgorithm,
    /// Argon2id parameters for passphrase-derived wrapping keys.
    pub kdf: KdfParams,
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            wrapping_crypt: CryptAlgorithm::ON_VALUE,
            default_crypt: CryptAlgorithm::ON_VALUE,
            kdf: KdfParams::default(),
        }
    }
}

impl KeystoreConfig {
    /// Resolve `on` and `inherit` to the configured data-key algorithm.
    pub fn resolve_crypt(&self, crypt: CryptAlgorithm) -> CryptAlgorithm {
        match crypt {
            CryptAlgorithm::On | CryptAlgorithm::Inherit => self.default_crypt,
            other => other,
        }
    }
}
