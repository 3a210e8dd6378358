//! The fixed-size on-disk record of one wrapped keychain entry.
//!
//! Layout (72 bytes):
//!
//! | offset | len | field |
//! |-------:|----:|-------|
//! | 0      | 8   | data-key algorithm id, little-endian |
//! | 8      | 13  | wrap IV, wrapping algorithm's IV length, rest zero |
//! | 21     | 3   | padding, zero |
//! | 24     | 48  | `ciphertext[key_len] \|\| mac[16]`, rest zero |

use std::fmt;

use crate::algorithm::{crypt_info, CryptAlgorithm, MAC_LEN, MAX_IV_LEN, MAX_KEY_LEN};
use crate::crypto::{create_key, wrap_key, wrap_key_with_iv, unwrap_key, KeyMaterial, WrappedKey};
use crate::error::{CryptoError, Result};
use crate::wkey::WrappingKey;

/// Encoded size of one record.
pub const PHYS_LEN: usize = 72;

/// Size of the wrapped-key buffer.
pub const KEYBUF_LEN: usize = MAX_KEY_LEN + MAC_LEN;

const PAD_LEN: usize = 3;
const IV_OFFSET: usize = 8;
const PAD_OFFSET: usize = IV_OFFSET + MAX_IV_LEN;
const KEYBUF_OFFSET: usize = PAD_OFFSET + PAD_LEN;

/// One wrapped data-encryption key as stored on disk.
#[derive(Clone, PartialEq, Eq)]
pub struct DslCryptoKeyPhys {
    crypt: CryptAlgorithm,
    iv: [u8; MAX_IV_LEN],
    keybuf: [u8; KEYBUF_LEN],
}

impl DslCryptoKeyPhys {
    /// Wrap `key` under `wkey` with a fresh IV.
    pub fn seal(wkey: &WrappingKey, key: &KeyMaterial) -> Result<Self> {
        let wrapped = wrap_key(wkey, key.as_bytes())?;
        Ok(Self::from_wrapped(key.crypt(), &wrapped))
    }

    /// Wrap `key` under `wkey` with a fixed IV. Deterministic.
    pub fn seal_with_iv(wkey: &WrappingKey, iv: &[u8], key: &KeyMaterial) -> Result<Self> {
        let wrapped = wrap_key_with_iv(wkey, iv, key.as_bytes())?;
        Ok(Self::from_wrapped(key.crypt(), &wrapped))
    }

    fn from_wrapped(crypt: CryptAlgorithm, wrapped: &WrappedKey) -> Self {
        let mut iv = [0u8; MAX_IV_LEN];
        iv[..wrapped.iv.len()].copy_from_slice(&wrapped.iv);

        let key_len = wrapped.ciphertext.len();
        let mut keybuf = [0u8; KEYBUF_LEN];
        keybuf[..key_len].copy_from_slice(&wrapped.ciphertext);
        keybuf[key_len..key_len + MAC_LEN].copy_from_slice(&wrapped.mac);

        Self { crypt, iv, keybuf }
    }

    /// Unwrap the record with `wkey`.
    ///
    /// Fails with [`CryptoError::AuthenticationFailed`] if `wkey` is not the
    /// key the record was sealed with.
    pub fn open(&self, wkey: &WrappingKey) -> Result<KeyMaterial> {
        let key_len = crypt_info(self.crypt)?.key_len;
        let iv_len = wkey.material().info().iv_len;

        let plain = unwrap_key(
            wkey,
            &self.iv[..iv_len],
            &self.keybuf[..key_len],
            &self.keybuf[key_len..key_len + MAC_LEN],
        )?;
        create_key(self.crypt, &plain)
    }

    /// Algorithm of the wrapped data key.
    pub fn crypt(&self) -> CryptAlgorithm {
        self.crypt
    }

    /// The full IV field, including zero tail.
    pub fn iv(&self) -> &[u8; MAX_IV_LEN] {
        &self.iv
    }

    /// The full wrapped-key buffer, including zero tail.
    pub fn keybuf(&self) -> &[u8; KEYBUF_LEN] {
        &self.keybuf
    }

    pub fn to_bytes(&self) -> [u8; PHYS_LEN] {
        let mut out = [0u8; PHYS_LEN];
        out[..IV_OFFSET].copy_from_slice(&self.crypt.to_u64().to_le_bytes());
        out[IV_OFFSET..PAD_OFFSET].copy_from_slice(&self.iv);
        out[KEYBUF_OFFSET..].copy_from_slice(&self.keybuf);
        out
    }

    /// Decode a record.
    ///
    /// Rejects wrong sizes, non-zero padding, non-cipher algorithm ids and
    /// bytes past the MAC.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PHYS_LEN {
            return Err(CryptoError::MalformedRecord(format!(
                "expected {} bytes, got {}",
                PHYS_LEN,
                bytes.len()
            )));
        }

        let mut id = [0u8; 8];
        id.copy_from_slice(&bytes[..IV_OFFSET]);
        let crypt = CryptAlgorithm::from_u64(u64::from_le_bytes(id))?;
        if !crypt.is_cipher() {
            return Err(CryptoError::InvalidAlgorithm(crypt.to_u64()));
        }

        if bytes[PAD_OFFSET..KEYBUF_OFFSET].iter().any(|&b| b != 0) {
            return Err(CryptoError::MalformedRecord("non-zero padding".into()));
        }

        let mut iv = [0u8; MAX_IV_LEN];
        iv.copy_from_slice(&bytes[IV_OFFSET..PAD_OFFSET]);
        let mut keybuf = [0u8; KEYBUF_LEN];
        keybuf.copy_from_slice(&bytes[KEYBUF_OFFSET..]);

        let used = crypt_info(crypt)?.key_len + MAC_LEN;
        if keybuf[used..].iter().any(|&b| b != 0) {
            return Err(CryptoError::MalformedRecord(
                "trailing bytes after mac".into(),
            ));
        }

        Ok(Self { crypt, iv, keybuf })
    }
}

impl fmt::Debug for DslCryptoKeyPhys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DslCryptoKeyPhys")
            .field("crypt", &self.crypt)
            .field("iv", &hex::encode(self.iv))
            .finish_non_exhaustive()
    }
}
