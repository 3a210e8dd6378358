//! The crypto engine: key material, key wrapping, and raw AEAD.
//!
//! Every algorithm in the table is an AES mode with a 16-byte MAC, backed by
//! the RustCrypto `ccm` and `aes-gcm` implementations. A [`KeyMaterial`]
//! carries the expanded cipher alongside the raw key so the key schedule is
//! computed once per key rather than once per operation.

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::aead::consts::{U12, U13, U16};
use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::AesGcm;
use ccm::Ccm;
use rand::RngCore;
use std::fmt;
use zeroize::Zeroizing;

use crate::algorithm::{crypt_info, CryptAlgorithm, CryptInfo, CryptMode, MAC_LEN};
use crate::error::{CryptoError, Result};
use crate::wkey::WrappingKey;

/// BLAKE3 context for key fingerprints.
const FINGERPRINT_CONTEXT: &str = "dslcrypt-v0 key fingerprint";

/// Expanded cipher state for one key.
enum CipherContext {
    Aes128Ccm(Ccm<Aes128, U16, U13>),
    Aes192Ccm(Ccm<Aes192, U16, U13>),
    Aes256Ccm(Ccm<Aes256, U16, U13>),
    Aes128Gcm(AesGcm<Aes128, U12>),
    Aes192Gcm(AesGcm<Aes192, U12>),
    Aes256Gcm(AesGcm<Aes256, U12>),
}

macro_rules! with_cipher {
    ($ctx:expr, $cipher:ident => $body:expr) => {
        match $ctx {
            CipherContext::Aes128Ccm($cipher) => $body,
            CipherContext::Aes192Ccm($cipher) => $body,
            CipherContext::Aes256Ccm($cipher) => $body,
            CipherContext::Aes128Gcm($cipher) => $body,
            CipherContext::Aes192Gcm($cipher) => $body,
            CipherContext::Aes256Gcm($cipher) => $body,
        }
    };
}

impl CipherContext {
    fn new(crypt: CryptAlgorithm, raw: &[u8]) -> Result<Self> {
        let invalid = |_| CryptoError::Provider(format!("{} rejected key", crypt));
        Ok(match crypt {
            CryptAlgorithm::Aes128Ccm => Self::Aes128Ccm(Ccm::new_from_slice(raw).map_err(invalid)?),
            CryptAlgorithm::Aes192Ccm => Self::Aes192Ccm(Ccm::new_from_slice(raw).map_err(invalid)?),
            CryptAlgorithm::Aes256Ccm => Self::Aes256Ccm(Ccm::new_from_slice(raw).map_err(invalid)?),
            CryptAlgorithm::Aes128Gcm => {
                Self::Aes128Gcm(AesGcm::new_from_slice(raw).map_err(invalid)?)
            }
            CryptAlgorithm::Aes192Gcm => {
                Self::Aes192Gcm(AesGcm::new_from_slice(raw).map_err(invalid)?)
            }
            CryptAlgorithm::Aes256Gcm => {
                Self::Aes256Gcm(AesGcm::new_from_slice(raw).map_err(invalid)?)
            }
            other => return Err(CryptoError::InvalidAlgorithm(other.to_u64())),
        })
    }

    fn seal(&self, iv: &[u8], aad: &[u8], buf: &mut [u8]) -> Result<[u8; MAC_LEN]> {
        let tag = with_cipher!(self, c => c
            .encrypt_in_place_detached(GenericArray::from_slice(iv), aad, buf)
            .map(|tag| {
                let mut mac = [0u8; MAC_LEN];
                mac.copy_from_slice(&tag);
                mac
            }))
        .map_err(|e| CryptoError::Provider(e.to_string()))?;
        Ok(tag)
    }

    fn open(&self, iv: &[u8], aad: &[u8], buf: &mut [u8], mac: &[u8]) -> Result<()> {
        with_cipher!(self, c => c.decrypt_in_place_detached(
            GenericArray::from_slice(iv),
            aad,
            buf,
            GenericArray::from_slice(mac),
        ))
        .map_err(|_| CryptoError::AuthenticationFailed)
    }
}

/// Short, non-reversible identifier of a key for logs and diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyFingerprint(pub [u8; 8]);

impl KeyFingerprint {
    fn of(raw: &[u8]) -> Self {
        let digest = blake3::derive_key(FINGERPRINT_CONTEXT, raw);
        let mut fp = [0u8; 8];
        fp.copy_from_slice(&digest[..8]);
        Self(fp)
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyFingerprint({})", self.to_hex())
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// An unwrapped key loaded into memory.
///
/// Holds the raw key bytes (zeroized on drop) and the expanded cipher.
/// Never `Clone`: a key has exactly one owner, and copies are made
/// explicitly with [`KeyMaterial::duplicate`].
pub struct KeyMaterial {
    crypt: CryptAlgorithm,
    info: &'static CryptInfo,
    raw: Zeroizing<Vec<u8>>,
    ctx: CipherContext,
    fingerprint: KeyFingerprint,
}

impl KeyMaterial {
    /// The algorithm this key is for.
    pub fn crypt(&self) -> CryptAlgorithm {
        self.crypt
    }

    /// Table parameters of this key's algorithm.
    pub fn info(&self) -> &'static CryptInfo {
        self.info
    }

    /// The raw key bytes.
    ///
    /// Secret material: only for wrapping or duplicating.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn fingerprint(&self) -> KeyFingerprint {
        self.fingerprint
    }

    /// Build an independent copy of this key.
    pub fn duplicate(&self) -> Result<Self> {
        create_key(self.crypt, &self.raw)
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("crypt", &self.crypt)
            .field("fingerprint", &self.fingerprint)
            .finish()
    }
}

/// Create key material from raw bytes.
///
/// The algorithm must be a concrete cipher and `raw` must be exactly its key
/// length.
pub fn create_key(crypt: CryptAlgorithm, raw: &[u8]) -> Result<KeyMaterial> {
    let info = crypt_info(crypt)?;
    if info.mode == CryptMode::None {
        return Err(CryptoError::InvalidAlgorithm(crypt.to_u64()));
    }
    if raw.len() != info.key_len {
        return Err(CryptoError::InvalidKeyLength {
            expected: info.key_len,
            actual: raw.len(),
        });
    }

    Ok(KeyMaterial {
        crypt,
        info,
        raw: Zeroizing::new(raw.to_vec()),
        ctx: CipherContext::new(crypt, raw)?,
        fingerprint: KeyFingerprint::of(raw),
    })
}

/// Create a new random key for `crypt`.
pub fn generate_key(crypt: CryptAlgorithm) -> Result<KeyMaterial> {
    let info = crypt_info(crypt)?;
    let mut raw = Zeroizing::new(vec![0u8; info.key_len]);
    rand::thread_rng().fill_bytes(&mut raw);
    create_key(crypt, &raw)
}

/// Zero and release key material.
pub fn destroy_key(key: KeyMaterial) {
    drop(key);
}

/// Generate a fresh random IV of the algorithm's IV length.
pub fn generate_iv(info: &CryptInfo) -> Vec<u8> {
    let mut iv = vec![0u8; info.iv_len];
    rand::thread_rng().fill_bytes(&mut iv);
    iv
}

/// A key encrypted under a wrapping key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKey {
    /// IV used for the wrap (wrapping algorithm's IV length).
    pub iv: Vec<u8>,
    /// Encrypted key bytes (same length as the plain key).
    pub ciphertext: Vec<u8>,
    pub mac: [u8; MAC_LEN],
}

/// Wrap raw key bytes under `wkey` with a fresh random IV.
pub fn wrap_key(wkey: &WrappingKey, plain: &[u8]) -> Result<WrappedKey> {
    let iv = generate_iv(wkey.material().info());
    wrap_key_with_iv(wkey, &iv, plain)
}

/// Wrap raw key bytes under `wkey` with a caller-chosen IV.
///
/// Deterministic; used by known-answer tests. Production callers use
/// [`wrap_key`].
pub fn wrap_key_with_iv(wkey: &WrappingKey, iv: &[u8], plain: &[u8]) -> Result<WrappedKey> {
    let key = wkey.material();
    check_iv(key, iv)?;

    let mut buf = plain.to_vec();
    let mac = key.ctx.seal(iv, &[], &mut buf)?;

    Ok(WrappedKey {
        iv: iv.to_vec(),
        ciphertext: buf,
        mac,
    })
}

/// Unwrap key bytes previously produced by [`wrap_key`].
///
/// Fails with [`CryptoError::AuthenticationFailed`] if `wkey` is not the key
/// that wrapped them or the record was altered.
pub fn unwrap_key(
    wkey: &WrappingKey,
    iv: &[u8],
    wrapped: &[u8],
    mac: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let key = wkey.material();
    check_iv(key, iv)?;
    check_mac(mac)?;

    let mut buf = Zeroizing::new(wrapped.to_vec());
    key.ctx.open(iv, &[], &mut buf, mac)?;
    Ok(buf)
}

/// Authenticated-encrypt `plaintext` into `ciphertext` (same length).
///
/// IV uniqueness per key is the caller's responsibility.
pub fn encrypt(
    key: &KeyMaterial,
    iv: &[u8],
    aad: &[u8],
    plaintext: &[u8],
    ciphertext: &mut [u8],
) -> Result<[u8; MAC_LEN]> {
    check_buffers(plaintext.len(), ciphertext.len())?;
    ciphertext.copy_from_slice(plaintext);
    encrypt_in_place(key, iv, aad, ciphertext)
}

/// Authenticated-decrypt `ciphertext` into `plaintext` (same length).
pub fn decrypt(
    key: &KeyMaterial,
    iv: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
    plaintext: &mut [u8],
    mac: &[u8],
) -> Result<()> {
    check_buffers(ciphertext.len(), plaintext.len())?;
    plaintext.copy_from_slice(ciphertext);
    let result = decrypt_in_place(key, iv, aad, plaintext, mac);
    if result.is_err() {
        plaintext.fill(0);
    }
    result
}

/// Encrypt `buf` in place, returning the MAC.
///
/// Fails with [`CryptoError::MessageTooLong`] past the mode's
/// [`max_message_len`](CryptInfo::max_message_len); CCM stops at 64 KiB - 1.
pub fn encrypt_in_place(
    key: &KeyMaterial,
    iv: &[u8],
    aad: &[u8],
    buf: &mut [u8],
) -> Result<[u8; MAC_LEN]> {
    check_iv(key, iv)?;
    check_message_len(key, buf.len())?;
    key.ctx.seal(iv, aad, buf)
}

/// Decrypt `buf` in place after verifying `mac`.
pub fn decrypt_in_place(
    key: &KeyMaterial,
    iv: &[u8],
    aad: &[u8],
    buf: &mut [u8],
    mac: &[u8],
) -> Result<()> {
    check_iv(key, iv)?;
    check_mac(mac)?;
    check_message_len(key, buf.len())?;
    key.ctx.open(iv, aad, buf, mac)
}

fn check_iv(key: &KeyMaterial, iv: &[u8]) -> Result<()> {
    if iv.len() != key.info.iv_len {
        return Err(CryptoError::InvalidIvLength {
            expected: key.info.iv_len,
            actual: iv.len(),
        });
    }
    Ok(())
}

fn check_message_len(key: &KeyMaterial, len: usize) -> Result<()> {
    let max = key.info.max_message_len();
    if len as u64 > max {
        return Err(CryptoError::MessageTooLong {
            crypt: key.info.name,
            max,
            actual: len,
        });
    }
    Ok(())
}

fn check_mac(mac: &[u8]) -> Result<()> {
    if mac.len() != MAC_LEN {
        return Err(CryptoError::BufferLength {
            expected: MAC_LEN,
            actual: mac.len(),
        });
    }
    Ok(())
}

fn check_buffers(input: usize, output: usize) -> Result<()> {
    if input != output {
        return Err(CryptoError::BufferLength {
            expected: input,
            actual: output,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn wkey(crypt: CryptAlgorithm) -> WrappingKey {
        WrappingKey::generate(crypt).unwrap()
    }

    #[test]
    fn test_create_key_checks_length() {
        assert!(create_key(CryptAlgorithm::Aes256Ccm, &[7u8; 32]).is_ok());
        assert!(matches!(
            create_key(CryptAlgorithm::Aes256Ccm, &[7u8; 16]),
            Err(CryptoError::InvalidKeyLength { expected: 32, actual: 16 })
        ));
        assert!(matches!(
            create_key(CryptAlgorithm::Aes192Gcm, &[7u8; 32]),
            Err(CryptoError::InvalidKeyLength { expected: 24, actual: 32 })
        ));
    }

    #[test]
    fn test_create_key_rejects_non_ciphers() {
        for alg in [CryptAlgorithm::Off, CryptAlgorithm::On, CryptAlgorithm::Inherit] {
            assert!(matches!(
                create_key(alg, &[]),
                Err(CryptoError::InvalidAlgorithm(_))
            ));
        }
    }

    #[test]
    fn test_wrap_unwrap_roundtrip_all_algorithms() {
        for wrap_alg in CryptAlgorithm::CIPHERS {
            let wk = wkey(wrap_alg);
            for data_alg in CryptAlgorithm::CIPHERS {
                let dek = generate_key(data_alg).unwrap();
                let wrapped = wrap_key(&wk, dek.as_bytes()).unwrap();
                assert_eq!(wrapped.iv.len(), wk.material().info().iv_len);
                assert_eq!(wrapped.ciphertext.len(), dek.as_bytes().len());
                assert_ne!(wrapped.ciphertext.as_slice(), dek.as_bytes());

                let plain = unwrap_key(&wk, &wrapped.iv, &wrapped.ciphertext, &wrapped.mac).unwrap();
                assert_eq!(plain.as_slice(), dek.as_bytes());
            }
        }
    }

    #[test]
    fn test_unwrap_wrong_key_fails() {
        let wk1 = wkey(CryptAlgorithm::Aes256Ccm);
        let wk2 = wkey(CryptAlgorithm::Aes256Ccm);
        let wrapped = wrap_key(&wk1, &[0x42; 32]).unwrap();

        assert!(matches!(
            unwrap_key(&wk2, &wrapped.iv, &wrapped.ciphertext, &wrapped.mac),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_unwrap_tampered_mac_fails() {
        let wk = wkey(CryptAlgorithm::Aes128Gcm);
        let mut wrapped = wrap_key(&wk, &[0x42; 16]).unwrap();
        wrapped.mac[0] ^= 1;

        assert!(matches!(
            unwrap_key(&wk, &wrapped.iv, &wrapped.ciphertext, &wrapped.mac),
            Err(CryptoError::AuthenticationFailed)
        ));
    }

    #[test]
    fn test_wrap_rejects_wrong_iv_length() {
        let wk = wkey(CryptAlgorithm::Aes256Gcm);
        assert!(matches!(
            wrap_key_with_iv(&wk, &[0u8; 13], &[1u8; 32]),
            Err(CryptoError::InvalidIvLength { expected: 12, actual: 13 })
        ));
    }

    #[test]
    fn test_fresh_iv_per_wrap() {
        let wk = wkey(CryptAlgorithm::Aes256Ccm);
        let a = wrap_key(&wk, &[9u8; 32]).unwrap();
        let b = wrap_key(&wk, &[9u8; 32]).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_bulk_encrypt_decrypt() {
        let key = generate_key(CryptAlgorithm::Aes256Gcm).unwrap();
        let iv = generate_iv(key.info());
        let plaintext = b"block contents".to_vec();
        let mut ciphertext = vec![0u8; plaintext.len()];

        let mac = encrypt(&key, &iv, b"blkptr", &plaintext, &mut ciphertext).unwrap();
        assert_ne!(ciphertext, plaintext);

        let mut recovered = vec![0u8; ciphertext.len()];
        decrypt(&key, &iv, b"blkptr", &ciphertext, &mut recovered, &mac).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_bulk_decrypt_wrong_aad_fails() {
        let key = generate_key(CryptAlgorithm::Aes128Ccm).unwrap();
        let iv = generate_iv(key.info());
        let mut buf = b"payload".to_vec();
        let mac = encrypt_in_place(&key, &iv, b"a", &mut buf).unwrap();

        let mut out = vec![0u8; buf.len()];
        assert!(matches!(
            decrypt(&key, &iv, b"b", &buf, &mut out, &mac),
            Err(CryptoError::AuthenticationFailed)
        ));
        assert!(out.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_bulk_buffer_mismatch() {
        let key = generate_key(CryptAlgorithm::Aes128Gcm).unwrap();
        let iv = generate_iv(key.info());
        let mut out = vec![0u8; 3];
        assert!(matches!(
            encrypt(&key, &iv, &[], b"four", &mut out),
            Err(CryptoError::BufferLength { expected: 4, actual: 3 })
        ));
    }

    #[test]
    fn test_ccm_message_limit() {
        let key = generate_key(CryptAlgorithm::Aes256Ccm).unwrap();
        let iv = generate_iv(key.info());

        let mut largest = vec![0x42u8; 65535];
        let mac = encrypt_in_place(&key, &iv, b"blk", &mut largest).unwrap();
        decrypt_in_place(&key, &iv, b"blk", &mut largest, &mac).unwrap();
        assert!(largest.iter().all(|&b| b == 0x42));

        let block = vec![0u8; 128 * 1024];
        let mut out = vec![0u8; block.len()];
        assert!(matches!(
            encrypt(&key, &iv, &[], &block, &mut out),
            Err(CryptoError::MessageTooLong { max: 65535, actual: 131072, .. })
        ));

        let err = decrypt(&key, &iv, &[], &block, &mut out, &[0u8; MAC_LEN]).unwrap_err();
        assert!(matches!(err, CryptoError::MessageTooLong { .. }));
        assert!(!matches!(err, CryptoError::AuthenticationFailed));
    }

    #[test]
    fn test_gcm_seals_large_blocks() {
        let key = generate_key(CryptAlgorithm::Aes128Gcm).unwrap();
        let iv = generate_iv(key.info());
        let plaintext: Vec<u8> = (0..128 * 1024).map(|i| i as u8).collect();
        let mut ciphertext = vec![0u8; plaintext.len()];

        let mac = encrypt(&key, &iv, b"blk", &plaintext, &mut ciphertext).unwrap();
        let mut recovered = vec![0u8; ciphertext.len()];
        decrypt(&key, &iv, b"blk", &ciphertext, &mut recovered, &mac).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_fingerprint_stable_and_distinct() {
        let a = create_key(CryptAlgorithm::Aes256Ccm, &[1u8; 32]).unwrap();
        let b = create_key(CryptAlgorithm::Aes256Ccm, &[1u8; 32]).unwrap();
        let c = create_key(CryptAlgorithm::Aes256Ccm, &[2u8; 32]).unwrap();

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().to_hex().len(), 16);
    }

    #[test]
    fn test_debug_hides_key_bytes() {
        let key = create_key(CryptAlgorithm::Aes128Ccm, &[0xab; 16]).unwrap();
        let debug = format!("{:?}", key);
        assert!(debug.starts_with("KeyMaterial"));
        assert!(debug.contains("Aes128Ccm"));
        assert!(!debug.contains("[171"));
    }

    #[test]
    fn test_duplicate_is_independent_copy() {
        let key = generate_key(CryptAlgorithm::Aes192Ccm).unwrap();
        let copy = key.duplicate().unwrap();
        destroy_key(key);
        assert_eq!(copy.as_bytes().len(), 24);
    }

    proptest! {
        #[test]
        fn prop_wrap_roundtrip(
            wrap_idx in 0usize..6,
            data_idx in 0usize..6,
            seed in any::<[u8; 32]>(),
        ) {
            let wk = wkey(CryptAlgorithm::CIPHERS[wrap_idx]);
            let data_alg = CryptAlgorithm::CIPHERS[data_idx];
            let raw = &seed[..crypt_info(data_alg).unwrap().key_len];

            let wrapped = wrap_key(&wk, raw).unwrap();
            let plain = unwrap_key(&wk, &wrapped.iv, &wrapped.ciphertext, &wrapped.mac).unwrap();
            prop_assert_eq!(plain.as_slice(), raw);
        }

        #[test]
        fn prop_wrong_wrapping_key_fails(a in any::<[u8; 32]>(), b in any::<[u8; 32]>()) {
            prop_assume!(a != b);
            let wk_a = WrappingKey::from_raw(CryptAlgorithm::Aes256Gcm, &a).unwrap();
            let wk_b = WrappingKey::from_raw(CryptAlgorithm::Aes256Gcm, &b).unwrap();

            let wrapped = wrap_key(&wk_a, &[0x5a; 32]).unwrap();
            let result = unwrap_key(&wk_b, &wrapped.iv, &wrapped.ciphertext, &wrapped.mac);
            prop_assert!(matches!(result, Err(CryptoError::AuthenticationFailed)));
        }
    }
}
