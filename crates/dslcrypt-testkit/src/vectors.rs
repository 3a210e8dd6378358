//! Known-answer vectors for key wrapping and bulk encryption.
//!
//! Every expected value was produced by an independent AES-CCM/AES-GCM
//! implementation, so a match checks the cipher wiring (nonce sizes, tag
//! placement, record layout) and not just self-consistency.

use dslcrypt_core::{
    create_key, decrypt, encrypt, CryptAlgorithm, DslCryptoKeyPhys, WrappingKey, MAC_LEN,
};
use serde::Serialize;

/// A data key sealed into its 72-byte on-disk record with a fixed IV.
#[derive(Debug, Clone, Serialize)]
pub struct WrapVector {
    pub name: &'static str,
    pub wrapping_crypt: CryptAlgorithm,
    /// Wrapping key (hex).
    pub wrapping_key: &'static str,
    /// Wrap IV (hex), the wrapping algorithm's IV length.
    pub iv: &'static str,
    pub data_crypt: CryptAlgorithm,
    /// Plain data key (hex).
    pub data_key: &'static str,
    /// Expected record bytes (hex).
    pub expected_phys: &'static str,
}

/// Authenticated encryption of a block with a data key.
#[derive(Debug, Clone, Serialize)]
pub struct AeadVector {
    pub name: &'static str,
    pub crypt: CryptAlgorithm,
    pub key: &'static str,
    pub iv: &'static str,
    pub aad: &'static str,
    pub plaintext: &'static str,
    pub ciphertext: &'static str,
    pub mac: &'static str,
}

/// All wrap vectors.
pub fn wrap_vectors() -> Vec<WrapVector> {
    vec![
        WrapVector {
            name: "aes-256-ccm under aes-256-ccm",
            wrapping_crypt: CryptAlgorithm::Aes256Ccm,
            wrapping_key: "101112131415161718191a1b1c1d1e1f202122232425262728292a2b2c2d2e2f",
            iv: "404142434445464748494a4b4c",
            data_crypt: CryptAlgorithm::Aes256Ccm,
            data_key: "a0a1a2a3a4a5a6a7a8a9aaabacadaeafb0b1b2b3b4b5b6b7b8b9babbbcbdbebf",
            expected_phys: "0500000000000000404142434445464748494a4b4c00000006af2dbaaff36125\
                            419d4fd9d1bd8ca1334338bc4c2e098338eb140c9c6bb0cf7314ce8e18ff66a9\
                            dc9dc90dd7dd33a2",
        },
        WrapVector {
            name: "aes-128-gcm under aes-256-ccm",
            wrapping_crypt: CryptAlgorithm::Aes256Ccm,
            wrapping_key: "101112131415161718191a1b1c1d1e1f202122232425262728292a2b2c2d2e2f",
            iv: "404142434445464748494a4b4c",
            data_crypt: CryptAlgorithm::Aes128Gcm,
            data_key: "a0a1a2a3a4a5a6a7a8a9aaabacadaeaf",
            expected_phys: "0600000000000000404142434445464748494a4b4c00000006af2dbaaff36125\
                            419d4fd9d1bd8ca171de7f6c8d561269aac74bda1dc5027f0000000000000000\
                            0000000000000000",
        },
        WrapVector {
            name: "aes-192-ccm under aes-128-gcm",
            wrapping_crypt: CryptAlgorithm::Aes128Gcm,
            wrapping_key: "101112131415161718191a1b1c1d1e1f",
            iv: "404142434445464748494a4b",
            data_crypt: CryptAlgorithm::Aes192Ccm,
            data_key: "a0a1a2a3a4a5a6a7a8a9aaabacadaeafb0b1b2b3b4b5b6b7",
            expected_phys: "0400000000000000404142434445464748494a4b0000000098baf44d66fccd7b\
                            149fd4ca044d3010ebc7869d46a140a48a35d94a10526302275dffe0e91d09fc\
                            0000000000000000",
        },
        WrapVector {
            name: "aes-256-gcm under aes-192-gcm",
            wrapping_crypt: CryptAlgorithm::Aes192Gcm,
            wrapping_key: "101112131415161718191a1b1c1d1e1f2021222324252627",
            iv: "404142434445464748494a4b",
            data_crypt: CryptAlgorithm::Aes256Gcm,
            data_key: "a0a1a2a3a4a5a6a7a8a9aaabacadaeafb0b1b2b3b4b5b6b7b8b9babbbcbdbebf",
            expected_phys: "0800000000000000404142434445464748494a4b00000000a240e95839c7603d\
                            ad4309c2c5f81597d606173f22b86e5d6fe9b151278307eb4abb5eb6d840bdc2\
                            25710ae5705f4f34",
        },
    ]
}

/// All bulk-encryption vectors.
pub fn aead_vectors() -> Vec<AeadVector> {
    vec![
        AeadVector {
            name: "aes-128-ccm block",
            crypt: CryptAlgorithm::Aes128Ccm,
            key: "7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e",
            iv: "01010101010101010101010101",
            aad: "64617461736574203432",
            plaintext: "74686520717569636b2062726f776e20666f78206a756d7073206f7665722074\
                        6865206c617a7920646f67",
            ciphertext: "3f3e6f3e74b8474102326f48fafcb687547e111a95e8b927f8a0d3037ff4d73a\
                         39025d0aa847ae838339e0",
            mac: "a757c0c9856ec9c6ec710d7bf64d5efd",
        },
        AeadVector {
            name: "aes-256-gcm block",
            crypt: CryptAlgorithm::Aes256Gcm,
            key: "7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e7e",
            iv: "010101010101010101010101",
            aad: "64617461736574203432",
            plaintext: "74686520717569636b2062726f776e20666f78206a756d7073206f7665722074\
                        6865206c617a7920646f67",
            ciphertext: "b04fb7f21e9410a35ea1bee557f6b3987890d6aa9c8bdd7c6bd657dd25245c41\
                         04346c5d115cc127de1add",
            mac: "dff138b6b5c0dc6f9da01fd3e8dbb5eb",
        },
    ]
}

/// Decode a hex constant from this module.
///
/// # Panics
///
/// On malformed hex, which is a bug in the vector table.
pub fn unhex(s: &str) -> Vec<u8> {
    hex::decode(s).unwrap_or_else(|e| panic!("bad vector hex {:?}: {}", s, e))
}

/// Seal a wrap vector's data key and return the record bytes (hex).
pub fn seal_wrap_vector(v: &WrapVector) -> dslcrypt_core::Result<String> {
    let wkey = WrappingKey::from_raw(v.wrapping_crypt, &unhex(v.wrapping_key))?;
    let key = create_key(v.data_crypt, &unhex(v.data_key))?;
    let phys = DslCryptoKeyPhys::seal_with_iv(&wkey, &unhex(v.iv), &key)?;
    Ok(hex::encode(phys.to_bytes()))
}

/// Encrypt an AEAD vector's plaintext and return `(ciphertext, mac)` (hex).
pub fn encrypt_aead_vector(v: &AeadVector) -> dslcrypt_core::Result<(String, String)> {
    let key = create_key(v.crypt, &unhex(v.key))?;
    let plaintext = unhex(v.plaintext);
    let mut ciphertext = vec![0u8; plaintext.len()];
    let mac = encrypt(&key, &unhex(v.iv), &unhex(v.aad), &plaintext, &mut ciphertext)?;
    Ok((hex::encode(ciphertext), hex::encode(mac)))
}

/// Check every vector, returning `(name, matches, detail)` per vector.
///
/// Call this to verify your build matches the reference values.
pub fn verify_all_vectors() -> Vec<(String, bool, String)> {
    let wraps = wrap_vectors().into_iter().map(|v| match seal_wrap_vector(&v) {
        Ok(hex) => (v.name.to_string(), hex == v.expected_phys, hex),
        Err(e) => (v.name.to_string(), false, e.to_string()),
    });
    let aeads = aead_vectors().into_iter().map(|v| match encrypt_aead_vector(&v) {
        Ok((ct, mac)) => {
            let matches = ct == v.ciphertext && mac == v.mac;
            (v.name.to_string(), matches, format!("{}:{}", ct, mac))
        }
        Err(e) => (v.name.to_string(), false, e.to_string()),
    });
    wraps.chain(aeads).collect()
}

/// All vectors as a JSON document, for checking other implementations.
pub fn vectors_json() -> serde_json::Result<String> {
    serde_json::to_string_pretty(&serde_json::json!({
        "wrap": wrap_vectors(),
        "aead": aead_vectors(),
    }))
}
