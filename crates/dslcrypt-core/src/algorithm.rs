//! Encryption algorithm identifiers and their parameter table.
//!
//! The numeric ids are persisted in every wrapped key record, so they are
//! fixed forever: `Inherit = 0` through `Aes256Gcm = 8`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{CryptoError, Result};

/// Largest key any algorithm in the table uses (AES-256).
pub const MAX_KEY_LEN: usize = 32;

/// Largest IV any algorithm in the table uses (CCM).
pub const MAX_IV_LEN: usize = 13;

/// MAC length shared by every cipher row.
pub const MAC_LEN: usize = 16;

/// Convert a bit count to whole bytes.
pub const fn bits_to_bytes(bits: usize) -> usize {
    (bits + 7) >> 3
}

/// Convert a byte count to bits.
pub const fn bytes_to_bits(bytes: usize) -> usize {
    bytes << 3
}

/// Encryption algorithm of a dataset or key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
#[repr(u64)]
pub enum CryptAlgorithm {
    /// Take the parent's value. Must be resolved before use.
    Inherit = 0,
    /// Encryption on with the default cipher. Must be resolved before use.
    On = 1,
    Off = 2,
    Aes128Ccm = 3,
    Aes192Ccm = 4,
    Aes256Ccm = 5,
    Aes128Gcm = 6,
    Aes192Gcm = 7,
    Aes256Gcm = 8,
}

impl CryptAlgorithm {
    /// The cipher `on` stands for.
    pub const ON_VALUE: Self = Self::Aes256Ccm;

    /// The value used when nothing is set.
    pub const DEFAULT: Self = Self::Off;

    /// Every concrete cipher, in id order.
    pub const CIPHERS: [Self; 6] = [
        Self::Aes128Ccm,
        Self::Aes192Ccm,
        Self::Aes256Ccm,
        Self::Aes128Gcm,
        Self::Aes192Gcm,
        Self::Aes256Gcm,
    ];

    /// Decode a persisted algorithm id.
    pub fn from_u64(id: u64) -> Result<Self> {
        Ok(match id {
            0 => Self::Inherit,
            1 => Self::On,
            2 => Self::Off,
            3 => Self::Aes128Ccm,
            4 => Self::Aes192Ccm,
            5 => Self::Aes256Ccm,
            6 => Self::Aes128Gcm,
            7 => Self::Aes192Gcm,
            8 => Self::Aes256Gcm,
            other => return Err(CryptoError::InvalidAlgorithm(other)),
        })
    }

    /// The persisted algorithm id.
    pub const fn to_u64(self) -> u64 {
        self as u64
    }

    /// Look up an algorithm by its display name (`"aes-256-ccm"`, `"on"`, ...).
    pub fn from_name(name: &str) -> Option<Self> {
        TABLE
            .iter()
            .position(|info| info.name == name)
            .and_then(|idx| Self::from_u64(idx as u64).ok())
    }

    /// Resolve the `inherit` and `on` meta-values into a concrete setting.
    ///
    /// `Inherit` takes `parent` (itself resolved), `On` becomes
    /// [`ON_VALUE`](Self::ON_VALUE).
    pub fn resolve(self, parent: Self) -> Self {
        match self {
            Self::Inherit => match parent {
                Self::Inherit => Self::DEFAULT,
                other => other.resolve(Self::DEFAULT),
            },
            Self::On => Self::ON_VALUE,
            other => other,
        }
    }

    /// Whether this is a concrete cipher (not `off` or a meta-value).
    pub fn is_cipher(self) -> bool {
        !matches!(self, Self::Inherit | Self::On | Self::Off)
    }

    /// Display name.
    pub fn name(self) -> &'static str {
        TABLE[self as usize].name
    }
}

impl fmt::Display for CryptAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<CryptAlgorithm> for u64 {
    fn from(alg: CryptAlgorithm) -> Self {
        alg.to_u64()
    }
}

impl TryFrom<u64> for CryptAlgorithm {
    type Error = CryptoError;

    fn try_from(id: u64) -> Result<Self> {
        Self::from_u64(id)
    }
}

/// Block cipher mode of an algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptMode {
    None,
    Ccm,
    Gcm,
}

/// One row of the parameter table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptInfo {
    /// Provider mechanism name.
    pub mech_name: &'static str,
    pub mode: CryptMode,
    pub key_len: usize,
    pub iv_len: usize,
    pub mac_len: usize,
    /// MAC length used for intent-log blocks.
    pub zil_mac_len: usize,
    pub name: &'static str,
}

const fn none_row(name: &'static str) -> CryptInfo {
    CryptInfo {
        mech_name: "",
        mode: CryptMode::None,
        key_len: 0,
        iv_len: 0,
        mac_len: 0,
        zil_mac_len: 0,
        name,
    }
}

const fn cipher_row(mode: CryptMode, key_bits: usize, name: &'static str) -> CryptInfo {
    let (mech_name, iv_len) = match mode {
        CryptMode::Gcm => ("CKM_AES_GCM", 12),
        _ => ("CKM_AES_CCM", 13),
    };
    CryptInfo {
        mech_name,
        mode,
        key_len: bits_to_bytes(key_bits),
        iv_len,
        mac_len: MAC_LEN,
        zil_mac_len: 8,
        name,
    }
}

impl CryptInfo {
    /// Longest message one seal can cover, in bytes.
    ///
    /// CCM encodes the length in the `15 - iv_len` bytes the nonce leaves
    /// free, so a 13-byte nonce caps a message at 64 KiB - 1. GCM's 32-bit
    /// block counter allows 64 GiB.
    pub fn max_message_len(&self) -> u64 {
        match self.mode {
            CryptMode::Ccm => (1u64 << (8 * (15 - self.iv_len))) - 1,
            CryptMode::Gcm => 1u64 << 36,
            CryptMode::None => 0,
        }
    }
}

/// Indexed by algorithm id.
static TABLE: [CryptInfo; 9] = [
    none_row("inherit"),
    none_row("on"),
    none_row("off"),
    cipher_row(CryptMode::Ccm, 128, "aes-128-ccm"),
    cipher_row(CryptMode::Ccm, 192, "aes-192-ccm"),
    cipher_row(CryptMode::Ccm, 256, "aes-256-ccm"),
    cipher_row(CryptMode::Gcm, 128, "aes-128-gcm"),
    cipher_row(CryptMode::Gcm, 192, "aes-192-gcm"),
    cipher_row(CryptMode::Gcm, 256, "aes-256-gcm"),
];

/// Look up the parameters of a concrete algorithm.
///
/// `Inherit` and `On` are rejected with [`CryptoError::InvalidAlgorithm`];
/// resolve them with [`CryptAlgorithm::resolve`] first.
pub fn crypt_info(alg: CryptAlgorithm) -> Result<&'static CryptInfo> {
    match alg {
        CryptAlgorithm::Inherit | CryptAlgorithm::On => {
            Err(CryptoError::InvalidAlgorithm(alg.to_u64()))
        }
        _ => Ok(&TABLE[alg as usize]),
    }
}

/// Look up parameters by raw persisted id.
pub fn crypt_info_by_id(id: u64) -> Result<&'static CryptInfo> {
    crypt_info(CryptAlgorithm::from_u64(id)?)
}
