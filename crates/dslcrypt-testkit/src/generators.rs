//! Proptest generators for property-based testing.

use std::sync::Arc;

use proptest::prelude::*;

use dslcrypt::{Keychain, KeychainHold};
use dslcrypt_core::{crypt_info, CryptAlgorithm, WrappingKey, WrappingKeyProps};
use dslcrypt_store::ObjectStore;

/// Generate a concrete cipher.
pub fn cipher() -> impl Strategy<Value = CryptAlgorithm> {
    prop::sample::select(CryptAlgorithm::CIPHERS.to_vec())
}

/// Generate any algorithm value, including `inherit`, `on` and `off`.
pub fn any_algorithm() -> impl Strategy<Value = CryptAlgorithm> {
    prop_oneof![
        Just(CryptAlgorithm::Inherit),
        Just(CryptAlgorithm::On),
        Just(CryptAlgorithm::Off),
        cipher(),
    ]
}

/// Generate raw key bytes of the right length for `crypt`.
///
/// `crypt` must be a cipher.
pub fn key_bytes(crypt: CryptAlgorithm) -> impl Strategy<Value = Vec<u8>> {
    let len = crypt_info(crypt).map(|info| info.key_len).unwrap_or(0);
    prop::collection::vec(any::<u8>(), len)
}

/// Generate a cipher together with a key for it.
pub fn cipher_and_key() -> impl Strategy<Value = (CryptAlgorithm, Vec<u8>)> {
    cipher().prop_flat_map(|crypt| (Just(crypt), key_bytes(crypt)))
}

/// Generate a strictly increasing, non-empty txg sequence.
pub fn txg_sequence(max_len: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::btree_set(1u64..1_000_000, 1..=max_len.max(1))
        .prop_map(|set| set.into_iter().collect())
}

/// Generate a passphrase.
pub fn passphrase() -> impl Strategy<Value = String> {
    "[ -~]{1,32}".prop_map(String::from)
}

/// Generate wrapping-key properties from raw bytes or a passphrase.
pub fn wrapping_key_props() -> impl Strategy<Value = WrappingKeyProps> {
    prop_oneof![
        cipher_and_key().prop_map(|(crypt, key)| WrappingKeyProps::raw(crypt, key)),
        (
            cipher(),
            passphrase(),
            prop::collection::vec(any::<u8>(), 8..=32)
        )
            .prop_map(|(crypt, pass, salt)| WrappingKeyProps::passphrase(crypt, pass, salt)),
    ]
}

/// Parameters for building a keychain.
#[derive(Debug, Clone)]
pub struct KeychainParams {
    pub wrapping_crypt: CryptAlgorithm,
    pub wrapping_key: Vec<u8>,
    pub data_crypt: CryptAlgorithm,
    /// Effective txgs of the entries, strictly increasing.
    pub txgs: Vec<u64>,
}

impl Arbitrary for KeychainParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (cipher_and_key(), cipher(), txg_sequence(6))
            .prop_map(|((wrapping_crypt, wrapping_key), data_crypt, txgs)| KeychainParams {
                wrapping_crypt,
                wrapping_key,
                data_crypt,
                txgs,
            })
            .boxed()
    }
}

impl KeychainParams {
    pub fn wrapping_key(&self) -> dslcrypt::Result<Arc<WrappingKey>> {
        Ok(Arc::new(WrappingKey::from_raw(
            self.wrapping_crypt,
            &self.wrapping_key,
        )?))
    }
}

/// Build a keychain from parameters: created at the first txg, rotated to a
/// random key at each later one.
pub fn keychain_from_params<S: ObjectStore + ?Sized>(
    store: &S,
    params: &KeychainParams,
) -> dslcrypt::Result<KeychainHold> {
    let (first, rest) = params
        .txgs
        .split_first()
        .ok_or_else(|| dslcrypt::KeyError::Corrupted("no txgs".into()))?;

    let kc = Keychain::create(
        store,
        params.wrapping_key()?,
        params.data_crypt,
        *first,
        "generated",
    )?;
    for txg in rest {
        kc.add_random_key(store, *txg)?;
    }
    Ok(kc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dslcrypt_core::{DslCryptoKeyPhys, KeySource, PHYS_LEN};
    use dslcrypt_store::MemoryObjectStore;

    use crate::fixtures::FAST_KDF;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn test_keychain_reopens_identically(params: KeychainParams) {
            let store = MemoryObjectStore::new();
            let kc = keychain_from_params(&store, &params).unwrap();
            let reopened = Keychain::open(&store, kc.object(), params.wrapping_key().unwrap(), "reopen").unwrap();

            prop_assert_eq!(reopened.entry_txgs(), params.txgs.clone());
            for txg in &params.txgs {
                prop_assert_eq!(
                    kc.lookup_key(*txg).unwrap().fingerprint(),
                    reopened.lookup_key(*txg).unwrap().fingerprint()
                );
            }
        }

        #[test]
        fn test_records_are_fixed_size(params: KeychainParams) {
            let store = MemoryObjectStore::new();
            let kc = keychain_from_params(&store, &params).unwrap();

            for (_, bytes) in store.read_records(kc.object()).unwrap() {
                prop_assert_eq!(bytes.len(), PHYS_LEN);
                let phys = DslCryptoKeyPhys::from_bytes(&bytes).unwrap();
                prop_assert_eq!(phys.crypt(), params.data_crypt);
            }
        }

        #[test]
        fn test_resolved_algorithm_is_never_a_meta_value(
            alg in any_algorithm(),
            parent in any_algorithm(),
        ) {
            let resolved = alg.resolve(parent);
            prop_assert!(resolved.is_cipher() || resolved == CryptAlgorithm::Off);
        }

        #[test]
        fn test_wrong_wrapping_key_never_opens(
            params: KeychainParams,
            (crypt, other) in cipher_and_key(),
        ) {
            prop_assume!(other != params.wrapping_key);

            let store = MemoryObjectStore::new();
            let kc = keychain_from_params(&store, &params).unwrap();
            let wrong = Arc::new(WrappingKey::from_raw(crypt, &other).unwrap());

            let err = Keychain::open(&store, kc.object(), wrong, "wrong").unwrap_err();
            prop_assert!(err.is_auth_failure());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn test_props_build_matching_keys(props in wrapping_key_props()) {
            let a = WrappingKey::from_props(&props, &FAST_KDF).unwrap();
            let b = WrappingKey::from_props(&props, &FAST_KDF).unwrap();

            prop_assert_eq!(a.fingerprint(), b.fingerprint());
            prop_assert_eq!(a.crypt(), props.crypt);
            if let KeySource::Raw(raw) = &props.source {
                prop_assert_eq!(a.material().as_bytes(), raw.as_slice());
            }
        }
    }
}
