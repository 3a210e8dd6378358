//! Keychains written through a SQLite-backed keystore reload in a new
//! process-like session with the same keys.

use std::sync::Arc;

use anyhow::Result;
use dslcrypt::core::KeySource;
use dslcrypt::store::SqliteObjectStore;
use dslcrypt::{
    CryptAlgorithm, KdfParams, KeyError, Keystore, KeystoreConfig, ObjectId, WrappingKey,
    WrappingKeyProps,
};
use tempfile::TempDir;

const WKEY: [u8; 32] = [0xa7; 32];

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn config() -> KeystoreConfig {
    KeystoreConfig {
        kdf: KdfParams {
            memory_kib: 256,
            time_cost: 1,
            parallelism: 1,
        },
        ..KeystoreConfig::default()
    }
}

fn open_keystore(dir: &TempDir) -> Result<Keystore<SqliteObjectStore>> {
    let store = SqliteObjectStore::open(dir.path().join("pool.db"))?;
    Ok(Keystore::new(store, config()))
}

fn fingerprints(
    ks: &Keystore<SqliteObjectStore>,
    kcobj: ObjectId,
    txgs: &[u64],
) -> Result<Vec<String>> {
    let kc = ks.lookup(kcobj, "test")?;
    let mut out = Vec::with_capacity(txgs.len());
    for txg in txgs {
        out.push(kc.lookup_key(*txg)?.fingerprint().to_hex());
    }
    Ok(out)
}

#[test]
fn test_keys_survive_reopen() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let probes = [10, 49, 50, 99, 100, 1_000];

    let (kcobj, before) = {
        let ks = open_keystore(&dir)?;
        let wkey = Arc::new(WrappingKey::from_raw(CryptAlgorithm::Aes256Ccm, &WKEY)?);
        let kcobj = ks.create_keychain(wkey, CryptAlgorithm::Aes256Gcm, 10)?;
        ks.add_key(kcobj, 50)?;
        ks.add_key(kcobj, 100)?;

        let before = fingerprints(&ks, kcobj, &probes)?;
        ks.unload(kcobj)?;
        ks.fini()?;
        (kcobj, before)
    };

    let ks = open_keystore(&dir)?;
    assert!(!ks.is_loaded(kcobj));
    ks.load(kcobj, &WKEY)?;

    let kc = ks.lookup(kcobj, "test")?;
    assert_eq!(kc.entry_txgs(), vec![10, 50, 100]);
    assert_eq!(kc.crypt(), Some(CryptAlgorithm::Aes256Gcm));
    drop(kc);

    assert_eq!(fingerprints(&ks, kcobj, &probes)?, before);
    ks.unload(kcobj)?;
    Ok(())
}

#[test]
fn test_rewrap_survives_reopen() -> Result<()> {
    init_tracing();
    let dir = tempfile::tempdir()?;
    let props = WrappingKeyProps::passphrase(
        CryptAlgorithm::Aes128Gcm,
        "correct horse battery staple",
        b"per-pool salt".to_vec(),
    );

    let (kcobj, before) = {
        let ks = open_keystore(&dir)?;
        let wkey = Arc::new(WrappingKey::from_raw(CryptAlgorithm::Aes256Ccm, &WKEY)?);
        let kcobj = ks.create_keychain(wkey, CryptAlgorithm::On, 5)?;
        ks.add_key(kcobj, 8)?;
        let before = fingerprints(&ks, kcobj, &[5, 8])?;

        ks.rewrap_with_props(kcobj, &props, 9)?;
        ks.unload(kcobj)?;
        (kcobj, before)
    };

    let ks = open_keystore(&dir)?;

    // The old wrapping key no longer opens the keychain.
    let err = ks.load(kcobj, &WKEY).unwrap_err();
    assert!(err.is_auth_failure());
    assert!(!ks.is_loaded(kcobj));

    ks.load_with_props(kcobj, &props)?;
    assert_eq!(fingerprints(&ks, kcobj, &[5, 8])?, before);
    ks.unload(kcobj)?;
    Ok(())
}

#[test]
fn test_destroyed_keychain_is_gone_after_reopen() -> Result<()> {
    let dir = tempfile::tempdir()?;

    let (kept, destroyed) = {
        let ks = open_keystore(&dir)?;
        let wkey = Arc::new(WrappingKey::from_raw(CryptAlgorithm::Aes256Ccm, &WKEY)?);
        let kept = ks.create_keychain(Arc::clone(&wkey), CryptAlgorithm::On, 1)?;
        let destroyed = ks.create_keychain(wkey, CryptAlgorithm::On, 1)?;
        ks.destroy_keychain(destroyed, 2)?;
        ks.unload(kept)?;
        (kept, destroyed)
    };

    let ks = open_keystore(&dir)?;
    ks.load(kept, &WKEY)?;
    assert!(matches!(
        ks.load(destroyed, &WKEY),
        Err(KeyError::Transaction(_))
    ));
    ks.unload(kept)?;
    Ok(())
}

#[test]
fn test_load_command_with_passphrase() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let props = WrappingKeyProps::passphrase(CryptAlgorithm::On, "hunter2", vec![3u8; 16]);
    let kdf = config().kdf;

    let kcobj = {
        let ks = open_keystore(&dir)?;
        let wkey = Arc::new(WrappingKey::from_props(&props, &kdf)?);
        let kcobj = ks.create_keychain(wkey, CryptAlgorithm::Aes192Ccm, 3)?;
        ks.unload(kcobj)?;
        kcobj
    };

    let ks = open_keystore(&dir)?;
    let cmd = dslcrypt::KeyCommand::LoadKey {
        kcobj,
        props: props.clone(),
    };
    ks.execute_bytes(&cmd.to_bytes()?)?;

    let kc = ks.lookup(kcobj, "test")?;
    assert_eq!(kc.crypt(), Some(CryptAlgorithm::Aes192Ccm));
    assert!(matches!(props.source, KeySource::Passphrase { .. }));
    drop(kc);
    ks.unload(kcobj)?;
    Ok(())
}
