//! # dslcrypt store
//!
//! Transactional object store for keychain records. Provides a trait-based
//! interface with SQLite and in-memory implementations.
//!
//! ## Overview
//!
//! Keychains persist their wrapped key records through the [`ObjectStore`]
//! trait, keeping the key hierarchy storage-agnostic. The primary
//! implementation is [`SqliteObjectStore`], with [`MemoryObjectStore`] for
//! testing.
//!
//! ## Key Types
//!
//! - [`ObjectStore`] - The synchronous trait for all storage operations
//! - [`Transaction`] - A batch of staged changes, applied atomically
//! - [`SqliteObjectStore`] - SQLite-based persistent storage
//! - [`MemoryObjectStore`] - In-memory storage with commit failure injection
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dslcrypt_store::{ObjectStore, SqliteObjectStore, Transaction};
//!
//! fn example() -> dslcrypt_store::Result<()> {
//!     let store = SqliteObjectStore::open("pool.db")?;
//!
//!     let obj = store.allocate_object()?;
//!     let mut tx = Transaction::new(10);
//!     tx.create_object(obj).put_record(obj, 10, vec![0u8; 72]);
//!     store.commit(tx)?;
//!
//!     let records = store.read_records(obj)?;
//!     assert_eq!(records.len(), 1);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryObjectStore;
pub use sqlite::SqliteObjectStore;
pub use traits::{ObjectStore, Transaction, TxOp};
