//! SQLite implementation of the ObjectStore trait.
//!
//! This is the primary persistent backend. It uses rusqlite with bundled
//! SQLite; each [`Transaction`] maps onto one SQLite transaction.

use std::path::Path;
use std::sync::Mutex;

use bytes::Bytes;
use dslcrypt_core::ObjectId;
use rusqlite::{params, Connection};

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{ObjectStore, Transaction, TxOp};

/// SQLite-based object store.
///
/// Thread-safe via internal Mutex.
pub struct SqliteObjectStore {
    conn: Mutex<Connection>,
}

impl SqliteObjectStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.conn.lock().map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                Some(format!("mutex poisoned: {}", e)),
            ))
        })?;
        f(&conn)
    }

    fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|e| {
            StoreError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                Some(format!("mutex poisoned: {}", e)),
            ))
        })?;
        f(&mut conn)
    }
}

// SQLite integers are signed; ids, keys, and txgs above i64::MAX are refused.
fn to_sql(value: u64, what: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("{} {} out of range", what, value)))
}

fn from_sql(value: i64, what: &str) -> Result<u64> {
    u64::try_from(value)
        .map_err(|_| StoreError::InvalidData(format!("negative {} in storage: {}", what, value)))
}

fn exists(conn: &Connection, obj: i64) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM objects WHERE obj = ?1)",
        params![obj],
        |row| row.get(0),
    )?)
}

fn allocated(conn: &Connection, obj: i64) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM object_ids WHERE obj = ?1)",
        params![obj],
        |row| row.get(0),
    )?)
}

fn apply_op(conn: &Connection, txg: i64, op: &TxOp) -> Result<()> {
    match op {
        TxOp::CreateObject(obj) => {
            let id = to_sql(obj.get(), "object id")?;
            if !allocated(conn, id)? {
                return Err(StoreError::InvalidData(format!(
                    "object {} was never allocated",
                    obj
                )));
            }
            if exists(conn, id)? {
                return Err(StoreError::ObjectExists(*obj));
            }
            conn.execute(
                "INSERT INTO objects (obj, created_txg) VALUES (?1, ?2)",
                params![id, txg],
            )?;
        }
        TxOp::PutRecord { obj, key, data } => {
            let id = to_sql(obj.get(), "object id")?;
            if !exists(conn, id)? {
                return Err(StoreError::ObjectNotFound(*obj));
            }
            conn.execute(
                "INSERT INTO records (obj, key, data, written_txg) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(obj, key) DO UPDATE
                 SET data = excluded.data, written_txg = excluded.written_txg",
                params![id, to_sql(*key, "record key")?, &data[..], txg],
            )?;
        }
        TxOp::FreeObject(obj) => {
            let id = to_sql(obj.get(), "object id")?;
            if !exists(conn, id)? {
                return Err(StoreError::ObjectNotFound(*obj));
            }
            conn.execute("DELETE FROM records WHERE obj = ?1", params![id])?;
            conn.execute("DELETE FROM objects WHERE obj = ?1", params![id])?;
        }
    }
    Ok(())
}

impl ObjectStore for SqliteObjectStore {
    fn allocate_object(&self) -> Result<ObjectId> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO object_ids (allocated_at) VALUES (?1)",
                params![now_millis()],
            )?;
            Ok(ObjectId::new(from_sql(conn.last_insert_rowid(), "object id")?))
        })
    }

    fn object_exists(&self, obj: ObjectId) -> Result<bool> {
        let id = to_sql(obj.get(), "object id")?;
        self.with_conn(|conn| exists(conn, id))
    }

    fn read_records(&self, obj: ObjectId) -> Result<Vec<(u64, Bytes)>> {
        let id = to_sql(obj.get(), "object id")?;
        self.with_conn(|conn| {
            if !exists(conn, id)? {
                return Err(StoreError::ObjectNotFound(obj));
            }

            let mut stmt =
                conn.prepare("SELECT key, data FROM records WHERE obj = ?1 ORDER BY key")?;
            let rows = stmt.query_map(params![id], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;

            let mut records = Vec::new();
            for row in rows {
                let (key, data) = row?;
                records.push((from_sql(key, "record key")?, Bytes::from(data)));
            }
            Ok(records)
        })
    }

    fn commit(&self, tx: Transaction) -> Result<()> {
        let txg = to_sql(tx.txg(), "txg")?;
        self.with_conn_mut(|conn| {
            // Dropping `db` on an early return rolls everything back.
            let db = conn.transaction()?;
            for op in tx.ops() {
                apply_op(&db, txg, op)?;
            }
            db.commit()?;

            tracing::trace!(txg = tx.txg(), ops = tx.len(), "committed transaction");
            Ok(())
        })
    }

    fn list_objects(&self) -> Result<Vec<ObjectId>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT obj FROM objects ORDER BY obj")?;
            let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;

            let mut objects = Vec::new();
            for row in rows {
                objects.push(ObjectId::new(from_sql(row?, "object id")?));
            }
            Ok(objects)
        })
    }
}

/// Get current time in milliseconds.
fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(store: &SqliteObjectStore, txg: u64) -> ObjectId {
        let obj = store.allocate_object().unwrap();
        let mut tx = Transaction::new(txg);
        tx.create_object(obj);
        store.commit(tx).unwrap();
        obj
    }

    #[test]
    fn test_put_and_read_ordered() {
        let store = SqliteObjectStore::open_memory().unwrap();
        let obj = create(&store, 5);

        let mut tx = Transaction::new(6);
        tx.put_record(obj, 50, vec![2u8; 72])
            .put_record(obj, 10, vec![1u8; 72]);
        store.commit(tx).unwrap();

        let records = store.read_records(obj).unwrap();
        let keys: Vec<u64> = records.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![10, 50]);
        assert_eq!(records[0].1.len(), 72);
    }

    #[test]
    fn test_upsert_replaces_record() {
        let store = SqliteObjectStore::open_memory().unwrap();
        let obj = create(&store, 1);

        for fill in [0xaau8, 0xbb] {
            let mut tx = Transaction::new(2);
            tx.put_record(obj, 1, vec![fill; 4]);
            store.commit(tx).unwrap();
        }

        let records = store.read_records(obj).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.as_ref(), &[0xbb; 4]);
    }

    #[test]
    fn test_failed_commit_rolls_back() {
        let store = SqliteObjectStore::open_memory().unwrap();
        let obj = create(&store, 1);
        let fresh = store.allocate_object().unwrap();

        let mut tx = Transaction::new(2);
        tx.create_object(fresh)
            .put_record(obj, 2, vec![1u8])
            .put_record(ObjectId::new(4242), 2, vec![1u8]);
        assert!(matches!(
            store.commit(tx),
            Err(StoreError::ObjectNotFound(_))
        ));

        assert!(!store.object_exists(fresh).unwrap());
        assert!(store.read_records(obj).unwrap().is_empty());
    }

    #[test]
    fn test_free_removes_records() {
        let store = SqliteObjectStore::open_memory().unwrap();
        let obj = create(&store, 1);

        let mut tx = Transaction::new(2);
        tx.put_record(obj, 1, vec![1u8]);
        store.commit(tx).unwrap();

        let mut tx = Transaction::new(3);
        tx.free_object(obj);
        store.commit(tx).unwrap();

        assert!(matches!(
            store.read_records(obj),
            Err(StoreError::ObjectNotFound(_))
        ));
        assert!(store.list_objects().unwrap().is_empty());
    }

    #[test]
    fn test_out_of_range_key_rejected() {
        let store = SqliteObjectStore::open_memory().unwrap();
        let obj = create(&store, 1);

        let mut tx = Transaction::new(2);
        tx.put_record(obj, u64::MAX, vec![1u8]);
        assert!(matches!(store.commit(tx), Err(StoreError::InvalidData(_))));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.db");

        let obj = {
            let store = SqliteObjectStore::open(&path).unwrap();
            let obj = create(&store, 1);
            let mut tx = Transaction::new(2);
            tx.put_record(obj, 7, vec![9u8; 8]);
            store.commit(tx).unwrap();
            obj
        };

        let store = SqliteObjectStore::open(&path).unwrap();
        assert_eq!(store.list_objects().unwrap(), vec![obj]);
        assert_eq!(
            store.read_records(obj).unwrap(),
            vec![(7, Bytes::from(vec![9u8; 8]))]
        );

        // Freed and allocated ids are never handed out again.
        let next = store.allocate_object().unwrap();
        assert!(next > obj);
    }
}
