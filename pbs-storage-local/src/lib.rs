//! `redb`-backed `ObjectStore`/`KeyValueStore` for single-node runs and
//! tests. Blocking `redb` calls are bridged onto the Tokio blocking pool so
//! the traits stay `async fn` all the way down.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};

use pbs_base::{err, Result};
use pbs_storage::{KeyValueStore, ObjectStore, Version, NOT_FOUND, PRECONDITION_FAILED};

const OBJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("objects");
const KV: TableDefinition<&str, &[u8]> = TableDefinition::new("kv");

fn object_key(bucket: &str, key: &str) -> String {
    format!("{bucket}\0{key}")
}

fn kv_key(table: &str, key: &str) -> String {
    format!("{table}\0{key}")
}

fn encode_versioned(version: u64, value: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + value.len());
    buf.extend_from_slice(&version.to_be_bytes());
    buf.extend_from_slice(value);
    buf
}

fn decode_versioned(bytes: &[u8]) -> (Version, Vec<u8>) {
    let (head, tail) = bytes.split_at(8);
    let version = u64::from_be_bytes(head.try_into().expect("versioned record has 8-byte prefix"));
    (Version(version), tail.to_vec())
}

pub struct RedbObjectStore {
    db: Arc<Database>,
}

impl RedbObjectStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(|e| err(format!("opening object store: {e}")))?;
        let write_txn = db.begin_write().map_err(|e| err(e.to_string()))?;
        write_txn.open_table(OBJECTS).map_err(|e| err(e.to_string()))?;
        write_txn.commit().map_err(|e| err(e.to_string()))?;
        Ok(RedbObjectStore { db: Arc::new(db) })
    }

    pub fn in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| err(format!("opening in-memory object store: {e}")))?;
        let write_txn = db.begin_write().map_err(|e| err(e.to_string()))?;
        write_txn.open_table(OBJECTS).map_err(|e| err(e.to_string()))?;
        write_txn.commit().map_err(|e| err(e.to_string()))?;
        Ok(RedbObjectStore { db: Arc::new(db) })
    }
}

#[async_trait]
impl ObjectStore for RedbObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: Vec<u8>) -> Result<()> {
        let db = self.db.clone();
        let composite = object_key(bucket, key);
        tokio::task::spawn_blocking(move || {
            let write_txn = db.begin_write().map_err(|e| err(e.to_string()))?;
            {
                let mut table = write_txn.open_table(OBJECTS).map_err(|e| err(e.to_string()))?;
                table.insert(composite.as_str(), bytes.as_slice()).map_err(|e| err(e.to_string()))?;
            }
            write_txn.commit().map_err(|e| err(e.to_string()))
        })
        .await
        .map_err(|e| err(e.to_string()))?
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let db = self.db.clone();
        let composite = object_key(bucket, key);
        tokio::task::spawn_blocking(move || {
            let read_txn = db.begin_read().map_err(|e| err(e.to_string()))?;
            let table = read_txn.open_table(OBJECTS).map_err(|e| err(e.to_string()))?;
            match table.get(composite.as_str()).map_err(|e| err(e.to_string()))? {
                Some(value) => Ok(value.value().to_vec()),
                None => Err(err(format!("{NOT_FOUND}: {composite}"))),
            }
        })
        .await
        .map_err(|e| err(e.to_string()))?
    }

    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        let db = self.db.clone();
        let lower = object_key(bucket, prefix);
        let bucket_prefix = format!("{bucket}\0");
        tokio::task::spawn_blocking(move || {
            let read_txn = db.begin_read().map_err(|e| err(e.to_string()))?;
            let table = read_txn.open_table(OBJECTS).map_err(|e| err(e.to_string()))?;
            let mut keys = Vec::new();
            for entry in table.range(lower.as_str()..).map_err(|e| err(e.to_string()))? {
                let (k, _) = entry.map_err(|e| err(e.to_string()))?;
                let k = k.value();
                if !k.starts_with(&lower) {
                    if k.starts_with(&bucket_prefix) {
                        continue;
                    }
                    break;
                }
                keys.push(k[bucket_prefix.len()..].to_string());
            }
            Ok(keys)
        })
        .await
        .map_err(|e| err(e.to_string()))?
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<()> {
        let db = self.db.clone();
        let composite = object_key(bucket, key);
        tokio::task::spawn_blocking(move || {
            let write_txn = db.begin_write().map_err(|e| err(e.to_string()))?;
            {
                let mut table = write_txn.open_table(OBJECTS).map_err(|e| err(e.to_string()))?;
                table.remove(composite.as_str()).map_err(|e| err(e.to_string()))?;
            }
            write_txn.commit().map_err(|e| err(e.to_string()))
        })
        .await
        .map_err(|e| err(e.to_string()))?
    }
}

pub struct RedbKeyValueStore {
    db: Arc<Database>,
}

impl RedbKeyValueStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path).map_err(|e| err(format!("opening kv store: {e}")))?;
        let write_txn = db.begin_write().map_err(|e| err(e.to_string()))?;
        write_txn.open_table(KV).map_err(|e| err(e.to_string()))?;
        write_txn.commit().map_err(|e| err(e.to_string()))?;
        Ok(RedbKeyValueStore { db: Arc::new(db) })
    }

    pub fn in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(|e| err(format!("opening in-memory kv store: {e}")))?;
        let write_txn = db.begin_write().map_err(|e| err(e.to_string()))?;
        write_txn.open_table(KV).map_err(|e| err(e.to_string()))?;
        write_txn.commit().map_err(|e| err(e.to_string()))?;
        Ok(RedbKeyValueStore { db: Arc::new(db) })
    }
}

#[async_trait]
impl KeyValueStore for RedbKeyValueStore {
    async fn get(&self, table: &str, key: &str) -> Result<Option<(Vec<u8>, Version)>> {
        let db = self.db.clone();
        let composite = kv_key(table, key);
        tokio::task::spawn_blocking(move || {
            let read_txn = db.begin_read().map_err(|e| err(e.to_string()))?;
            let t = read_txn.open_table(KV).map_err(|e| err(e.to_string()))?;
            match t.get(composite.as_str()).map_err(|e| err(e.to_string()))? {
                Some(value) => {
                    let (version, bytes) = decode_versioned(value.value());
                    Ok(Some((bytes, version)))
                }
                None => Ok(None),
            }
        })
        .await
        .map_err(|e| err(e.to_string()))?
    }

    async fn put_if_version(
        &self,
        table: &str,
        key: &str,
        value: Vec<u8>,
        expected_version: Option<Version>,
    ) -> Result<Version> {
        let db = self.db.clone();
        let composite = kv_key(table, key);
        tokio::task::spawn_blocking(move || {
            let write_txn = db.begin_write().map_err(|e| err(e.to_string()))?;
            let new_version;
            {
                let mut t = write_txn.open_table(KV).map_err(|e| err(e.to_string()))?;
                let current = t.get(composite.as_str()).map_err(|e| err(e.to_string()))?;
                let current_version = current.as_ref().map(|v| decode_versioned(v.value()).0);
                if current_version != expected_version {
                    return Err(err(format!("{PRECONDITION_FAILED}: {composite}")));
                }
                new_version = Version(current_version.map(|v| v.0).unwrap_or(0) + 1);
                drop(current);
                t.insert(composite.as_str(), encode_versioned(new_version.0, &value).as_slice())
                    .map_err(|e| err(e.to_string()))?;
            }
            write_txn.commit().map_err(|e| err(e.to_string()))?;
            Ok(new_version)
        })
        .await
        .map_err(|e| err(e.to_string()))?
    }
}
