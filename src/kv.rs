//! Persistent key-value access contract plus two backends:
//! an in-memory map for tests and ephemeral workers, and a `redb` file for
//! durable explorers.

use crate::error::{EngineError, Result};
use parking_lot::RwLock;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::collections::BTreeMap;
use std::path::Path;

/// Single table: string key -> raw value bytes.
const ENTRIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entries");

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    /// Every entry whose key starts with `prefix`, in key order.
    fn iterate(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for MemoryKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn iterate(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// redb
// ---------------------------------------------------------------------------

/// File-backed store. Each write is its own committed transaction.
pub struct RedbKv {
    db: Database,
}

impl std::fmt::Debug for RedbKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbKv").finish_non_exhaustive()
    }
}

fn io(e: impl std::fmt::Display) -> EngineError {
    EngineError::StoreIo(e.to_string())
}

impl RedbKv {
    /// Open or create a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = Database::create(path.as_ref()).map_err(io)?;
        {
            let write_txn = db.begin_write().map_err(io)?;
            let _ = write_txn.open_table(ENTRIES).map_err(io)?;
            write_txn.commit().map_err(io)?;
        }
        Ok(Self { db })
    }
}

impl KvStore for RedbKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(ENTRIES).map_err(io)?;
        let value = table.get(key).map_err(io)?.map(|v| v.value().to_vec());
        Ok(value)
    }

    fn put(&self, key: &str, value: &[u8]) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = write_txn.open_table(ENTRIES).map_err(io)?;
            table.insert(key, value).map_err(io)?;
        }
        write_txn.commit().map_err(io)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let write_txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = write_txn.open_table(ENTRIES).map_err(io)?;
            table.remove(key).map_err(io)?;
        }
        write_txn.commit().map_err(io)
    }

    fn iterate(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(ENTRIES).map_err(io)?;
        let mut out = Vec::new();
        for entry in table.range(prefix..).map_err(io)? {
            let (key, value) = entry.map_err(io)?;
            let key = key.value();
            if !key.starts_with(prefix) {
                break;
            }
            out.push((key.to_string(), value.value().to_vec()));
        }
        Ok(out)
    }
}
