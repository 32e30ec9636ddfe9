//! StateStore: redb-backed persistence for the scheduler.
//!
//! Typed operations over the RTT matrix, run records and auto-created VMs.
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing and dry runs).

use std::path::Path;
use std::sync::Arc;

use redb::{AccessGuard, Database, ReadableDatabase, ReadableTable, StorageError, TableDefinition, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

const DATABASE: &str = "database";

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(|e| StateError::Open(format!("{}: {e}", path.display())))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store.
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(|e| StateError::Open(format!("in-memory: {e}")))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(|e| StateError::storage(DATABASE, e))?;
        for def in [NET_STATES, RUNS, AUTO_VMS] {
            txn.open_table(def).map_err(|e| StateError::storage(def.name(), e))?;
        }
        txn.commit().map_err(|e| StateError::storage(DATABASE, e))?;
        Ok(())
    }

    // ── Generic JSON rows ──────────────────────────────────────────

    fn put_json<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let table_name = def.name();
        if key.trim().is_empty() {
            return Err(StateError::InvalidRecord {
                table: table_name.to_string(),
                reason: "empty key".to_string(),
            });
        }
        let bytes = serde_json::to_vec(value).map_err(|e| StateError::Encode {
            table: table_name.to_string(),
            key: key.to_string(),
            message: e.to_string(),
        })?;
        let txn = self.db.begin_write().map_err(|e| StateError::storage(table_name, e))?;
        {
            let mut table = txn.open_table(def).map_err(|e| StateError::storage(table_name, e))?;
            table.insert(key, bytes.as_slice()).map_err(|e| StateError::storage(table_name, e))?;
        }
        txn.commit().map_err(|e| StateError::storage(table_name, e))?;
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let table_name = def.name();
        let txn = self.db.begin_read().map_err(|e| StateError::storage(table_name, e))?;
        let table = txn.open_table(def).map_err(|e| StateError::storage(table_name, e))?;
        match table.get(key).map_err(|e| StateError::storage(table_name, e))? {
            Some(guard) => Ok(Some(decode(table_name, key, guard.value())?)),
            None => Ok(None),
        }
    }

    /// Rows of `def` in key order, or reversed; at most `limit` of them.
    fn scan_json<T: DeserializeOwned>(&self, def: JsonTable, newest_first: bool, limit: usize) -> StateResult<Vec<T>> {
        let table_name = def.name();
        let txn = self.db.begin_read().map_err(|e| StateError::storage(table_name, e))?;
        let table = txn.open_table(def).map_err(|e| StateError::storage(table_name, e))?;
        let rows = table.iter().map_err(|e| StateError::storage(table_name, e))?;

        let mut results = Vec::new();
        if newest_first {
            for entry in rows.rev().take(limit) {
                results.push(decode_entry(table_name, entry)?);
            }
        } else {
            for entry in rows.take(limit) {
                results.push(decode_entry(table_name, entry)?);
            }
        }
        Ok(results)
    }

    fn delete_key(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let table_name = def.name();
        let txn = self.db.begin_write().map_err(|e| StateError::storage(table_name, e))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(|e| StateError::storage(table_name, e))?;
            existed = table.remove(key).map_err(|e| StateError::storage(table_name, e))?.is_some();
        }
        txn.commit().map_err(|e| StateError::storage(table_name, e))?;
        Ok(existed)
    }

    // ── Network state ──────────────────────────────────────────────

    /// Insert or replace the RTT row of one source cloud.
    pub fn put_net_state(&self, record: &NetStateRecord) -> StateResult<()> {
        let key = record.table_key();
        self.put_json(NET_STATES, &key, record)?;
        debug!(source = %key, peers = record.peers.len(), "net state stored");
        Ok(())
    }

    pub fn get_net_state(&self, source: &str) -> StateResult<Option<NetStateRecord>> {
        self.get_json(NET_STATES, source)
    }

    /// The whole RTT matrix, one row per source cloud.
    pub fn list_net_states(&self) -> StateResult<Vec<NetStateRecord>> {
        self.scan_json(NET_STATES, false, usize::MAX)
    }

    pub fn delete_net_state(&self, source: &str) -> StateResult<bool> {
        self.delete_key(NET_STATES, source)
    }

    // ── Runs ───────────────────────────────────────────────────────

    pub fn put_run(&self, run: &RunRecord) -> StateResult<()> {
        let key = run.table_key();
        self.put_json(RUNS, &key, run)?;
        debug!(run = %key, algorithm = %run.algorithm, "run stored");
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> StateResult<Option<RunRecord>> {
        self.get_json(RUNS, id)
    }

    /// Most recent runs first, at most `limit` of them.
    pub fn list_runs(&self, limit: usize) -> StateResult<Vec<RunRecord>> {
        self.scan_json(RUNS, true, limit)
    }

    // ── Auto-created VMs ───────────────────────────────────────────

    pub fn put_auto_vm(&self, vm: &AutoVmRecord) -> StateResult<()> {
        let key = vm.table_key();
        self.put_json(AUTO_VMS, &key, vm)?;
        debug!(vm = %key, cloud = %vm.cloud, "auto vm recorded");
        Ok(())
    }

    pub fn get_auto_vm(&self, name: &str) -> StateResult<Option<AutoVmRecord>> {
        self.get_json(AUTO_VMS, name)
    }

    pub fn list_auto_vms(&self) -> StateResult<Vec<AutoVmRecord>> {
        self.scan_json(AUTO_VMS, false, usize::MAX)
    }

    /// Forget a VM after it was deleted. Returns true if it was recorded.
    pub fn delete_auto_vm(&self, name: &str) -> StateResult<bool> {
        let existed = self.delete_key(AUTO_VMS, name)?;
        debug!(vm = %name, existed, "auto vm forgotten");
        Ok(existed)
    }
}

fn decode<T: DeserializeOwned>(table: &str, key: &str, bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(|e| StateError::Corrupt {
        table: table.to_string(),
        key: key.to_string(),
        message: e.to_string(),
    })
}

type RawEntry<'a> = Result<(AccessGuard<'a, &'static str>, AccessGuard<'a, &'static [u8]>), StorageError>;

fn decode_entry<T: DeserializeOwned>(table: &str, entry: RawEntry<'_>) -> StateResult<T> {
    let (key, value) = entry.map_err(|e| StateError::storage(table, e))?;
    decode(table, key.value(), value.value())
}
