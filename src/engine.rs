//! Engine-level API: the surface consumed by the CLI
//! harness and the join driver. Ties the catalog, buffer pool, lock
//! manager, and transaction coordinator to one `Tree` per open table,
//! and wires the transactional record-operation wrapper:
//! acquire the proper lock, capture an undo before-image on writes,
//! then touch the page through a `Handle`.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use log::info;

use crate::btree::Tree;
use crate::buffer::BufferPool;
use crate::catalog::{Catalog, TableId};
use crate::config::{EngineConfig, TreeConfig};
use crate::error::{DbError, DbResult};
use crate::file_manager::FileManager;
use crate::lock::{Hid, LockManager, LockMode};
use crate::page::{Record, Value};
use crate::txn::{TransactionCoordinator, TrxId};

pub struct Database {
    pool: Arc<BufferPool>,
    catalog: Arc<Catalog>,
    lock_manager: Arc<LockManager>,
    coordinator: Arc<TransactionCoordinator>,
    tree_config: TreeConfig,
    trees: Mutex<HashMap<TableId, Tree>>,
}

impl Database {
    pub fn new(engine_config: EngineConfig, tree_config: TreeConfig) -> Arc<Self> {
        let pool = BufferPool::new(engine_config);
        let catalog = Catalog::new();
        let lock_manager = LockManager::new();
        let coordinator = TransactionCoordinator::new(lock_manager.clone(), pool.clone(), catalog.clone());
        Arc::new(Database {
            pool,
            catalog,
            lock_manager,
            coordinator,
            tree_config,
            trees: Mutex::new(HashMap::new()),
        })
    }

    pub fn open_table<P: AsRef<Path>>(&self, name: &str, path: P) -> DbResult<TableId> {
        let table_id = self.catalog.open_table(name, path)?;
        let file = self.catalog.file_for(table_id)?;
        let tree = Tree::open(self.pool.clone(), file, self.tree_config);
        self.trees.lock().unwrap().insert(table_id, tree);
        Ok(table_id)
    }

    pub fn close_table(&self, table_id: TableId) -> DbResult<()> {
        let file = self.catalog.file_for(table_id)?;
        self.pool.release_file(&file)?;
        self.trees.lock().unwrap().remove(&table_id);
        self.catalog.close_table(table_id)
    }

    pub fn table_id_by_name(&self, name: &str) -> Option<TableId> {
        self.catalog.table_id_by_name(name)
    }

    fn tree_for(&self, table_id: TableId) -> DbResult<Tree> {
        self.trees
            .lock()
            .unwrap()
            .get(&table_id)
            .cloned()
            .ok_or_else(|| DbError::NotOpen(format!("{:?}", table_id)))
    }

    pub fn begin_trx(&self) -> TrxId {
        self.coordinator.begin()
    }

    pub fn commit_trx(&self, trxid: TrxId) -> DbResult<()> {
        self.coordinator.commit(trxid)
    }

    pub fn abort_trx(&self, trxid: TrxId) -> DbResult<()> {
        self.coordinator.abort(trxid)
    }

    /// `find(key)` scoped to `trxid`: acquire a shared lock on the
    /// record, then read it through the tree.
    pub fn find(&self, table_id: TableId, key: u64, trxid: TrxId) -> DbResult<Record> {
        let tree = self.tree_for(table_id)?;
        let (leaf_pn, slot) = tree.record_slot(key)?.ok_or(DbError::NotFound)?;
        let hid = Hid::new(table_id.0, leaf_pn, slot);
        self.coordinator.require_lock(trxid, hid, LockMode::Shared)?;
        tree.find(key)?.ok_or(DbError::NotFound)
    }

    /// `update(key, record)` scoped to `trxid`: acquire an exclusive
    /// lock, capture the page's before-image for abort, then overwrite
    /// the value in place.
    pub fn update(&self, table_id: TableId, key: u64, value: Value, trxid: TrxId) -> DbResult<()> {
        let tree = self.tree_for(table_id)?;
        let (leaf_pn, slot) = tree.record_slot(key)?.ok_or(DbError::NotFound)?;
        let hid = Hid::new(table_id.0, leaf_pn, slot);
        self.coordinator.require_lock(trxid, hid, LockMode::Exclusive)?;
        self.coordinator.capture_before_image(trxid, table_id, leaf_pn)?;
        if tree.update(key, value)? {
            Ok(())
        } else {
            Err(DbError::NotFound)
        }
    }

    /// Non-transactional administrative path: structural
    /// insert/delete used by bulk load and by the CLI's `insert`/
    /// `delete` commands, bypassing the lock manager entirely.
    pub fn insert(&self, table_id: TableId, key: u64, value: Value) -> DbResult<()> {
        self.tree_for(table_id)?.insert(key, value)
    }

    pub fn delete(&self, table_id: TableId, key: u64) -> DbResult<Record> {
        self.tree_for(table_id)?.delete(key)
    }

    pub fn find_range(&self, table_id: TableId, start: u64, end: u64) -> DbResult<Vec<Record>> {
        self.tree_for(table_id)?.find_range(start, end)
    }

    /// Build/probe hash equi-join on primary key across two tables:
    /// index the smaller side into a `HashMap`, then stream the other
    /// side through it — linear instead of the naive nested-loop scan.
    pub fn hash_join(&self, build_table: TableId, probe_table: TableId) -> DbResult<Vec<(Record, Record)>> {
        let build = self.tree_for(build_table)?;
        let probe = self.tree_for(probe_table)?;

        let mut index: HashMap<u64, Record> = HashMap::new();
        for record in build.iter_from(0)? {
            let record = record?;
            index.insert(record.key, record);
        }

        let mut out = Vec::new();
        for record in probe.iter_from(0)? {
            let record = record?;
            if let Some(build_record) = index.get(&record.key) {
                out.push((*build_record, record));
            }
        }
        info!(
            "hash_join: {} build rows, {} matches",
            index.len(),
            out.len()
        );
        Ok(out)
    }

    pub fn shutdown(&self) -> DbResult<()> {
        self.pool.shutdown()
    }
}
