//! Transaction coordinator: strict two-phase locking plus an
//! undo-log-based abort path. Locks are released only after the undo
//! log has been fully replayed, never before.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::buffer::BufferPool;
use crate::catalog::{Catalog, TableId};
use crate::error::{DbError, DbResult};
use crate::lock::{Hid, Lock, LockManager, LockMode, LockTable};
use crate::page::{PageNum, PAGE_SIZE};

pub type TrxId = u64;
pub const INVALID_TRXID: TrxId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrxState {
    Running,
    Aborted,
    Committed,
}

struct UndoRecord {
    table_id: TableId,
    page_id: PageNum,
    before: Box<[u8; PAGE_SIZE]>,
}

struct Transaction {
    id: TrxId,
    state: Mutex<TrxState>,
    held_locks: Mutex<HashMap<Hid, Arc<Lock>>>,
    undo_log: Mutex<Vec<UndoRecord>>,
    captured_pages: Mutex<HashSet<(TableId, PageNum)>>,
}

impl Transaction {
    fn new(id: TrxId) -> Self {
        Transaction {
            id,
            state: Mutex::new(TrxState::Running),
            held_locks: Mutex::new(HashMap::new()),
            undo_log: Mutex::new(Vec::new()),
            captured_pages: Mutex::new(HashSet::new()),
        }
    }

    fn check_not_aborted(&self) -> DbResult<()> {
        if *self.state.lock().unwrap() == TrxState::Aborted {
            Err(DbError::Aborted)
        } else {
            Ok(())
        }
    }

    /// Acquire `mode` on `hid`, elevating an already-held weaker lock
    /// in place rather than taking a second one.
    fn require_lock(&self, manager: &LockManager, hid: Hid, mode: LockMode) -> DbResult<()> {
        self.check_not_aborted()?;

        let existing = self.held_locks.lock().unwrap().get(&hid).cloned();
        if let Some(existing) = existing {
            if mode <= existing.mode() {
                return Ok(());
            }
            manager.release_lock(&existing);
            let elevated = manager.require_lock(self.id, hid, mode)?;
            self.check_not_aborted()?;
            self.held_locks.lock().unwrap().insert(hid, elevated);
            return Ok(());
        }

        let lock = manager.require_lock(self.id, hid, mode)?;
        self.check_not_aborted()?;
        self.held_locks.lock().unwrap().insert(hid, lock);
        Ok(())
    }

    /// Save a page's current on-disk bytes the first time this
    /// transaction is about to modify it, so abort can restore them.
    fn capture_before_image(
        &self,
        pool: &Arc<BufferPool>,
        catalog: &Arc<Catalog>,
        table_id: TableId,
        page_id: PageNum,
    ) -> DbResult<()> {
        if !self.captured_pages.lock().unwrap().insert((table_id, page_id)) {
            return Ok(());
        }
        let file = catalog.file_for(table_id)?;
        let mut handle = pool.buffering(&file, page_id)?;
        let bytes = handle.read(|buf| *buf)?;
        self.undo_log.lock().unwrap().push(UndoRecord {
            table_id,
            page_id,
            before: Box::new(bytes),
        });
        Ok(())
    }

    fn replay_undo(&self, pool: &Arc<BufferPool>, catalog: &Arc<Catalog>) -> DbResult<()> {
        let mut log = self.undo_log.lock().unwrap();
        while let Some(record) = log.pop() {
            let file = catalog.file_for(record.table_id)?;
            let mut handle = pool.buffering(&file, record.page_id)?;
            handle.write(|buf| *buf = *record.before)?;
        }
        Ok(())
    }

    fn release_all(&self, manager: &LockManager) {
        let held: Vec<Arc<Lock>> = self.held_locks.lock().unwrap().drain().map(|(_, l)| l).collect();
        for lock in held {
            manager.release_lock(&lock);
        }
    }

    fn release_all_locked(&self, manager: &LockManager, table: &mut LockTable) {
        let held: Vec<Arc<Lock>> = self.held_locks.lock().unwrap().drain().map(|(_, l)| l).collect();
        for lock in held {
            manager.release_lock_locked(table, &lock);
        }
    }
}

/// Owns every active transaction, hands out monotonically increasing
/// ids (skipping the wraparound to zero), and drives commit/abort.
pub struct TransactionCoordinator {
    lock_manager: Arc<LockManager>,
    buffer_pool: Arc<BufferPool>,
    catalog: Arc<Catalog>,
    next_id: AtomicU64,
    transactions: Mutex<HashMap<TrxId, Arc<Transaction>>>,
}

impl TransactionCoordinator {
    pub fn new(lock_manager: Arc<LockManager>, buffer_pool: Arc<BufferPool>, catalog: Arc<Catalog>) -> Arc<Self> {
        let coordinator = Arc::new(TransactionCoordinator {
            lock_manager: lock_manager.clone(),
            buffer_pool,
            catalog,
            next_id: AtomicU64::new(1),
            transactions: Mutex::new(HashMap::new()),
        });
        lock_manager.bind_coordinator(Arc::downgrade(&coordinator));
        coordinator
    }

    pub fn begin(&self) -> TrxId {
        let mut id = self.next_id.fetch_add(1, Ordering::SeqCst);
        if id == INVALID_TRXID {
            id = self.next_id.fetch_add(1, Ordering::SeqCst);
        }
        self.transactions.lock().unwrap().insert(id, Arc::new(Transaction::new(id)));
        debug!("began trx {}", id);
        id
    }

    fn get(&self, trxid: TrxId) -> DbResult<Arc<Transaction>> {
        self.transactions
            .lock()
            .unwrap()
            .get(&trxid)
            .cloned()
            .ok_or(DbError::NotFound)
    }

    pub fn require_lock(&self, trxid: TrxId, hid: Hid, mode: LockMode) -> DbResult<()> {
        self.get(trxid)?.require_lock(&self.lock_manager, hid, mode)
    }

    pub fn capture_before_image(&self, trxid: TrxId, table_id: TableId, page_id: PageNum) -> DbResult<()> {
        self.get(trxid)?
            .capture_before_image(&self.buffer_pool, &self.catalog, table_id, page_id)
    }

    pub fn commit(&self, trxid: TrxId) -> DbResult<()> {
        let trx = self.transactions.lock().unwrap().remove(&trxid).ok_or(DbError::NotFound)?;
        *trx.state.lock().unwrap() = TrxState::Committed;
        trx.release_all(&self.lock_manager);
        info!("committed trx {}", trxid);
        Ok(())
    }

    pub fn abort(&self, trxid: TrxId) -> DbResult<()> {
        let trx = self.transactions.lock().unwrap().remove(&trxid).ok_or(DbError::NotFound)?;
        *trx.state.lock().unwrap() = TrxState::Aborted;
        trx.replay_undo(&self.buffer_pool, &self.catalog)?;
        trx.release_all(&self.lock_manager);
        info!("aborted trx {}", trxid);
        Ok(())
    }

    /// Abort a deadlock victim from inside `LockManager::require_lock`'s
    /// wait loop, which already holds the lock table's mutex guard —
    /// lock release must reuse that guard rather than re-locking.
    pub(crate) fn abort_locked(&self, table: &mut LockTable, trxid: TrxId) -> DbResult<()> {
        let trx = match self.transactions.lock().unwrap().remove(&trxid) {
            Some(trx) => trx,
            None => return Ok(()),
        };
        *trx.state.lock().unwrap() = TrxState::Aborted;
        trx.replay_undo(&self.buffer_pool, &self.catalog)?;
        trx.release_all_locked(&self.lock_manager, table);
        info!("aborted trx {} (deadlock victim)", trxid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tempfile::NamedTempFile;

    fn harness() -> (Arc<TransactionCoordinator>, Arc<Catalog>, Arc<BufferPool>, NamedTempFile, TableId) {
        let tmp = NamedTempFile::new().unwrap();
        let pool = BufferPool::new(EngineConfig::default());
        let catalog = Catalog::new();
        let table_id = catalog.open_table("t", tmp.path()).unwrap();
        let lock_manager = LockManager::new();
        let coordinator = TransactionCoordinator::new(lock_manager, pool.clone(), catalog.clone());
        (coordinator, catalog, pool, tmp, table_id)
    }

    #[test]
    fn commit_releases_locks_without_touching_data() {
        let (coordinator, _catalog, _pool, _tmp, _table_id) = harness();
        let trx = coordinator.begin();
        coordinator
            .require_lock(trx, Hid::new(1, 1, 0), LockMode::Exclusive)
            .unwrap();
        coordinator.commit(trx).unwrap();
        assert!(coordinator.commit(trx).is_err(), "double commit should fail");
    }

    #[test]
    fn abort_restores_the_before_image_of_a_captured_page() {
        let (coordinator, catalog, pool, _tmp, table_id) = harness();
        let trx = coordinator.begin();
        let file = catalog.file_for(table_id).unwrap();

        let mut h = pool.new_page(&file).unwrap();
        let pagenum = h.pagenum();
        h.write(|buf| buf[0] = 1).unwrap();
        drop(h);

        coordinator.capture_before_image(trx, table_id, pagenum).unwrap();
        let mut h = pool.buffering(&file, pagenum).unwrap();
        h.write(|buf| buf[0] = 99).unwrap();
        drop(h);

        coordinator.abort(trx).unwrap();

        let mut h = pool.buffering(&file, pagenum).unwrap();
        assert_eq!(h.read(|buf| buf[0]).unwrap(), 1);
    }

    #[test]
    fn lock_elevation_reuses_the_same_hid_entry() {
        let (coordinator, _catalog, _pool, _tmp, _table_id) = harness();
        let trx = coordinator.begin();
        let hid = Hid::new(1, 1, 0);
        coordinator.require_lock(trx, hid, LockMode::Shared).unwrap();
        coordinator.require_lock(trx, hid, LockMode::Exclusive).unwrap();
        assert_eq!(
            coordinator.get(trx).unwrap().held_locks.lock().unwrap().len(),
            1
        );
        coordinator.commit(trx).unwrap();
    }
}
