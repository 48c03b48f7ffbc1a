use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};

use log::{debug, warn};
use once_cell::sync::OnceCell;

use crate::error::{DbError, DbResult};
use crate::txn::{TransactionCoordinator, TrxId};

use super::deadlock::DeadlockDetector;

/// A hierarchical lock identifier: table, page, and slot within the
/// page. Ordered lexicographically so callers can acquire locks in a
/// fixed global order where that matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hid {
    pub table_id: u32,
    pub page_id: u64,
    pub slot: usize,
}

impl Hid {
    pub fn new(table_id: u32, page_id: u64, slot: usize) -> Self {
        Hid { table_id, page_id, slot }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockMode {
    Shared,
    Exclusive,
}

pub struct Lock {
    pub(crate) hid: Hid,
    pub(crate) mode: LockMode,
    pub(crate) trxid: TrxId,
    waiting: AtomicBool,
}

impl Lock {
    fn new(hid: Hid, mode: LockMode, trxid: TrxId) -> Self {
        Lock {
            hid,
            mode,
            trxid,
            waiting: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }

    pub fn hid(&self) -> Hid {
        self.hid
    }

    fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub(crate) struct LockModule {
    mode: Option<LockMode>,
    pub(crate) run: Vec<Arc<Lock>>,
    pub(crate) wait: VecDeque<Arc<Lock>>,
}

/// A request is grantable only if it is mode-compatible with whoever is
/// currently running AND no one is already queued ahead of it — a
/// SHARED request must still queue behind an already-waiting EXCLUSIVE
/// request rather than jump it, or a steady stream of readers could
/// starve a writer forever.
fn lockable(module: &LockModule, mode: LockMode) -> bool {
    if !module.wait.is_empty() {
        return false;
    }
    match module.mode {
        None => true,
        Some(LockMode::Shared) => mode == LockMode::Shared,
        Some(LockMode::Exclusive) => false,
    }
}

#[derive(Default)]
pub(crate) struct LockTable {
    modules: HashMap<Hid, LockModule>,
}

/// Record-level locking with a FIFO wait queue per lockable id and a
/// background-free, poll-on-timeout deadlock detector.
pub struct LockManager {
    table: Mutex<LockTable>,
    cond: Condvar,
    detector: Mutex<DeadlockDetector>,
    coordinator: OnceCell<Weak<TransactionCoordinator>>,
}

impl LockManager {
    pub fn new() -> Arc<Self> {
        Arc::new(LockManager {
            table: Mutex::new(LockTable::default()),
            cond: Condvar::new(),
            detector: Mutex::new(DeadlockDetector::new()),
            coordinator: OnceCell::new(),
        })
    }

    /// Wire up the coordinator used to abort deadlock victims. Must be
    /// called exactly once, right after both are constructed (the two
    /// hold `Arc`s of each other, so this breaks the construction
    /// cycle).
    pub fn bind_coordinator(&self, coordinator: Weak<TransactionCoordinator>) {
        let _ = self.coordinator.set(coordinator);
    }

    /// Acquire `mode` on `hid` on behalf of `trxid`, blocking until it
    /// is grantable. Runs deadlock detection on every wait timeout;
    /// if this call's transaction is chosen as a victim, returns
    /// `DbError::Aborted` instead of the lock.
    pub fn require_lock(&self, trxid: TrxId, hid: Hid, mode: LockMode) -> DbResult<Arc<Lock>> {
        let mut table = self.table.lock().unwrap();

        {
            let module = table.modules.entry(hid).or_default();
            if lockable(module, mode) {
                let lock = Arc::new(Lock::new(hid, mode, trxid));
                module.mode = Some(mode);
                module.run.push(lock.clone());
                return Ok(lock);
            }
        }

        let lock = Arc::new(Lock::new(hid, mode, trxid));
        lock.waiting.store(true, Ordering::SeqCst);
        table.modules.get_mut(&hid).unwrap().wait.push_back(lock.clone());
        debug!("trx {} waiting for {:?} lock on {:?}", trxid, mode, hid);

        let mut interval = self.detector.lock().unwrap().current_interval();
        loop {
            let (guard, timeout) = self.cond.wait_timeout(table, interval).unwrap();
            table = guard;

            if !lock.is_waiting() {
                break;
            }
            if timeout.timed_out() {
                self.run_deadlock_detection(&mut table)?;
                interval = self.detector.lock().unwrap().current_interval();
            }
        }

        Ok(lock)
    }

    /// Release a held (or still-waiting) lock and wake whichever
    /// waiters become runnable.
    pub fn release_lock(&self, lock: &Arc<Lock>) {
        let mut table = self.table.lock().unwrap();
        self.release_lock_locked(&mut table, lock);
    }

    pub(crate) fn release_lock_locked(&self, table: &mut LockTable, lock: &Arc<Lock>) {
        let module = match table.modules.get_mut(&lock.hid) {
            Some(m) => m,
            None => return,
        };

        if let Some(pos) = module.run.iter().position(|l| Arc::ptr_eq(l, lock)) {
            module.run.remove(pos);
        } else {
            module.wait.retain(|l| !Arc::ptr_eq(l, lock));
            lock.waiting.store(false, Ordering::SeqCst);
        }

        if !module.run.is_empty() {
            return;
        }

        if module.wait.is_empty() {
            module.mode = None;
            return;
        }

        if module.wait.front().unwrap().mode == LockMode::Shared {
            module.mode = Some(LockMode::Shared);
            while let Some(front) = module.wait.front() {
                if front.mode != LockMode::Shared {
                    break;
                }
                let front = module.wait.pop_front().unwrap();
                front.waiting.store(false, Ordering::SeqCst);
                module.run.push(front);
            }
        } else {
            module.mode = Some(LockMode::Exclusive);
            let front = module.wait.pop_front().unwrap();
            front.waiting.store(false, Ordering::SeqCst);
            module.run.push(front);
        }

        self.cond.notify_all();
    }

    fn run_deadlock_detection(&self, table: &mut MutexGuard<'_, LockTable>) -> DbResult<()> {
        let mut detector = self.detector.lock().unwrap();
        if !detector.ready() {
            return Ok(());
        }

        let victims = detector.find_cycle(&table.modules);
        if victims.is_empty() {
            detector.back_off();
            return Ok(());
        }
        detector.reset();
        drop(detector);

        warn!("deadlock detected, aborting {} transaction(s): {:?}", victims.len(), victims);

        let coordinator = self
            .coordinator
            .get()
            .and_then(|w| w.upgrade())
            .ok_or_else(|| DbError::corrupt("lock manager has no bound coordinator"))?;

        for victim in victims {
            coordinator.abort_locked(&mut **table, victim)?;
        }
        self.cond.notify_all();
        Ok(())
    }
}
