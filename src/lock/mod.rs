//! Hierarchical record-level locking and cycle-detecting deadlock
//! resolution: a FIFO wait queue per lockable `Hid`, and a background-
//! free detector that runs on wait timeout rather than its own thread.

mod deadlock;
mod manager;

pub use deadlock::DeadlockDetector;
pub use manager::{Hid, Lock, LockManager, LockMode};
pub(crate) use manager::LockTable;
