//! Crate-wide error type.
//!
//! A `Display` + `std::error::Error` wrapper with an optional backtrace
//! dump, kept as a proper enum so callers can match on failure kind
//! instead of parsing strings.

use std::fmt;
use std::io;

#[derive(Debug)]
pub enum DbError {
    /// I/O failure on a page read/write, or on file open/create.
    Io(String),
    /// The requested key does not exist.
    NotFound,
    /// Insert was attempted with a key that is already present.
    DuplicateKey,
    /// A structural precondition was violated (corrupt page, impossible
    /// topology, root with unexpected shape).
    Corrupt(String),
    /// The buffer pool has no evictable frame (every frame pinned).
    NoEvictableFrame,
    /// The calling transaction has been aborted (by the deadlock
    /// detector or by an earlier conflict) and must not proceed.
    Aborted,
    /// The named table/transaction handle does not exist.
    NotOpen(String),
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DbError::Io(msg) => write!(f, "io error: {}", msg),
            DbError::NotFound => write!(f, "key not found"),
            DbError::DuplicateKey => write!(f, "duplicate key"),
            DbError::Corrupt(msg) => write!(f, "corrupt structure: {}", msg),
            DbError::NoEvictableFrame => {
                write!(f, "buffer pool exhausted: no evictable frame")
            }
            DbError::Aborted => write!(f, "transaction aborted"),
            DbError::NotOpen(msg) => write!(f, "not open: {}", msg),
        }
    }
}

impl std::error::Error for DbError {}

impl From<io::Error> for DbError {
    fn from(e: io::Error) -> Self {
        DbError::Io(e.to_string())
    }
}

impl DbError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        DbError::Corrupt(msg.into())
    }

    /// Dump a backtrace to the log. Reserved for structural/corruption
    /// failures that are worth a full trace when `verbose` logging is on.
    pub fn show_backtrace(&self) {
        let bt = backtrace::Backtrace::new();
        log::error!("{}\n{:?}", self, bt);
    }
}

pub type DbResult<T> = Result<T, DbError>;
