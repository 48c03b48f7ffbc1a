//! The buffer pool: a fixed-capacity frame cache mediating all page I/O.

mod handle;
mod pool;

pub use handle::Handle;
pub use pool::BufferPool;
