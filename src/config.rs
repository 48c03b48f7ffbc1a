//! Tunable knobs for the tree and the engine around it.
//!
//! Production defaults match spec: `leaf_order = 32`, `internal_order =
//! 249`, `delayed_merge = true` — chosen so a leaf's records and an
//! internal node's entries exactly fill a 4096-byte page behind a
//! 128-byte header (31 * 128 = 3968 = 248 * 16).

use crate::page::PAGE_PAYLOAD_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Evict the least-recently-used frame first.
    Lru,
    /// Evict the most-recently-used frame first; useful for workloads
    /// (one-shot range scans, bulk joins) that would otherwise flush the
    /// working set out of the pool.
    Mru,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        EvictionPolicy::Lru
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TreeConfig {
    pub leaf_order: usize,
    pub internal_order: usize,
    pub delayed_merge: bool,
    pub verbose: bool,
}

impl TreeConfig {
    pub fn leaf_capacity(&self) -> usize {
        self.leaf_order - 1
    }

    pub fn internal_capacity(&self) -> usize {
        self.internal_order - 1
    }
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            leaf_order: 32,
            internal_order: 249,
            delayed_merge: true,
            verbose: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{ENTRY_SIZE, RECORD_SIZE};

    #[test]
    fn production_defaults_exactly_fill_a_page() {
        let cfg = TreeConfig::default();
        assert_eq!(cfg.leaf_capacity() * RECORD_SIZE, PAGE_PAYLOAD_SIZE);
        assert_eq!(cfg.internal_capacity() * ENTRY_SIZE, PAGE_PAYLOAD_SIZE);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub buffer_pool_capacity: usize,
    pub eviction_policy: EvictionPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_pool_capacity: 256,
            eviction_policy: EvictionPolicy::default(),
        }
    }
}
