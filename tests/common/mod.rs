use std::sync::Arc;

use small_tree::btree::Tree;
use small_tree::config::TreeConfig;
use small_tree::engine::Database;
use small_tree::file_manager::FileManager;
use small_tree::page::{Record, Value};

pub fn rec(key: u64, text: &str) -> Record {
    Record::new(key, Value::from_slice(text.as_bytes()))
}

/// A bare tree over its own temp file, for tests that exercise B+ tree
/// structure directly rather than going through `Database`.
pub fn new_tree(leaf_order: usize, internal_order: usize) -> (Tree, tempfile::NamedTempFile) {
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let pool = small_tree::buffer::BufferPool::new(small_tree::config::EngineConfig::default());
    let file = Arc::new(FileManager::open_or_create(tmp.path()).unwrap());
    let config = TreeConfig {
        leaf_order,
        internal_order,
        delayed_merge: true,
        verbose: false,
    };
    (Tree::open(pool, file, config), tmp)
}

/// A full `Database` with one table opened under the name `"t"`.
pub fn database_with_table() -> (Arc<Database>, tempfile::NamedTempFile, small_tree::catalog::TableId) {
    let db = Database::new(small_tree::config::EngineConfig::default(), TreeConfig::default());
    let tmp = tempfile::NamedTempFile::new().unwrap();
    let table_id = db.open_table("t", tmp.path()).unwrap();
    (db, tmp, table_id)
}
