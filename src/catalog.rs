//! Table registry: maps a short-lived `TableId` to the on-disk file (and,
//! through it, the B+ tree rooted in that file) backing it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use log::info;

use crate::error::{DbError, DbResult};
use crate::file_manager::FileManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(pub u32);

struct TableEntry {
    name: String,
    file: Arc<FileManager>,
}

/// Holds one `FileManager` per open table, keyed by an engine-assigned
/// `TableId` distinct from the file-hash-derived `FileId` the buffer
/// pool uses internally.
pub struct Catalog {
    next_id: AtomicU32,
    tables: Mutex<HashMap<TableId, TableEntry>>,
}

impl Catalog {
    pub fn new() -> Arc<Self> {
        Arc::new(Catalog {
            next_id: AtomicU32::new(1),
            tables: Mutex::new(HashMap::new()),
        })
    }

    /// Open (creating if necessary) the table file at `path` and
    /// register it under a fresh `TableId`.
    pub fn open_table<P: AsRef<Path>>(&self, name: &str, path: P) -> DbResult<TableId> {
        let file = Arc::new(FileManager::open_or_create(path)?);
        let id = TableId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.tables.lock().unwrap().insert(
            id,
            TableEntry {
                name: name.to_string(),
                file,
            },
        );
        info!("opened table {:?} as {:?}", name, id);
        Ok(id)
    }

    pub fn close_table(&self, table_id: TableId) -> DbResult<()> {
        self.tables
            .lock()
            .unwrap()
            .remove(&table_id)
            .map(|_| ())
            .ok_or_else(|| DbError::NotOpen(format!("{:?}", table_id)))
    }

    pub fn file_for(&self, table_id: TableId) -> DbResult<Arc<FileManager>> {
        self.tables
            .lock()
            .unwrap()
            .get(&table_id)
            .map(|entry| entry.file.clone())
            .ok_or_else(|| DbError::NotOpen(format!("{:?}", table_id)))
    }

    pub fn table_id_by_name(&self, name: &str) -> Option<TableId> {
        self.tables
            .lock()
            .unwrap()
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn open_close_and_lookup_by_name() {
        let tmp = NamedTempFile::new().unwrap();
        let catalog = Catalog::new();
        let id = catalog.open_table("widgets", tmp.path()).unwrap();
        assert_eq!(catalog.table_id_by_name("widgets"), Some(id));
        assert!(catalog.file_for(id).is_ok());

        catalog.close_table(id).unwrap();
        assert!(catalog.file_for(id).is_err());
    }
}
