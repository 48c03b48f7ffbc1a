use std::sync::Arc;

use crate::error::DbResult;
use crate::file_manager::{FileId, FileManager};
use crate::page::{PageNum, PAGE_SIZE};

use super::pool::BufferPool;

/// A pinned view onto one cached page. Mirrors the original's `Ubuffer`:
/// a handle carries enough to re-find its frame even after the pool has
/// evicted and reloaded it elsewhere, so callers never hold a raw frame
/// index across a call that might trigger eviction.
pub struct Handle {
    pool: Arc<BufferPool>,
    file: Arc<FileManager>,
    frame_idx: usize,
    expected_file_id: FileId,
    expected_pagenum: PageNum,
}

impl Handle {
    pub(super) fn new(
        pool: Arc<BufferPool>,
        file: Arc<FileManager>,
        frame_idx: usize,
        expected_file_id: FileId,
        expected_pagenum: PageNum,
    ) -> Self {
        Handle {
            pool,
            file,
            frame_idx,
            expected_file_id,
            expected_pagenum,
        }
    }

    pub fn pagenum(&self) -> PageNum {
        self.expected_pagenum
    }

    pub fn file_id(&self) -> FileId {
        self.expected_file_id
    }

    /// If another thread evicted our frame since the last access,
    /// re-buffer the page and repoint ourselves at its new slot.
    fn check_and_reload(&mut self) -> DbResult<()> {
        if self.pool.frame_matches(self.frame_idx, self.expected_file_id, self.expected_pagenum) {
            return Ok(());
        }
        let fresh = self.pool.buffering(&self.file, self.expected_pagenum)?;
        self.frame_idx = fresh.frame_idx;
        Ok(())
    }

    pub fn read<R>(&mut self, f: impl FnOnce(&[u8; PAGE_SIZE]) -> R) -> DbResult<R> {
        self.check_and_reload()?;
        self.pool.pin_and_read(self.frame_idx, f)
    }

    pub fn write<R>(&mut self, f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R) -> DbResult<R> {
        self.check_and_reload()?;
        self.pool.pin_and_write(self.frame_idx, f)
    }

    /// Swap which page two handles are pointed at without touching the
    /// underlying frames — used when a split/merge renumbers which
    /// logical page a frame represents.
    pub fn swap(a: &mut Handle, b: &mut Handle) {
        std::mem::swap(&mut a.frame_idx, &mut b.frame_idx);
        std::mem::swap(&mut a.file, &mut b.file);
        std::mem::swap(&mut a.expected_file_id, &mut b.expected_file_id);
        std::mem::swap(&mut a.expected_pagenum, &mut b.expected_pagenum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use tempfile::NamedTempFile;

    #[test]
    fn swap_exchanges_file_along_with_frame_metadata_and_survives_a_reload() {
        let tmp_a = NamedTempFile::new().unwrap();
        let tmp_b = NamedTempFile::new().unwrap();
        let file_a = Arc::new(FileManager::open_or_create(tmp_a.path()).unwrap());
        let file_b = Arc::new(FileManager::open_or_create(tmp_b.path()).unwrap());
        let pool = BufferPool::new(EngineConfig::default());

        let mut h_a = pool.new_page(&file_a).unwrap();
        h_a.write(|buf| buf[0] = 1).unwrap();
        let mut h_b = pool.new_page(&file_b).unwrap();
        h_b.write(|buf| buf[0] = 2).unwrap();

        Handle::swap(&mut h_a, &mut h_b);

        // after the swap, h_a refers to file_b's page and h_b to file_a's.
        assert_eq!(h_a.read(|buf| buf[0]).unwrap(), 2);
        assert_eq!(h_b.read(|buf| buf[0]).unwrap(), 1);

        // force eviction of every frame, so the next access must go
        // through check_and_reload against the (post-swap) expected file.
        pool.release_file(&file_a).unwrap();
        pool.release_file(&file_b).unwrap();

        assert_eq!(h_a.read(|buf| buf[0]).unwrap(), 2);
        assert_eq!(h_b.read(|buf| buf[0]).unwrap(), 1);
    }
}
