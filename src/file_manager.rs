//! File manager: opens a table file, reads/writes page-sized blocks, and
//! allocates/frees pages via the in-header free list.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::debug;

use crate::error::DbResult;
use crate::page::{free_page_next, free_page_set_next, FileHeader, PageNum, INVALID_PAGENUM, PAGE_SIZE};

/// Stable per-file identifier, derived from the filename (see
/// `hash_filename`). Used by the buffer pool to key frames, independent
/// of the engine-assigned `TableId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub u64);

/// Streaming hash of a path's basename: `h <- c + (h<<6) + (h<<16) - h`,
/// reset to zero at each `/` or `\` separator, so only the basename
/// contributes: `hash("/a/b/file") == hash("file")`.
pub fn hash_filename(path: &str) -> u64 {
    let mut h: u64 = 0;
    for c in path.bytes() {
        if c == b'/' || c == b'\\' {
            h = 0;
            continue;
        }
        h = (c as u64)
            .wrapping_add(h << 6)
            .wrapping_add(h << 16)
            .wrapping_sub(h);
    }
    h
}

pub struct FileManager {
    path: PathBuf,
    id: FileId,
    file: Mutex<File>,
}

impl FileManager {
    /// Open an existing table file, or create and initialize one if it
    /// does not yet exist.
    pub fn open_or_create<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let path = path.as_ref();
        let id = FileId(hash_filename(&path.to_string_lossy()));

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        // A path can exist as a zero-length placeholder (e.g. a
        // just-created temp file) without carrying a header page yet;
        // key initialization off content, not existence.
        let needs_init = file.metadata()?.len() < PAGE_SIZE as u64;
        let manager = FileManager {
            path: path.to_path_buf(),
            id,
            file: Mutex::new(file),
        };
        if needs_init {
            manager.init_header()?;
        }
        Ok(manager)
    }

    fn init_header(&self) -> DbResult<()> {
        let mut buf = [0u8; PAGE_SIZE];
        FileHeader::empty().encode(&mut buf);
        self.write_raw(0, &buf)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get_id(&self) -> FileId {
        self.id
    }

    fn write_raw(&self, pagenum: PageNum, buf: &[u8; PAGE_SIZE]) -> DbResult<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(pagenum * PAGE_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn read_raw(&self, pagenum: PageNum, buf: &mut [u8; PAGE_SIZE]) -> DbResult<()> {
        let mut file = self.file.lock().unwrap();
        let offset = pagenum * PAGE_SIZE as u64;
        let len = file.metadata()?.len();
        if offset >= len {
            *buf = [0u8; PAGE_SIZE];
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn page_read(&self, pagenum: PageNum, buf: &mut [u8; PAGE_SIZE]) -> DbResult<()> {
        self.read_raw(pagenum, buf)
    }

    pub fn page_write(&self, pagenum: PageNum, buf: &[u8; PAGE_SIZE]) -> DbResult<()> {
        self.write_raw(pagenum, buf)
    }

    pub fn header(&self) -> DbResult<FileHeader> {
        let mut buf = [0u8; PAGE_SIZE];
        self.read_raw(0, &mut buf)?;
        Ok(FileHeader::decode(&buf))
    }

    fn write_header(&self, header: &FileHeader) -> DbResult<()> {
        let mut buf = [0u8; PAGE_SIZE];
        header.encode(&mut buf);
        self.write_raw(0, &buf)
    }

    pub fn root_page_number(&self) -> DbResult<PageNum> {
        Ok(self.header()?.root_page_number)
    }

    pub fn set_root_page_number(&self, root: PageNum) -> DbResult<()> {
        let mut header = self.header()?;
        header.root_page_number = root;
        self.write_header(&header)
    }

    /// Allocate a page: pop the free list if non-empty, else extend the
    /// file by one page.
    pub fn page_create(&self) -> DbResult<PageNum> {
        let mut header = self.header()?;

        if header.free_page_number != INVALID_PAGENUM {
            let freed = header.free_page_number;
            let mut buf = [0u8; PAGE_SIZE];
            self.read_raw(freed, &mut buf)?;
            header.free_page_number = free_page_next(&buf);
            self.write_header(&header)?;
            debug!("page_create: reused freed page {}", freed);
            // zero the reused page so stale free-list bytes don't leak
            // into the new node's header.
            self.write_raw(freed, &[0u8; PAGE_SIZE])?;
            return Ok(freed);
        }

        let new_pagenum = header.number_of_pages;
        header.number_of_pages += 1;
        self.write_header(&header)?;
        self.write_raw(new_pagenum, &[0u8; PAGE_SIZE])?;
        debug!("page_create: extended file to page {}", new_pagenum);
        Ok(new_pagenum)
    }

    /// Thread `pagenum` onto the LIFO free list.
    pub fn page_free(&self, pagenum: PageNum) -> DbResult<()> {
        let mut header = self.header()?;
        let mut buf = [0u8; PAGE_SIZE];
        free_page_set_next(&mut buf, header.free_page_number);
        self.write_raw(pagenum, &buf)?;
        header.free_page_number = pagenum;
        self.write_header(&header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn filename_hash_ignores_directory_components() {
        assert_eq!(hash_filename("/a/b/file"), hash_filename("file"));
        assert_eq!(hash_filename("a\\b\\file"), hash_filename("file"));
    }

    #[test]
    fn page_create_extends_then_reuses_freed_pages() {
        let tmp = NamedTempFile::new().unwrap();
        let fm = FileManager::open_or_create(tmp.path()).unwrap();

        let p1 = fm.page_create().unwrap();
        let p2 = fm.page_create().unwrap();
        assert_ne!(p1, p2);

        fm.page_free(p1).unwrap();
        let p3 = fm.page_create().unwrap();
        assert_eq!(p3, p1, "freed page should be handed out before extending");

        let p4 = fm.page_create().unwrap();
        assert!(p4 > p2, "next allocation after the free list empties extends the file");
    }

    #[test]
    fn root_page_number_round_trips() {
        let tmp = NamedTempFile::new().unwrap();
        let fm = FileManager::open_or_create(tmp.path()).unwrap();
        assert_eq!(fm.root_page_number().unwrap(), INVALID_PAGENUM);
        fm.set_root_page_number(5).unwrap();
        assert_eq!(fm.root_page_number().unwrap(), 5);
    }

    #[test]
    fn reopening_an_existing_file_keeps_its_id_and_contents() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        {
            let fm = FileManager::open_or_create(&path).unwrap();
            fm.set_root_page_number(9).unwrap();
        }
        let fm = FileManager::open_or_create(&path).unwrap();
        assert_eq!(fm.root_page_number().unwrap(), 9);
    }
}
