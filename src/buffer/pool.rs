use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use log::{debug, trace};

use crate::config::{EngineConfig, EvictionPolicy};
use crate::error::{DbError, DbResult};
use crate::file_manager::{FileId, FileManager};
use crate::page::{PageNum, PAGE_SIZE};

use super::handle::Handle;

#[derive(Clone, Copy)]
struct FrameMeta {
    file_id: Option<FileId>,
    pagenum: PageNum,
    is_allocated: bool,
    prev: Option<usize>,
    next: Option<usize>,
}

impl FrameMeta {
    fn free() -> Self {
        FrameMeta {
            file_id: None,
            pagenum: 0,
            is_allocated: false,
            prev: None,
            next: None,
        }
    }
}

/// Bookkeeping guarded by a single mutex: usage-list surgery and frame
/// selection. Never holds a frame's content `RwLock` across a yield
/// point to another thread — see `BufferPool::buffering_with_policy`.
struct PoolInner {
    meta: Vec<FrameMeta>,
    index: HashMap<(FileId, PageNum), usize>,
    free_slots: Vec<usize>,
    lru: Option<usize>,
    mru: Option<usize>,
}

impl PoolInner {
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.meta[idx].prev, self.meta[idx].next);
        match prev {
            Some(p) => self.meta[p].next = next,
            None => self.lru = next,
        }
        match next {
            Some(n) => self.meta[n].prev = prev,
            None => self.mru = prev,
        }
        self.meta[idx].prev = None;
        self.meta[idx].next = None;
    }

    /// Append to the MRU (tail) end of the usage list.
    fn push_mru(&mut self, idx: usize) {
        self.meta[idx].prev = self.mru;
        self.meta[idx].next = None;
        if let Some(old_mru) = self.mru {
            self.meta[old_mru].next = Some(idx);
        } else {
            self.lru = Some(idx);
        }
        self.mru = Some(idx);
    }

    fn touch_mru(&mut self, idx: usize) {
        self.unlink(idx);
        self.push_mru(idx);
    }

    /// Frame indices in the order a given eviction policy should
    /// consider them: LRU walks head-to-tail (least recently used
    /// first), MRU walks tail-to-head.
    fn eviction_order(&self, policy: EvictionPolicy) -> Vec<usize> {
        let mut out = Vec::new();
        let mut cur = match policy {
            EvictionPolicy::Lru => self.lru,
            EvictionPolicy::Mru => self.mru,
        };
        while let Some(idx) = cur {
            out.push(idx);
            cur = match policy {
                EvictionPolicy::Lru => self.meta[idx].next,
                EvictionPolicy::Mru => self.meta[idx].prev,
            };
        }
        out
    }
}

/// A fixed-capacity page cache. Every page read/write by the tree layer
/// passes through here.
pub struct BufferPool {
    config: EngineConfig,
    frames: Vec<RwLock<[u8; PAGE_SIZE]>>,
    pin_counts: Vec<AtomicUsize>,
    dirty: Vec<AtomicBool>,
    inner: Mutex<PoolInner>,
    files: Mutex<HashMap<FileId, Arc<FileManager>>>,
}

impl BufferPool {
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let capacity = config.buffer_pool_capacity;
        let mut frames = Vec::with_capacity(capacity);
        let mut pin_counts = Vec::with_capacity(capacity);
        let mut dirty = Vec::with_capacity(capacity);
        let mut meta = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            frames.push(RwLock::new([0u8; PAGE_SIZE]));
            pin_counts.push(AtomicUsize::new(0));
            dirty.push(AtomicBool::new(false));
            meta.push(FrameMeta::free());
        }
        Arc::new(BufferPool {
            config,
            frames,
            pin_counts,
            dirty,
            inner: Mutex::new(PoolInner {
                meta,
                index: HashMap::new(),
                free_slots: (0..capacity).collect(),
                lru: None,
                mru: None,
            }),
            files: Mutex::new(HashMap::new()),
        })
    }

    fn register_file(&self, file: &Arc<FileManager>) {
        self.files
            .lock()
            .unwrap()
            .entry(file.get_id())
            .or_insert_with(|| file.clone());
    }

    /// Return a validated handle for `(file, pagenum)`, loading it from
    /// disk if it is not already cached. Uses the pool's default
    /// eviction policy.
    pub fn buffering(self: &Arc<Self>, file: &Arc<FileManager>, pagenum: PageNum) -> DbResult<Handle> {
        self.buffering_with_policy(file, pagenum, self.config.eviction_policy)
    }

    pub fn buffering_with_policy(
        self: &Arc<Self>,
        file: &Arc<FileManager>,
        pagenum: PageNum,
        policy: EvictionPolicy,
    ) -> DbResult<Handle> {
        self.register_file(file);
        let file_id = file.get_id();

        let mut inner = self.inner.lock().unwrap();
        let idx = if let Some(&idx) = inner.index.get(&(file_id, pagenum)) {
            inner.touch_mru(idx);
            idx
        } else {
            let idx = self.acquire_frame_slot(&mut inner, policy)?;
            {
                let mut data = self.frames[idx].write().unwrap();
                file.page_read(pagenum, &mut data)?;
            }
            inner.meta[idx] = FrameMeta {
                file_id: Some(file_id),
                pagenum,
                is_allocated: true,
                prev: None,
                next: None,
            };
            inner.index.insert((file_id, pagenum), idx);
            inner.push_mru(idx);
            self.dirty[idx].store(false, Ordering::SeqCst);
            trace!("buffering: loaded ({:?}, {}) into frame {}", file_id, pagenum, idx);
            idx
        };
        drop(inner);

        Ok(Handle::new(Arc::clone(self), Arc::clone(file), idx, file_id, pagenum))
    }

    /// Allocate a new page via the file manager and return a handle on
    /// a zeroed, dirty frame (the caller is expected to populate it).
    pub fn new_page(self: &Arc<Self>, file: &Arc<FileManager>) -> DbResult<Handle> {
        self.register_file(file);
        let pagenum = file.page_create()?;
        let file_id = file.get_id();

        let mut inner = self.inner.lock().unwrap();
        let idx = self.acquire_frame_slot(&mut inner, self.config.eviction_policy)?;
        {
            let mut data = self.frames[idx].write().unwrap();
            *data = [0u8; PAGE_SIZE];
        }
        inner.meta[idx] = FrameMeta {
            file_id: Some(file_id),
            pagenum,
            is_allocated: true,
            prev: None,
            next: None,
        };
        inner.index.insert((file_id, pagenum), idx);
        inner.push_mru(idx);
        self.dirty[idx].store(true, Ordering::SeqCst);
        drop(inner);

        debug!("new_page: allocated page {} in frame {}", pagenum, idx);
        Ok(Handle::new(Arc::clone(self), Arc::clone(file), idx, file_id, pagenum))
    }

    /// Return `pagenum` to the file's free list and invalidate any
    /// cached frame for it.
    pub fn free_page(&self, file: &Arc<FileManager>, pagenum: PageNum) -> DbResult<()> {
        let file_id = file.get_id();
        {
            let mut inner = self.inner.lock().unwrap();
            if let Some(idx) = inner.index.remove(&(file_id, pagenum)) {
                inner.unlink(idx);
                inner.meta[idx] = FrameMeta::free();
                inner.free_slots.push(idx);
                self.dirty[idx].store(false, Ordering::SeqCst);
            }
        }
        file.page_free(pagenum)
    }

    /// Flush and invalidate every frame belonging to `file_id`.
    pub fn release_file(&self, file: &Arc<FileManager>) -> DbResult<()> {
        let file_id = file.get_id();
        let mut inner = self.inner.lock().unwrap();
        let victims: Vec<usize> = inner
            .meta
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_allocated && m.file_id == Some(file_id))
            .map(|(idx, _)| idx)
            .collect();

        for idx in victims {
            if self.dirty[idx].load(Ordering::SeqCst) {
                let pagenum = inner.meta[idx].pagenum;
                let data = *self.frames[idx].read().unwrap();
                file.page_write(pagenum, &data)?;
                self.dirty[idx].store(false, Ordering::SeqCst);
            }
            let key = (file_id, inner.meta[idx].pagenum);
            inner.index.remove(&key);
            inner.unlink(idx);
            inner.meta[idx] = FrameMeta::free();
            inner.free_slots.push(idx);
        }
        Ok(())
    }

    /// Flush every dirty frame in the pool, then release all frames.
    pub fn shutdown(&self) -> DbResult<()> {
        let files = self.files.lock().unwrap().clone();
        let mut inner = self.inner.lock().unwrap();
        let all: Vec<usize> = inner
            .meta
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_allocated)
            .map(|(idx, _)| idx)
            .collect();

        for idx in all {
            if self.dirty[idx].load(Ordering::SeqCst) {
                let file_id = inner.meta[idx].file_id.unwrap();
                let pagenum = inner.meta[idx].pagenum;
                if let Some(fm) = files.get(&file_id) {
                    let data = *self.frames[idx].read().unwrap();
                    fm.page_write(pagenum, &data)?;
                }
                self.dirty[idx].store(false, Ordering::SeqCst);
            }
            inner.unlink(idx);
            inner.meta[idx] = FrameMeta::free();
            inner.free_slots.push(idx);
        }
        inner.index.clear();
        Ok(())
    }

    /// Find a frame slot to use: a never-allocated slot if one remains,
    /// else evict per `policy`. Fails only when every frame is pinned.
    fn acquire_frame_slot(&self, inner: &mut PoolInner, policy: EvictionPolicy) -> DbResult<usize> {
        if let Some(idx) = inner.free_slots.pop() {
            return Ok(idx);
        }

        for idx in inner.eviction_order(policy) {
            if self.pin_counts[idx].load(Ordering::SeqCst) != 0 {
                continue;
            }

            if self.dirty[idx].load(Ordering::SeqCst) {
                let file_id = inner.meta[idx].file_id.expect("allocated frame has a file");
                let pagenum = inner.meta[idx].pagenum;
                let fm = self
                    .files
                    .lock()
                    .unwrap()
                    .get(&file_id)
                    .cloned()
                    .ok_or_else(|| DbError::corrupt("evicted frame's file is not registered"))?;
                let data = *self.frames[idx].read().unwrap();
                fm.page_write(pagenum, &data)?;
                self.dirty[idx].store(false, Ordering::SeqCst);
            }

            let key = (inner.meta[idx].file_id.unwrap(), inner.meta[idx].pagenum);
            inner.index.remove(&key);
            inner.unlink(idx);
            return Ok(idx);
        }

        Err(DbError::NoEvictableFrame)
    }

    /// True if `frame_idx` still hosts `(file_id, pagenum)` — the check
    /// behind `Handle::check_and_reload`.
    pub(super) fn frame_matches(&self, frame_idx: usize, file_id: FileId, pagenum: PageNum) -> bool {
        let inner = self.inner.lock().unwrap();
        let meta = &inner.meta[frame_idx];
        meta.is_allocated && meta.file_id == Some(file_id) && meta.pagenum == pagenum
    }

    pub(super) fn pin_and_read<R>(
        &self,
        frame_idx: usize,
        f: impl FnOnce(&[u8; PAGE_SIZE]) -> R,
    ) -> DbResult<R> {
        self.pin_counts[frame_idx].fetch_add(1, Ordering::SeqCst);
        let result = {
            let guard = self.frames[frame_idx].read().unwrap();
            f(&guard)
        };
        self.inner.lock().unwrap().touch_mru(frame_idx);
        self.pin_counts[frame_idx].fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }

    pub(super) fn pin_and_write<R>(
        &self,
        frame_idx: usize,
        f: impl FnOnce(&mut [u8; PAGE_SIZE]) -> R,
    ) -> DbResult<R> {
        self.pin_counts[frame_idx].fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut guard = self.frames[frame_idx].write().unwrap();
            f(&mut guard)
        };
        self.dirty[frame_idx].store(true, Ordering::SeqCst);
        self.inner.lock().unwrap().touch_mru(frame_idx);
        self.pin_counts[frame_idx].fetch_sub(1, Ordering::SeqCst);
        Ok(result)
    }
}
