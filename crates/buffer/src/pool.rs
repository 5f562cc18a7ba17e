use crate::{
    guard::{ReadPageGuard, WritePageGuard},
    ClockReplacer, Frame, LruKReplacer, LruReplacer, Replacer,
};
use ahash::RandomState;
use common::{Config, DbError, DbResult, FrameId, PageId, ReplacerPolicy, HEADER_PAGE_ID};
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use storage::{page_lsn, DiskManager};
use tracing::debug;
use wal::LogManager;

struct PoolInner {
    page_table: HashMap<PageId, FrameId, RandomState>,
    free_list: Vec<FrameId>,
    replacer: Box<dyn Replacer>,
}

/// Caches pages in a fixed array of frames and coordinates pins, eviction,
/// and write-back with the disk and log managers.
///
/// The internal mutex guards the page table, free list, and replacer. It is
/// never held while blocking on a frame latch held by another caller, which
/// is what keeps pin/unpin and latching deadlock-free.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<Arc<Frame>>,
    inner: Mutex<PoolInner>,
    disk: Arc<DiskManager>,
    log: Arc<LogManager>,
}

impl BufferPoolManager {
    pub fn new(config: &Config, disk: Arc<DiskManager>, log: Arc<LogManager>) -> Self {
        let pool_size = config.buffer_pool_pages;
        assert!(pool_size > 0, "buffer pool needs at least one frame");
        let replacer: Box<dyn Replacer> = match config.replacer_policy {
            ReplacerPolicy::Lru => Box::new(LruReplacer::new()),
            ReplacerPolicy::LruK => Box::new(LruKReplacer::new(config.lru_k)),
            ReplacerPolicy::Clock => Box::new(ClockReplacer::new()),
        };
        Self {
            pool_size,
            frames: (0..pool_size).map(|_| Arc::new(Frame::new())).collect(),
            inner: Mutex::new(PoolInner {
                page_table: HashMap::default(),
                free_list: (0..pool_size).rev().collect(),
                replacer,
            }),
            disk,
            log,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk(&self) -> &Arc<DiskManager> {
        &self.disk
    }

    pub fn log(&self) -> &Arc<LogManager> {
        &self.log
    }

    /// Pin the page, reading it from disk if it is not resident. Fails with
    /// `OutOfMemory` when every frame is pinned.
    pub fn fetch_page(&self, page_id: PageId) -> DbResult<Arc<Frame>> {
        if !page_id.is_valid() {
            return Err(DbError::NotFound(format!("page {}", page_id.0)));
        }
        let mut inner = self.inner.lock();
        if let Some(&fid) = inner.page_table.get(&page_id) {
            let frame = &self.frames[fid];
            frame.pin();
            inner.replacer.pin(fid);
            return Ok(Arc::clone(frame));
        }

        let fid = self.take_frame(&mut inner)?;
        let frame = &self.frames[fid];
        {
            let mut data = frame.data().write();
            if let Err(err) = self.disk.read_page(page_id, &mut data) {
                drop(data);
                inner.free_list.push(fid);
                return Err(err);
            }
        }
        frame.set_page_id(page_id);
        frame.set_dirty(false);
        frame.set_pin_count(1);
        inner.page_table.insert(page_id, fid);
        inner.replacer.pin(fid);
        Ok(Arc::clone(frame))
    }

    /// Allocate a fresh page id and pin a zeroed frame for it.
    pub fn new_page(&self) -> DbResult<(PageId, Arc<Frame>)> {
        let mut inner = self.inner.lock();
        let fid = self.take_frame(&mut inner)?;
        let page_id = self.disk.allocate_page();
        let frame = &self.frames[fid];
        frame.data().write().fill(0);
        frame.set_page_id(page_id);
        frame.set_dirty(true);
        frame.set_pin_count(1);
        inner.page_table.insert(page_id, fid);
        inner.replacer.pin(fid);
        Ok((page_id, Arc::clone(frame)))
    }

    /// Drop one pin. ORs `is_dirty` into the frame; when the pin count hits
    /// zero the frame becomes an eviction candidate.
    ///
    /// # Panics
    /// Panics if the page's pin count is already zero; that is a caller
    /// contract violation, not a runtime condition.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> DbResult<()> {
        let mut inner = self.inner.lock();
        let &fid = inner
            .page_table
            .get(&page_id)
            .ok_or_else(|| DbError::NotFound(format!("page {} not resident", page_id.0)))?;
        let frame = &self.frames[fid];
        assert!(
            frame.pin_count() > 0,
            "unpin of page {} at pin count 0",
            page_id.0
        );
        if is_dirty {
            frame.set_dirty(true);
        }
        if frame.unpin() == 0 {
            inner.replacer.unpin(fid);
        }
        Ok(())
    }

    /// Write the page to disk if resident (it stays resident). Honors the
    /// write-ahead rule before touching the disk.
    pub fn flush_page(&self, page_id: PageId) -> DbResult<()> {
        let frame = {
            let inner = self.inner.lock();
            let &fid = inner
                .page_table
                .get(&page_id)
                .ok_or_else(|| DbError::NotFound(format!("page {} not resident", page_id.0)))?;
            Arc::clone(&self.frames[fid])
        };
        // Latch outside the pool mutex; a concurrent writer may hold the
        // page latch and must be able to unpin meanwhile.
        let data = frame.read_latch();
        if frame.page_id() != page_id {
            // Evicted and reused between lookup and latch; the eviction
            // already wrote the bytes out.
            return Ok(());
        }
        self.write_back(page_id, &data)?;
        frame.set_dirty(false);
        Ok(())
    }

    /// Flush every resident page.
    pub fn flush_all(&self) -> DbResult<()> {
        let resident: Vec<PageId> = {
            let inner = self.inner.lock();
            inner.page_table.keys().copied().collect()
        };
        for page_id in resident {
            match self.flush_page(page_id) {
                Ok(()) => {}
                // Racing eviction between collection and flush is fine.
                Err(DbError::NotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Drop a page from the pool and return its id to the disk free list.
    /// Fails with `InvalidState` while the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if let Some(&fid) = inner.page_table.get(&page_id) {
            let frame = &self.frames[fid];
            if frame.pin_count() > 0 {
                return Err(DbError::InvalidState(format!(
                    "delete of pinned page {} (pin count {})",
                    page_id.0,
                    frame.pin_count()
                )));
            }
            inner.page_table.remove(&page_id);
            inner.replacer.pin(fid);
            frame.reset();
            inner.free_list.push(fid);
        }
        self.disk.deallocate_page(page_id);
        Ok(())
    }

    /// Resident-page count; used by tests.
    pub fn resident_pages(&self) -> usize {
        self.inner.lock().page_table.len()
    }

    /// Pin count of a resident page; used by tests.
    pub fn pin_count_of(&self, page_id: PageId) -> Option<u32> {
        let inner = self.inner.lock();
        inner
            .page_table
            .get(&page_id)
            .map(|&fid| self.frames[fid].pin_count())
    }

    fn take_frame(&self, inner: &mut PoolInner) -> DbResult<FrameId> {
        if let Some(fid) = inner.free_list.pop() {
            return Ok(fid);
        }
        let fid = inner
            .replacer
            .victim()
            .ok_or_else(|| DbError::OutOfMemory("every frame is pinned".into()))?;
        let frame = &self.frames[fid];
        let old_page = frame.page_id();
        debug_assert_eq!(frame.pin_count(), 0, "victim frame still pinned");
        if frame.is_dirty() {
            // Nobody holds this latch: pin count is zero and latches are
            // only held under a pin.
            let data = frame.data().read();
            self.write_back(old_page, &data)?;
            drop(data);
            frame.set_dirty(false);
            debug!(page = old_page.0, frame = fid, "evicted dirty page");
        }
        inner.page_table.remove(&old_page);
        frame.set_page_id(PageId::INVALID);
        Ok(fid)
    }

    /// WAL rule: the log must cover the page's LSN before its image may hit
    /// disk. The header page carries no LSN field and is exempt.
    fn write_back(&self, page_id: PageId, data: &common::PageBuf) -> DbResult<()> {
        if page_id != HEADER_PAGE_ID {
            self.log.force_up_to(page_lsn(data))?;
        }
        self.disk.write_page(page_id, data)
    }
}

impl std::fmt::Debug for BufferPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPoolManager")
            .field("pool_size", &self.pool_size)
            .field("resident", &self.resident_pages())
            .finish()
    }
}

// Guard-producing constructors live here so the guards can hold the pool.
impl BufferPoolManager {
    /// Fetch and read-latch a page; the guard unpins on drop.
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> DbResult<ReadPageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(ReadPageGuard::new(Arc::clone(self), page_id, frame))
    }

    /// Fetch and write-latch a page; the guard unpins on drop, dirty if
    /// written through.
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> DbResult<WritePageGuard> {
        let frame = self.fetch_page(page_id)?;
        Ok(WritePageGuard::new(Arc::clone(self), page_id, frame))
    }

    /// Allocate a new page and hand it back write-latched.
    pub fn new_page_write(self: &Arc<Self>) -> DbResult<(PageId, WritePageGuard)> {
        let (page_id, frame) = self.new_page()?;
        let mut guard = WritePageGuard::new(Arc::clone(self), page_id, frame);
        guard.mark_dirty();
        Ok((page_id, guard))
    }
}
