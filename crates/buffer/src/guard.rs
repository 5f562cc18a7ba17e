use crate::{BufferPoolManager, Frame, PageReadGuard, PageWriteGuard};
use common::{PageBuf, PageId};
use std::{
    ops::{Deref, DerefMut},
    sync::Arc,
};

/// Read latch plus pin, released together on drop.
pub struct ReadPageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    latch: Option<PageReadGuard>,
}

impl ReadPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, frame: Arc<Frame>) -> Self {
        let latch = frame.read_latch();
        Self {
            bpm,
            page_id,
            latch: Some(latch),
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }
}

impl Deref for ReadPageGuard {
    type Target = PageBuf;

    fn deref(&self) -> &PageBuf {
        self.latch.as_ref().expect("latch held")
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        // Latch before pin, mirroring acquisition order in reverse.
        self.latch.take();
        let _ = self.bpm.unpin_page(self.page_id, false);
    }
}

/// Write latch plus pin. The page is unpinned dirty iff it was written
/// through the guard (or `mark_dirty` was called).
pub struct WritePageGuard {
    bpm: Arc<BufferPoolManager>,
    page_id: PageId,
    latch: Option<PageWriteGuard>,
    dirty: bool,
}

impl WritePageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page_id: PageId, frame: Arc<Frame>) -> Self {
        let latch = frame.write_latch();
        Self {
            bpm,
            page_id,
            latch: Some(latch),
            dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }
}

impl Deref for WritePageGuard {
    type Target = PageBuf;

    fn deref(&self) -> &PageBuf {
        self.latch.as_ref().expect("latch held")
    }
}

impl DerefMut for WritePageGuard {
    fn deref_mut(&mut self) -> &mut PageBuf {
        self.dirty = true;
        self.latch.as_mut().expect("latch held")
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        self.latch.take();
        let _ = self.bpm.unpin_page(self.page_id, self.dirty);
    }
}
