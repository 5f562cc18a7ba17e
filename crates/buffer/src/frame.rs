use common::{PageBuf, PageId, PAGE_SIZE};
use parking_lot::{lock_api, RawRwLock, RwLock};
use std::sync::{
    atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering},
    Arc,
};

/// Owned read latch on a frame's page bytes.
pub type PageReadGuard = lock_api::ArcRwLockReadGuard<RawRwLock, PageBuf>;
/// Owned write latch on a frame's page bytes.
pub type PageWriteGuard = lock_api::ArcRwLockWriteGuard<RawRwLock, PageBuf>;

/// One buffer-pool slot. Holds at most one page at a time.
///
/// Metadata (page id, dirty flag, pin count) is coordinated by the pool's
/// mutex; the page bytes are protected by the frame's reader-writer latch,
/// which callers take explicitly while they hold a pin.
#[derive(Debug)]
pub struct Frame {
    page_id: AtomicI32,
    pin_count: AtomicU32,
    dirty: AtomicBool,
    data: Arc<RwLock<PageBuf>>,
}

impl Frame {
    pub(crate) fn new() -> Self {
        Self {
            page_id: AtomicI32::new(PageId::INVALID.0),
            pin_count: AtomicU32::new(0),
            dirty: AtomicBool::new(false),
            data: Arc::new(RwLock::new([0u8; PAGE_SIZE])),
        }
    }

    pub fn page_id(&self) -> PageId {
        PageId(self.page_id.load(Ordering::SeqCst))
    }

    pub fn pin_count(&self) -> u32 {
        self.pin_count.load(Ordering::SeqCst)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Shared latch on the page bytes. Hold a pin first.
    pub fn read_latch(&self) -> PageReadGuard {
        self.data.read_arc()
    }

    /// Exclusive latch on the page bytes. Hold a pin first.
    pub fn write_latch(&self) -> PageWriteGuard {
        self.data.write_arc()
    }

    pub(crate) fn data(&self) -> &Arc<RwLock<PageBuf>> {
        &self.data
    }

    pub(crate) fn set_page_id(&self, page_id: PageId) {
        self.page_id.store(page_id.0, Ordering::SeqCst);
    }

    pub(crate) fn set_dirty(&self, dirty: bool) {
        self.dirty.store(dirty, Ordering::SeqCst);
    }

    pub(crate) fn pin(&self) -> u32 {
        self.pin_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Returns the pin count after the decrement.
    pub(crate) fn unpin(&self) -> u32 {
        self.pin_count.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub(crate) fn set_pin_count(&self, count: u32) {
        self.pin_count.store(count, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self) {
        self.set_page_id(PageId::INVALID);
        self.set_dirty(false);
        self.set_pin_count(0);
    }
}
