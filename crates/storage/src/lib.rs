//! Synchronous page and log file I/O.
//!
//! The disk manager owns two files: a heap file addressed in `PAGE_SIZE`
//! blocks (`page id * PAGE_SIZE` is the byte offset) and an append-only log
//! file. Page ids come from a monotonic counter, with a free list fed by
//! `deallocate_page`. All failures surface as `DbError::Io` and abort the
//! calling operation.


use common::{DbError, DbResult, PageBuf, PageId, PAGE_SIZE};
use parking_lot::Mutex;
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::Path,
    sync::atomic::{AtomicI32, Ordering},
};
use tracing::debug;

#[derive(Debug)]
pub struct DiskManager {
    heap_file: Mutex<File>,
    log_file: Mutex<File>,
    next_page_id: AtomicI32,
    free_list: Mutex<Vec<PageId>>,
}

impl DiskManager {
    /// Open (or create) the heap and log files.
    pub fn open(heap_path: &Path, log_path: &Path) -> DbResult<Self> {
        if let Some(dir) = heap_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let heap_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(heap_path)?;
        let log_file = OpenOptions::new()
            .read(true)
            .create(true)
            .append(true)
            .open(log_path)?;

        let len = heap_file.metadata()?.len();
        let next_page_id = (len / PAGE_SIZE as u64) as i32;
        debug!(
            heap = %heap_path.display(),
            pages = next_page_id,
            "disk manager opened"
        );
        Ok(Self {
            heap_file: Mutex::new(heap_file),
            log_file: Mutex::new(log_file),
            next_page_id: AtomicI32::new(next_page_id),
            free_list: Mutex::new(Vec::new()),
        })
    }

    /// Number of page ids handed out so far (free-listed ones included).
    pub fn num_pages(&self) -> usize {
        self.next_page_id.load(Ordering::SeqCst) as usize
    }

    /// Hand out the next free page id.
    pub fn allocate_page(&self) -> PageId {
        if let Some(pid) = self.free_list.lock().pop() {
            return pid;
        }
        PageId(self.next_page_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Return a page id to the free list for reuse.
    pub fn deallocate_page(&self, page_id: PageId) {
        self.free_list.lock().push(page_id);
    }

    /// Read one page into `buf`. An allocated page that was never written
    /// reads back as zeroes.
    pub fn read_page(&self, page_id: PageId, buf: &mut PageBuf) -> DbResult<()> {
        if !page_id.is_valid() || page_id.0 >= self.next_page_id.load(Ordering::SeqCst) {
            return Err(DbError::NotFound(format!("page {}", page_id.0)));
        }
        let mut file = self.heap_file.lock();
        let len = file.metadata()?.len();
        let offset = page_id.file_offset();
        if offset >= len {
            buf.fill(0);
            return Ok(());
        }
        file.seek(SeekFrom::Start(offset))?;
        let available = ((len - offset) as usize).min(PAGE_SIZE);
        file.read_exact(&mut buf[..available])?;
        buf[available..].fill(0);
        Ok(())
    }

    /// Overwrite one page, extending the file as necessary.
    pub fn write_page(&self, page_id: PageId, buf: &PageBuf) -> DbResult<()> {
        if !page_id.is_valid() {
            return Err(DbError::NotFound(format!("page {}", page_id.0)));
        }
        let mut file = self.heap_file.lock();
        file.seek(SeekFrom::Start(page_id.file_offset()))?;
        file.write_all(buf)?;
        file.flush()?;
        Ok(())
    }

    /// Append raw record bytes to the log file.
    pub fn write_log(&self, bytes: &[u8]) -> DbResult<()> {
        let mut file = self.log_file.lock();
        file.write_all(bytes)?;
        Ok(())
    }

    /// Fsync the log file.
    pub fn flush_log(&self) -> DbResult<()> {
        self.log_file.lock().sync_data()?;
        Ok(())
    }

    /// Bytes currently in the log file.
    pub fn log_len(&self) -> DbResult<u64> {
        Ok(self.log_file.lock().metadata()?.len())
    }

    /// Read the whole log file; used by tests and by the (out of scope)
    /// recovery replayer.
    pub fn read_log(&self) -> DbResult<Vec<u8>> {
        let mut file = self.log_file.lock();
        let mut out = Vec::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut out)?;
        Ok(out)
    }
}

/// Read a page's LSN field without interpreting the rest of the page. Both
/// slotted table pages and tree pages keep it at bytes 4..8.
pub fn page_lsn(buf: &PageBuf) -> common::Lsn {
    common::Lsn(i32::from_le_bytes(buf[4..8].try_into().unwrap()))
}

/// Stamp a page's LSN field.
pub fn set_page_lsn(buf: &mut PageBuf, lsn: common::Lsn) {
    buf[4..8].copy_from_slice(&lsn.0.to_le_bytes());
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        if let Err(err) = self.flush_log() {
            tracing::warn!(%err, "log flush on shutdown failed");
        }
    }
}
