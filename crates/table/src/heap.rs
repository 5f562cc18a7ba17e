use crate::{
    iter::TableIterator,
    page::{TablePageMut, TablePageRef, SLOT_SIZE, TABLE_PAGE_HEADER_SIZE},
};
use buffer::BufferPoolManager;
use common::{DbError, DbResult, PageId, RecordId, PAGE_SIZE};
use std::sync::Arc;
use tracing::debug;
use types::Tuple;
use wal::{LogManager, LogRecord, TxnContext};

/// A table's storage: a doubly-linked list of slotted pages starting at
/// `first_page_id`.
#[derive(Debug)]
pub struct TableHeap {
    first_page_id: PageId,
    bpm: Arc<BufferPoolManager>,
    log: Arc<LogManager>,
}

impl TableHeap {
    /// Allocate the first page of a new table.
    pub fn create(
        bpm: Arc<BufferPoolManager>,
        log: Arc<LogManager>,
        txn: &mut TxnContext,
    ) -> DbResult<Self> {
        let (first_page_id, mut guard) = bpm.new_page_write()?;
        TablePageMut::new(&mut guard).init(first_page_id, PageId::INVALID);
        log.append_chained(txn, LogRecord::new_page(PageId::INVALID, first_page_id));
        drop(guard);
        debug!(first_page = first_page_id.0, "table heap created");
        Ok(Self {
            first_page_id,
            bpm,
            log,
        })
    }

    /// Reattach to an existing chain of pages.
    pub fn open(
        bpm: Arc<BufferPoolManager>,
        log: Arc<LogManager>,
        first_page_id: PageId,
    ) -> Self {
        Self {
            first_page_id,
            bpm,
            log,
        }
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub(crate) fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// Walk the chain from the first page, inserting into the first page
    /// with room; extend the chain at the tail when none has.
    pub fn insert(&self, tuple: &[u8], txn: &mut TxnContext) -> DbResult<RecordId> {
        if tuple.len() + TABLE_PAGE_HEADER_SIZE + SLOT_SIZE > PAGE_SIZE {
            return Err(DbError::OutOfSpace(format!(
                "tuple of {} bytes exceeds a page",
                tuple.len()
            )));
        }

        let mut current = self.bpm.fetch_page_write(self.first_page_id)?;
        loop {
            if let Some(rid) = TablePageMut::new(&mut current).insert(tuple, txn, &self.log) {
                return Ok(rid);
            }
            let current_id = current.page_id();
            let next = TablePageRef::new(&current).next_page_id();
            if next.is_valid() {
                // Latch-couple down the chain: take the next page before
                // releasing the current one.
                let next_guard = self.bpm.fetch_page_write(next)?;
                current = next_guard;
            } else {
                let (new_page_id, mut new_guard) = self.bpm.new_page_write()?;
                TablePageMut::new(&mut current).set_next_page_id(new_page_id);
                TablePageMut::new(&mut new_guard).init(new_page_id, current_id);
                self.log
                    .append_chained(txn, LogRecord::new_page(current_id, new_page_id));
                current = new_guard;
            }
        }
    }

    /// Tombstone the tuple at `rid`.
    pub fn mark_delete(&self, rid: RecordId, txn: &mut TxnContext) -> DbResult<()> {
        let mut page = self.bpm.fetch_page_write(rid.page_id)?;
        if TablePageMut::new(&mut page).mark_delete(rid, txn, &self.log) {
            Ok(())
        } else {
            Err(DbError::NotFound(format!(
                "tuple {:?} missing or already tombstoned",
                rid
            )))
        }
    }

    /// Physically remove the tuple at `rid` (commit of a delete, or undo of
    /// an insert).
    pub fn apply_delete(&self, rid: RecordId, txn: &mut TxnContext) -> DbResult<()> {
        let mut page = self.bpm.fetch_page_write(rid.page_id)?;
        TablePageMut::new(&mut page).apply_delete(rid, txn, &self.log)
    }

    /// Clear a tombstone set by `mark_delete`.
    pub fn rollback_delete(&self, rid: RecordId, txn: &mut TxnContext) -> DbResult<()> {
        let mut page = self.bpm.fetch_page_write(rid.page_id)?;
        if TablePageMut::new(&mut page).rollback_delete(rid, txn, &self.log) {
            Ok(())
        } else {
            Err(DbError::InvalidState(format!(
                "tuple {:?} carries no tombstone",
                rid
            )))
        }
    }

    /// In-place update when sizes match; `Ok(false)` tells the caller to
    /// delete-and-reinsert instead.
    pub fn update(&self, rid: RecordId, new_tuple: &[u8], txn: &mut TxnContext) -> DbResult<bool> {
        let mut page = self.bpm.fetch_page_write(rid.page_id)?;
        Ok(TablePageMut::new(&mut page)
            .update(new_tuple, rid, txn, &self.log)?
            .is_some())
    }

    /// Copy out the live tuple at `rid`.
    pub fn get_tuple(&self, rid: RecordId) -> DbResult<Tuple> {
        let page = self.bpm.fetch_page_read(rid.page_id)?;
        TablePageRef::new(&page)
            .tuple_at(rid.slot)
            .map(|data| Tuple::from_bytes(data, rid))
            .ok_or_else(|| DbError::NotFound(format!("tuple {:?}", rid)))
    }

    /// Sequential scan over every live tuple, page order then slot order.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator::new(Arc::clone(self))
    }
}
