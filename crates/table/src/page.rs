use common::{DbError, DbResult, Lsn, PageBuf, PageId, RecordId, PAGE_SIZE};
use storage::set_page_lsn;
use wal::{LogManager, LogRecord, TxnContext};

/// Slotted page layout:
///
/// ```text
///  ---------------------------------------------------------
///  | HEADER | SLOTS ... | ... FREE SPACE | INSERTED TUPLES |
///  ---------------------------------------------------------
///                       ^ free-space pointer grows downward
/// ```
///
/// Header (4 bytes each): page id, LSN, prev page id, next page id,
/// free-space pointer, tuple count. Each slot is (offset, size); a size of
/// zero means never used or reclaimed, and the top bit of the size is the
/// tombstone flag.
pub const TABLE_PAGE_HEADER_SIZE: usize = 24;
pub const SLOT_SIZE: usize = 8;

const OFFSET_PREV_PAGE_ID: usize = 8;
const OFFSET_NEXT_PAGE_ID: usize = 12;
const OFFSET_FREE_SPACE: usize = 16;
const OFFSET_TUPLE_COUNT: usize = 20;
const DELETE_MASK: u32 = 1 << 31;

fn read_u32(data: &PageBuf, at: usize) -> u32 {
    u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
}

fn write_u32(data: &mut PageBuf, at: usize, value: u32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_i32(data: &PageBuf, at: usize) -> i32 {
    i32::from_le_bytes(data[at..at + 4].try_into().unwrap())
}

fn write_i32(data: &mut PageBuf, at: usize, value: i32) {
    data[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn is_deleted(raw_size: u32) -> bool {
    raw_size & DELETE_MASK != 0 || raw_size == 0
}

fn unmask(raw_size: u32) -> u32 {
    raw_size & !DELETE_MASK
}

/// Read-only view over a latched slotted page.
pub struct TablePageRef<'a> {
    data: &'a PageBuf,
}

impl<'a> TablePageRef<'a> {
    pub fn new(data: &'a PageBuf) -> Self {
        Self { data }
    }

    pub fn page_id(&self) -> PageId {
        PageId(read_i32(self.data, 0))
    }

    pub fn lsn(&self) -> Lsn {
        Lsn(read_i32(self.data, 4))
    }

    pub fn prev_page_id(&self) -> PageId {
        PageId(read_i32(self.data, OFFSET_PREV_PAGE_ID))
    }

    pub fn next_page_id(&self) -> PageId {
        PageId(read_i32(self.data, OFFSET_NEXT_PAGE_ID))
    }

    pub fn free_space_pointer(&self) -> u32 {
        read_u32(self.data, OFFSET_FREE_SPACE)
    }

    pub fn tuple_count(&self) -> u32 {
        read_u32(self.data, OFFSET_TUPLE_COUNT)
    }

    /// Bytes left between the slot directory and the tuple area.
    pub fn free_space_remaining(&self) -> u32 {
        self.free_space_pointer()
            - (TABLE_PAGE_HEADER_SIZE as u32 + SLOT_SIZE as u32 * self.tuple_count())
    }

    fn slot_offset_at(&self, slot: u32) -> u32 {
        read_u32(
            self.data,
            TABLE_PAGE_HEADER_SIZE + SLOT_SIZE * slot as usize,
        )
    }

    fn slot_size_at(&self, slot: u32) -> u32 {
        read_u32(
            self.data,
            TABLE_PAGE_HEADER_SIZE + SLOT_SIZE * slot as usize + 4,
        )
    }

    /// Copy out a live tuple. Tombstoned and unknown slots return `None`.
    pub fn tuple_at(&self, slot: u32) -> Option<Vec<u8>> {
        if slot >= self.tuple_count() {
            return None;
        }
        let raw = self.slot_size_at(slot);
        if is_deleted(raw) {
            return None;
        }
        let offset = self.slot_offset_at(slot) as usize;
        let size = unmask(raw) as usize;
        Some(self.data[offset..offset + size].to_vec())
    }

    /// First live slot in ascending slot order.
    pub fn first_rid(&self) -> Option<RecordId> {
        (0..self.tuple_count())
            .find(|slot| !is_deleted(self.slot_size_at(*slot)))
            .map(|slot| RecordId::new(self.page_id(), slot))
    }

    /// Next live slot after `rid` on this page.
    pub fn next_rid(&self, rid: RecordId) -> Option<RecordId> {
        (rid.slot + 1..self.tuple_count())
            .find(|slot| !is_deleted(self.slot_size_at(*slot)))
            .map(|slot| RecordId::new(self.page_id(), slot))
    }
}

/// Mutable view over a latched slotted page. Every mutation writes its log
/// record and stamps the page LSN before returning.
pub struct TablePageMut<'a> {
    data: &'a mut PageBuf,
}

impl<'a> TablePageMut<'a> {
    pub fn new(data: &'a mut PageBuf) -> Self {
        Self { data }
    }

    pub fn as_ref(&self) -> TablePageRef<'_> {
        TablePageRef { data: self.data }
    }

    /// Set up a fresh page and link it after `prev_page_id`.
    pub fn init(&mut self, page_id: PageId, prev_page_id: PageId) {
        write_i32(self.data, 0, page_id.0);
        write_i32(self.data, 4, Lsn::INVALID.0);
        write_i32(self.data, OFFSET_PREV_PAGE_ID, prev_page_id.0);
        write_i32(self.data, OFFSET_NEXT_PAGE_ID, PageId::INVALID.0);
        write_u32(self.data, OFFSET_FREE_SPACE, PAGE_SIZE as u32);
        write_u32(self.data, OFFSET_TUPLE_COUNT, 0);
    }

    pub fn set_prev_page_id(&mut self, prev: PageId) {
        write_i32(self.data, OFFSET_PREV_PAGE_ID, prev.0);
    }

    pub fn set_next_page_id(&mut self, next: PageId) {
        write_i32(self.data, OFFSET_NEXT_PAGE_ID, next.0);
    }

    fn set_free_space_pointer(&mut self, ptr: u32) {
        write_u32(self.data, OFFSET_FREE_SPACE, ptr);
    }

    fn set_tuple_count(&mut self, count: u32) {
        write_u32(self.data, OFFSET_TUPLE_COUNT, count);
    }

    fn set_slot(&mut self, slot: u32, offset: u32, size: u32) {
        let at = TABLE_PAGE_HEADER_SIZE + SLOT_SIZE * slot as usize;
        write_u32(self.data, at, offset);
        write_u32(self.data, at + 4, size);
    }

    fn stamp(&mut self, lsn: Lsn) {
        if lsn.is_valid() {
            set_page_lsn(self.data, lsn);
        }
    }

    /// Place `tuple` in the first reclaimed slot or a fresh one. `None`
    /// means the page has no room for the tuple plus a slot entry.
    pub fn insert(
        &mut self,
        tuple: &[u8],
        txn: &mut TxnContext,
        log: &LogManager,
    ) -> Option<RecordId> {
        assert!(!tuple.is_empty(), "cannot insert an empty tuple");
        let view = self.as_ref();
        let needed = tuple.len() as u32 + SLOT_SIZE as u32;
        if view.free_space_remaining() < needed {
            return None;
        }
        let count = view.tuple_count();
        let slot = (0..count)
            .find(|s| view.slot_size_at(*s) == 0)
            .unwrap_or(count);

        let free_ptr = view.free_space_pointer() - tuple.len() as u32;
        let page_id = view.page_id();
        self.data[free_ptr as usize..free_ptr as usize + tuple.len()].copy_from_slice(tuple);
        self.set_free_space_pointer(free_ptr);
        self.set_slot(slot, free_ptr, tuple.len() as u32);
        if slot == count {
            self.set_tuple_count(count + 1);
        }

        let rid = RecordId::new(page_id, slot);
        let lsn = log.append_chained(txn, LogRecord::insert(rid, tuple.to_vec()));
        self.stamp(lsn);
        Some(rid)
    }

    /// Tombstone a slot. Fails if the slot is missing or already tombstoned.
    pub fn mark_delete(&mut self, rid: RecordId, txn: &mut TxnContext, log: &LogManager) -> bool {
        let view = self.as_ref();
        if rid.slot >= view.tuple_count() {
            return false;
        }
        let raw = view.slot_size_at(rid.slot);
        if is_deleted(raw) {
            return false;
        }
        let offset = view.slot_offset_at(rid.slot);
        let image =
            self.data[offset as usize..offset as usize + raw as usize].to_vec();
        self.set_slot(rid.slot, offset, raw | DELETE_MASK);

        let lsn = log.append_chained(txn, LogRecord::mark_delete(rid, image));
        self.stamp(lsn);
        true
    }

    /// Clear a tombstone set by `mark_delete`.
    pub fn rollback_delete(
        &mut self,
        rid: RecordId,
        txn: &mut TxnContext,
        log: &LogManager,
    ) -> bool {
        let view = self.as_ref();
        if rid.slot >= view.tuple_count() {
            return false;
        }
        let raw = view.slot_size_at(rid.slot);
        if raw & DELETE_MASK == 0 {
            return false;
        }
        let offset = view.slot_offset_at(rid.slot);
        let size = unmask(raw);
        self.set_slot(rid.slot, offset, size);

        let image = self.data[offset as usize..(offset + size) as usize].to_vec();
        let lsn = log.append_chained(txn, LogRecord::rollback_delete(rid, image));
        self.stamp(lsn);
        true
    }

    /// Physically reclaim a slot: shift earlier payloads up, zero the slot,
    /// and fix the offsets of still-live slots below the removed tuple.
    /// Called at commit for deletes and at abort to undo an insert.
    pub fn apply_delete(
        &mut self,
        rid: RecordId,
        txn: &mut TxnContext,
        log: &LogManager,
    ) -> DbResult<()> {
        let view = self.as_ref();
        if rid.slot >= view.tuple_count() {
            return Err(DbError::NotFound(format!(
                "slot {} on page {}",
                rid.slot,
                rid.page_id.0
            )));
        }
        let raw = view.slot_size_at(rid.slot);
        if raw == 0 {
            return Err(DbError::NotFound(format!(
                "slot {} on page {} already reclaimed",
                rid.slot,
                rid.page_id.0
            )));
        }
        // Committing a delete unsets the tombstone; undoing an insert works
        // on a live slot.
        let size = unmask(raw);
        let tuple_offset = view.slot_offset_at(rid.slot);
        let free_ptr = view.free_space_pointer();
        debug_assert!(tuple_offset >= free_ptr, "free space overlaps tuples");

        let image =
            self.data[tuple_offset as usize..(tuple_offset + size) as usize].to_vec();

        self.data.copy_within(
            free_ptr as usize..tuple_offset as usize,
            (free_ptr + size) as usize,
        );
        self.set_free_space_pointer(free_ptr + size);
        self.set_slot(rid.slot, 0, 0);

        let count = self.as_ref().tuple_count();
        for slot in 0..count {
            let view = self.as_ref();
            let slot_raw = view.slot_size_at(slot);
            let slot_offset = view.slot_offset_at(slot);
            if slot_raw != 0 && slot_offset < tuple_offset {
                self.set_slot(slot, slot_offset + size, slot_raw);
            }
        }

        let lsn = log.append_chained(txn, LogRecord::apply_delete(rid, image));
        self.stamp(lsn);
        Ok(())
    }

    /// In-place overwrite when the sizes match. Returns the old image, or
    /// `None` when the lengths differ and the caller must delete-and-insert.
    pub fn update(
        &mut self,
        new_tuple: &[u8],
        rid: RecordId,
        txn: &mut TxnContext,
        log: &LogManager,
    ) -> DbResult<Option<Vec<u8>>> {
        let view = self.as_ref();
        if rid.slot >= view.tuple_count() {
            return Err(DbError::NotFound(format!(
                "slot {} on page {}",
                rid.slot,
                rid.page_id.0
            )));
        }
        let raw = view.slot_size_at(rid.slot);
        if is_deleted(raw) {
            return Err(DbError::NotFound(format!(
                "slot {} on page {} is tombstoned",
                rid.slot,
                rid.page_id.0
            )));
        }
        if raw as usize != new_tuple.len() {
            return Ok(None);
        }
        let offset = view.slot_offset_at(rid.slot) as usize;
        let old = self.data[offset..offset + new_tuple.len()].to_vec();
        self.data[offset..offset + new_tuple.len()].copy_from_slice(new_tuple);

        let lsn = log.append_chained(
            txn,
            LogRecord::update(rid, old.clone(), new_tuple.to_vec()),
        );
        self.stamp(lsn);
        Ok(Some(old))
    }
}
