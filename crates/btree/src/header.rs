//! The page-0 registry mapping index names to root page ids.
//!
//! Layout: `record_count` (4 bytes) followed by fixed 36-byte entries of
//! `(name[32], root_page_id[4])`. Names are NUL-padded and capped at 31
//! bytes.

use common::{DbError, DbResult, PageBuf, PageId, PAGE_SIZE};

const ENTRY_SIZE: usize = 36;
const NAME_SIZE: usize = 32;
const MAX_RECORDS: usize = (PAGE_SIZE - 4) / ENTRY_SIZE;

pub struct HeaderPageRef<'a> {
    data: &'a PageBuf,
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a PageBuf) -> Self {
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        u32::from_le_bytes(self.data[0..4].try_into().unwrap()) as usize
    }

    fn name_at(&self, idx: usize) -> &[u8] {
        let at = 4 + idx * ENTRY_SIZE;
        let raw = &self.data[at..at + NAME_SIZE];
        let end = raw.iter().position(|b| *b == 0).unwrap_or(NAME_SIZE);
        &raw[..end]
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|idx| self.name_at(*idx) == name.as_bytes())
    }

    pub fn root_id(&self, name: &str) -> Option<PageId> {
        self.find(name).map(|idx| {
            let at = 4 + idx * ENTRY_SIZE + NAME_SIZE;
            PageId(i32::from_le_bytes(self.data[at..at + 4].try_into().unwrap()))
        })
    }
}

pub struct HeaderPageMut<'a> {
    data: &'a mut PageBuf,
}

impl<'a> HeaderPageMut<'a> {
    pub fn new(data: &'a mut PageBuf) -> Self {
        Self { data }
    }

    pub fn as_ref(&self) -> HeaderPageRef<'_> {
        HeaderPageRef { data: self.data }
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[0..4].copy_from_slice(&(count as u32).to_le_bytes());
    }

    fn write_record(&mut self, idx: usize, name: &str, root_id: PageId) {
        let at = 4 + idx * ENTRY_SIZE;
        self.data[at..at + NAME_SIZE].fill(0);
        self.data[at..at + name.len()].copy_from_slice(name.as_bytes());
        self.data[at + NAME_SIZE..at + ENTRY_SIZE].copy_from_slice(&root_id.0.to_le_bytes());
    }

    pub fn insert_record(&mut self, name: &str, root_id: PageId) -> DbResult<()> {
        if name.len() >= NAME_SIZE {
            return Err(DbError::NotSupported(format!(
                "index name '{name}' longer than {} bytes",
                NAME_SIZE - 1
            )));
        }
        let count = self.as_ref().record_count();
        if count >= MAX_RECORDS {
            return Err(DbError::OutOfSpace("header page is full".into()));
        }
        if self.as_ref().find(name).is_some() {
            return Err(DbError::AlreadyExists(format!("index '{name}'")));
        }
        self.write_record(count, name, root_id);
        self.set_record_count(count + 1);
        Ok(())
    }

    pub fn update_record(&mut self, name: &str, root_id: PageId) -> bool {
        match self.as_ref().find(name) {
            Some(idx) => {
                let at = 4 + idx * ENTRY_SIZE + NAME_SIZE;
                self.data[at..at + 4].copy_from_slice(&root_id.0.to_le_bytes());
                true
            }
            None => false,
        }
    }

    /// Withdraw an entry, compacting the record array.
    pub fn delete_record(&mut self, name: &str) -> bool {
        let count = self.as_ref().record_count();
        match self.as_ref().find(name) {
            Some(idx) => {
                let start = 4 + (idx + 1) * ENTRY_SIZE;
                let end = 4 + count * ENTRY_SIZE;
                self.data.copy_within(start..end, start - ENTRY_SIZE);
                self.set_record_count(count - 1);
                true
            }
            None => false,
        }
    }
}
