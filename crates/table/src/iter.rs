use crate::{page::TablePageRef, TableHeap};
use common::{DbResult, PageId, RecordId};
use std::sync::Arc;
use types::Tuple;

enum IterState {
    Start,
    At(RecordId),
    Done,
}

/// Sequential scan over a table heap.
///
/// Holds no latch between calls; each `next` read-latches one page, copies
/// the tuple out, and advances (skipping to the next page when the current
/// one has no more live slots). End of iteration is an exhausted chain.
pub struct TableIterator {
    heap: Arc<TableHeap>,
    state: IterState,
}

impl TableIterator {
    pub(crate) fn new(heap: Arc<TableHeap>) -> Self {
        Self {
            heap,
            state: IterState::Start,
        }
    }

    /// First live rid at or after the head of the chain.
    fn seek_from(&self, mut page_id: PageId) -> DbResult<Option<RecordId>> {
        let bpm = self.heap.buffer_pool();
        while page_id.is_valid() {
            let page = bpm.fetch_page_read(page_id)?;
            let view = TablePageRef::new(&page);
            if let Some(rid) = view.first_rid() {
                return Ok(Some(rid));
            }
            page_id = view.next_page_id();
        }
        Ok(None)
    }

    fn load_and_advance(&mut self, rid: RecordId) -> DbResult<Option<Tuple>> {
        let bpm = self.heap.buffer_pool();
        let page = bpm.fetch_page_read(rid.page_id)?;
        let view = TablePageRef::new(&page);
        let Some(data) = view.tuple_at(rid.slot) else {
            // The tuple vanished between visits (applied delete); resume
            // from the next slot rather than failing the scan.
            let next = view.next_rid(rid);
            let next_page = view.next_page_id();
            drop(page);
            self.state = match next {
                Some(rid) => IterState::At(rid),
                None => match self.seek_from(next_page)? {
                    Some(rid) => IterState::At(rid),
                    None => IterState::Done,
                },
            };
            return Ok(None);
        };

        let next = view.next_rid(rid);
        let next_page = view.next_page_id();
        drop(page);
        self.state = match next {
            Some(rid) => IterState::At(rid),
            None => match self.seek_from(next_page)? {
                Some(rid) => IterState::At(rid),
                None => IterState::Done,
            },
        };
        Ok(Some(Tuple::from_bytes(data, rid)))
    }
}

impl Iterator for TableIterator {
    type Item = DbResult<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let rid = match self.state {
                IterState::Start => match self.seek_from(self.heap.first_page_id()) {
                    Ok(Some(rid)) => rid,
                    Ok(None) => {
                        self.state = IterState::Done;
                        return None;
                    }
                    Err(err) => {
                        self.state = IterState::Done;
                        return Some(Err(err));
                    }
                },
                IterState::At(rid) => rid,
                IterState::Done => return None,
            };
            match self.load_and_advance(rid) {
                Ok(Some(tuple)) => return Some(Ok(tuple)),
                Ok(None) => continue,
                Err(err) => {
                    self.state = IterState::Done;
                    return Some(Err(err));
                }
            }
        }
    }
}
