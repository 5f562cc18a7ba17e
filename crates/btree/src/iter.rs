use crate::{
    node::{self, InternalRef, LeafRef, NodeKind},
    BPlusTree,
};
use buffer::{BufferPoolManager, ReadPageGuard};
use common::{DbResult, RecordId};
use std::sync::Arc;

/// Ordered scan over the leaf level.
///
/// Holds one pinned, read-latched leaf and an index within it. Advancing
/// past the last entry releases the leaf before following `next_page_id`,
/// so a scan never holds two leaf latches at once.
pub struct TreeIterator {
    bpm: Arc<BufferPoolManager>,
    key_size: usize,
    current: Option<(ReadPageGuard, usize)>,
}

impl TreeIterator {
    pub(crate) fn leftmost(tree: &BPlusTree) -> DbResult<Self> {
        Self::descend(tree, None)
    }

    pub(crate) fn at_key(tree: &BPlusTree, key: &[u8]) -> DbResult<Self> {
        Self::descend(tree, Some(key))
    }

    fn descend(tree: &BPlusTree, key: Option<&[u8]>) -> DbResult<Self> {
        let bpm = Arc::clone(tree.buffer_pool());
        let key_size = tree.key_size();
        let root_guard = tree.root_lock().read();
        let page_id = *root_guard;
        if !page_id.is_valid() {
            return Ok(Self {
                bpm,
                key_size,
                current: None,
            });
        }
        let mut guard = bpm.fetch_page_read(page_id)?;
        drop(root_guard);
        loop {
            match node::kind(&guard)? {
                NodeKind::Internal => {
                    let view = InternalRef::new(&guard, key_size);
                    let child = match key {
                        Some(key) => view.lookup(key, &**tree.comparator()),
                        None => view.child_at(0),
                    };
                    let next = bpm.fetch_page_read(child)?;
                    guard = next;
                }
                NodeKind::Leaf => break,
            }
        }
        let idx = match key {
            Some(key) => LeafRef::new(&guard, key_size).key_index(key, &**tree.comparator()),
            None => 0,
        };
        Ok(Self {
            bpm,
            key_size,
            current: Some((guard, idx)),
        })
    }
}

impl Iterator for TreeIterator {
    type Item = (Vec<u8>, RecordId);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (guard, idx) = self.current.take()?;
            if idx < node::size(&guard) {
                let leaf = LeafRef::new(&guard, self.key_size);
                let item = (leaf.key_at(idx).to_vec(), leaf.rid_at(idx));
                self.current = Some((guard, idx + 1));
                return Some(item);
            }
            let next = LeafRef::new(&guard, self.key_size).next_page_id();
            drop(guard);
            if !next.is_valid() {
                return None;
            }
            match self.bpm.fetch_page_read(next) {
                Ok(next_guard) => self.current = Some((next_guard, 0)),
                Err(_) => return None,
            }
        }
    }
}
