use crate::{
    header::{HeaderPageMut, HeaderPageRef},
    iter::TreeIterator,
    node::{self, InternalMut, InternalRef, LeafMut, LeafRef, NodeKind},
    KeyComparator,
};
use buffer::{BufferPoolManager, WritePageGuard};
use common::{DbError, DbResult, PageId, RecordId, HEADER_PAGE_ID, PAGE_SIZE};
use parking_lot::{RwLock, RwLockWriteGuard};
use std::sync::Arc;
use tracing::debug;

type RootLatch<'a> = RwLockWriteGuard<'a, PageId>;

#[derive(Clone, Copy, PartialEq)]
enum WriteOp {
    Insert,
    Remove,
}

/// A latch-crabbing B+-tree keyed by fixed-size byte strings, with record
/// ids for values. Unique keys only.
pub struct BPlusTree {
    index_name: String,
    key_size: usize,
    leaf_max_size: usize,
    internal_max_size: usize,
    root: RwLock<PageId>,
    bpm: Arc<BufferPoolManager>,
    cmp: Arc<dyn KeyComparator>,
}

impl BPlusTree {
    /// Open (or register) the named index. Node capacities default to what
    /// fits in one page; tests pass smaller values.
    pub fn new(
        index_name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        cmp: Arc<dyn KeyComparator>,
        key_size: usize,
        leaf_max_size: Option<usize>,
        internal_max_size: Option<usize>,
    ) -> DbResult<Self> {
        let index_name = index_name.into();
        let leaf_max_size =
            leaf_max_size.unwrap_or((PAGE_SIZE - node::LEAF_HEADER_SIZE) / (key_size + 8));
        let internal_max_size = internal_max_size
            .unwrap_or((PAGE_SIZE - node::INTERNAL_HEADER_SIZE) / (key_size + 4));
        assert!(leaf_max_size >= 3, "leaf nodes need room to split");
        assert!(internal_max_size >= 3, "internal nodes need room to split");

        // A fresh heap file has no header page yet.
        if bpm.disk().num_pages() == 0 {
            let (page_id, _guard) = bpm.new_page_write()?;
            debug_assert_eq!(page_id, HEADER_PAGE_ID);
        }
        let root = {
            let header = bpm.fetch_page_read(HEADER_PAGE_ID)?;
            HeaderPageRef::new(&header)
                .root_id(&index_name)
                .unwrap_or(PageId::INVALID)
        };
        debug!(index = %index_name, root = root.0, "b+tree attached");
        Ok(Self {
            index_name,
            key_size,
            leaf_max_size,
            internal_max_size,
            root: RwLock::new(root),
            bpm,
            cmp,
        })
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub(crate) fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub(crate) fn comparator(&self) -> &Arc<dyn KeyComparator> {
        &self.cmp
    }

    pub(crate) fn root_lock(&self) -> &RwLock<PageId> {
        &self.root
    }

    pub(crate) fn leaf_max(&self) -> usize {
        self.leaf_max_size
    }

    pub(crate) fn internal_max(&self) -> usize {
        self.internal_max_size
    }

    pub fn is_empty(&self) -> bool {
        !self.root.read().is_valid()
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root.read()
    }

    fn check_key(&self, key: &[u8]) -> DbResult<()> {
        if key.len() != self.key_size {
            return Err(DbError::NotSupported(format!(
                "key of {} bytes on an index keyed by {} bytes",
                key.len(),
                self.key_size
            )));
        }
        Ok(())
    }

    fn min_size_of(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Leaf => node::min_size(kind, self.leaf_max_size),
            NodeKind::Internal => node::min_size(kind, self.internal_max_size),
        }
    }

    /// Rewrite this index's entry on the header page.
    fn update_root_record(&self, root: PageId) -> DbResult<()> {
        let mut header = self.bpm.fetch_page_write(HEADER_PAGE_ID)?;
        let mut page = HeaderPageMut::new(&mut header);
        if !page.update_record(&self.index_name, root) {
            page.insert_record(&self.index_name, root)?;
        }
        Ok(())
    }

    /// Point lookup.
    pub fn get(&self, key: &[u8]) -> DbResult<Option<RecordId>> {
        self.check_key(key)?;
        let root_guard = self.root.read();
        let page_id = *root_guard;
        if !page_id.is_valid() {
            return Ok(None);
        }
        // Latch-couple downward; the tree latch drops once the root page is
        // latched.
        let mut guard = self.bpm.fetch_page_read(page_id)?;
        drop(root_guard);
        loop {
            match node::kind(&guard)? {
                NodeKind::Internal => {
                    let child =
                        InternalRef::new(&guard, self.key_size).lookup(key, &*self.cmp);
                    let next = self.bpm.fetch_page_read(child)?;
                    guard = next;
                }
                NodeKind::Leaf => {
                    return Ok(LeafRef::new(&guard, self.key_size).lookup(key, &*self.cmp));
                }
            }
        }
    }

    /// Insert a unique key. Returns `false` when the key already exists.
    pub fn insert(&self, key: &[u8], rid: RecordId) -> DbResult<bool> {
        self.check_key(key)?;
        let mut root_latch = self.root.write();
        if !root_latch.is_valid() {
            self.start_new_tree(&mut root_latch, key, rid)?;
            return Ok(true);
        }
        let (mut stack, mut root_latch) =
            self.descend_write(root_latch, key, WriteOp::Insert)?;

        let leaf = stack.last_mut().expect("descent ends at a leaf");
        let old_size = node::size(leaf);
        let new_size = LeafMut::new(&mut *leaf, self.key_size).insert(key, rid, &*self.cmp);
        if new_size == old_size {
            return Ok(false);
        }
        if new_size < self.leaf_max_size {
            return Ok(true);
        }

        // The leaf is at capacity: split and promote the sibling's first key.
        let parent_id = node::parent(stack.last().expect("leaf"));
        let (sibling_id, mut sibling) = self.bpm.new_page_write()?;
        LeafMut::new(&mut sibling, self.key_size).init(
            sibling_id,
            parent_id,
            self.leaf_max_size,
        );
        {
            let leaf = stack.last_mut().expect("leaf");
            node::leaf_move_half(&mut *leaf, &mut sibling, self.key_size);
            let old_next = LeafRef::new(leaf, self.key_size).next_page_id();
            LeafMut::new(&mut sibling, self.key_size).set_next_page_id(old_next);
            LeafMut::new(&mut *leaf, self.key_size).set_next_page_id(sibling_id);
        }
        let promoted = LeafRef::new(&sibling, self.key_size).key_at(0).to_vec();
        debug!(index = %self.index_name, sibling = sibling_id.0, "leaf split");
        self.insert_into_parent(&mut stack, &mut root_latch, promoted, sibling_id, sibling)?;
        Ok(true)
    }

    /// Remove a key. Removing an absent key is a no-op.
    pub fn remove(&self, key: &[u8]) -> DbResult<()> {
        self.check_key(key)?;
        let root_latch = self.root.write();
        if !root_latch.is_valid() {
            return Ok(());
        }
        let (mut stack, mut root_latch) =
            self.descend_write(root_latch, key, WriteOp::Remove)?;

        let leaf = stack.last_mut().expect("descent ends at a leaf");
        let old_size = node::size(leaf);
        let new_size = LeafMut::new(&mut *leaf, self.key_size).remove(key, &*self.cmp);
        if new_size == old_size {
            return Ok(());
        }
        self.rebalance(&mut stack, &mut root_latch)
    }

    fn start_new_tree(
        &self,
        root_latch: &mut RootLatch<'_>,
        key: &[u8],
        rid: RecordId,
    ) -> DbResult<()> {
        let (page_id, mut guard) = self.bpm.new_page_write()?;
        let mut leaf = LeafMut::new(&mut guard, self.key_size);
        leaf.init(page_id, PageId::INVALID, self.leaf_max_size);
        leaf.insert(key, rid, &*self.cmp);
        **root_latch = page_id;
        drop(guard);
        self.update_root_record(page_id)?;
        debug!(index = %self.index_name, root = page_id.0, "tree started");
        Ok(())
    }

    /// Descend to the leaf for `key`, write-latching the path. Ancestor
    /// latches (and the tree latch) are released as soon as a child is
    /// safe for `op`; what remains on the stack may need to change.
    fn descend_write<'a>(
        &self,
        root_latch: RootLatch<'a>,
        key: &[u8],
        op: WriteOp,
    ) -> DbResult<(Vec<WritePageGuard>, Option<RootLatch<'a>>)> {
        let mut root_latch = Some(root_latch);
        let mut stack: Vec<WritePageGuard> = Vec::new();
        let mut page_id = **root_latch.as_ref().expect("tree latch");
        loop {
            let guard = self.bpm.fetch_page_write(page_id)?;
            let kind = node::kind(&guard)?;
            let size = node::size(&guard);
            let is_root = !node::parent(&guard).is_valid();
            let safe = match op {
                WriteOp::Insert => match kind {
                    NodeKind::Leaf => size + 1 < self.leaf_max_size,
                    NodeKind::Internal => size < self.internal_max_size,
                },
                WriteOp::Remove => {
                    if is_root {
                        match kind {
                            NodeKind::Leaf => size > 1,
                            NodeKind::Internal => size > 2,
                        }
                    } else {
                        size > self.min_size_of(kind)
                    }
                }
            };
            if safe {
                stack.clear();
                root_latch = None;
            }
            match kind {
                NodeKind::Leaf => {
                    stack.push(guard);
                    return Ok((stack, root_latch));
                }
                NodeKind::Internal => {
                    page_id = InternalRef::new(&guard, self.key_size).lookup(key, &*self.cmp);
                    stack.push(guard);
                }
            }
        }
    }

    /// Promote `key` into the parent of the just-split node at the top of
    /// the stack, splitting upward as needed.
    fn insert_into_parent<'a>(
        &self,
        stack: &mut Vec<WritePageGuard>,
        root_latch: &mut Option<RootLatch<'a>>,
        key: Vec<u8>,
        new_id: PageId,
        mut new_guard: WritePageGuard,
    ) -> DbResult<()> {
        let mut old_guard = stack.pop().expect("split node on stack");
        let old_id = old_guard.page_id();

        if stack.is_empty() {
            // The split node was the root: grow the tree by one level.
            let latch = root_latch
                .as_mut()
                .expect("root split requires the tree latch");
            let (root_id, mut root_guard) = self.bpm.new_page_write()?;
            let mut root = InternalMut::new(&mut root_guard, self.key_size);
            root.init(root_id, PageId::INVALID, self.internal_max_size);
            root.populate_new_root(old_id, &key, new_id);
            node::set_parent(&mut old_guard, root_id);
            node::set_parent(&mut new_guard, root_id);
            **latch = root_id;
            drop(root_guard);
            drop(old_guard);
            drop(new_guard);
            self.update_root_record(root_id)?;
            debug!(index = %self.index_name, root = root_id.0, "new root");
            return Ok(());
        }

        let parent_size = node::size(stack.last().expect("parent"));
        if parent_size < self.internal_max_size {
            let parent = stack.last_mut().expect("parent");
            InternalMut::new(&mut *parent, self.key_size)
                .insert_node_after(old_id, &key, new_id);
            return Ok(());
        }

        // Full parent: build the temporarily oversized image, split it, and
        // recurse with the promoted separator.
        let (parent_id, parent_parent, mut entries) = {
            let parent = stack.last().expect("parent");
            (
                parent.page_id(),
                node::parent(parent),
                InternalRef::new(parent, self.key_size).entries(),
            )
        };
        let pos = entries
            .iter()
            .position(|(_, child)| *child == old_id)
            .expect("split child under its parent");
        entries.insert(pos + 1, (key, new_id));

        let keep = (self.internal_max_size + 1) / 2;
        let right_entries = entries.split_off(keep);
        let promoted = right_entries[0].0.clone();
        {
            let parent = stack.last_mut().expect("parent");
            InternalMut::new(&mut *parent, self.key_size).write_entries(&entries);
        }

        let (sibling_id, mut sibling) = self.bpm.new_page_write()?;
        {
            let mut view = InternalMut::new(&mut sibling, self.key_size);
            view.init(sibling_id, parent_parent, self.internal_max_size);
            view.write_entries(&right_entries);
        }
        // Children that moved to the sibling need their parent pointers
        // rewritten; two of them may be the pages we already hold.
        for (_, child) in &right_entries {
            if *child == old_id {
                node::set_parent(&mut old_guard, sibling_id);
            } else if *child == new_id {
                node::set_parent(&mut new_guard, sibling_id);
            } else {
                let mut child_guard = self.bpm.fetch_page_write(*child)?;
                node::set_parent(&mut child_guard, sibling_id);
            }
        }
        drop(old_guard);
        drop(new_guard);
        debug!(index = %self.index_name, parent = parent_id.0, sibling = sibling_id.0, "internal split");
        self.insert_into_parent(stack, root_latch, promoted, sibling_id, sibling)
    }

    /// Restore occupancy invariants for the node at the top of the stack
    /// after a removal.
    fn rebalance<'a>(
        &self,
        stack: &mut Vec<WritePageGuard>,
        root_latch: &mut Option<RootLatch<'a>>,
    ) -> DbResult<()> {
        let node_guard = stack.last().expect("node under rebalance");
        let kind = node::kind(node_guard)?;
        let size = node::size(node_guard);
        if !node::parent(node_guard).is_valid() {
            return self.adjust_root(stack, root_latch);
        }
        if size >= self.min_size_of(kind) {
            return Ok(());
        }

        let mut node_guard = stack.pop().expect("node under rebalance");
        let node_id = node_guard.page_id();
        let parent = stack.last_mut().expect("non-root node has a parent");
        let idx = InternalRef::new(parent, self.key_size)
            .value_index(node_id)
            .ok_or_else(|| {
                DbError::Corruption(format!(
                    "page {} missing from its parent {}",
                    node_id.0,
                    parent.page_id().0
                ))
            })?;

        if idx > 0 {
            // Prefer the left sibling.
            let left_id = InternalRef::new(parent, self.key_size).child_at(idx - 1);
            let mut left_guard = self.bpm.fetch_page_write(left_id)?;
            if node::size(&left_guard) > self.min_size_of(kind) {
                self.redistribute_from_left(&mut left_guard, &mut node_guard, stack, idx)?;
                return Ok(());
            }
            self.coalesce_into_left(left_guard, node_guard, stack, idx)?;
            self.rebalance(stack, root_latch)
        } else {
            let right_id = InternalRef::new(parent, self.key_size).child_at(idx + 1);
            let mut right_guard = self.bpm.fetch_page_write(right_id)?;
            if node::size(&right_guard) > self.min_size_of(kind) {
                self.redistribute_from_right(&mut node_guard, &mut right_guard, stack)?;
                return Ok(());
            }
            self.coalesce_from_right(node_guard, right_guard, stack)?;
            self.rebalance(stack, root_latch)
        }
    }

    /// Move the left sibling's last entry across the parent separator.
    fn redistribute_from_left(
        &self,
        left: &mut WritePageGuard,
        node: &mut WritePageGuard,
        stack: &mut [WritePageGuard],
        idx: usize,
    ) -> DbResult<()> {
        let parent = stack.last_mut().expect("parent");
        match node::kind(node)? {
            NodeKind::Leaf => {
                node::leaf_move_last_to_front(&mut *left, &mut *node, self.key_size);
                let separator = LeafRef::new(node, self.key_size).key_at(0).to_vec();
                InternalMut::new(&mut *parent, self.key_size).set_key_at(idx, &separator);
            }
            NodeKind::Internal => {
                let middle = InternalRef::new(parent, self.key_size).key_at(idx).to_vec();
                let left_size = node::size(left);
                let (moved_key, moved_child) = {
                    let view = InternalRef::new(left, self.key_size);
                    (
                        view.key_at(left_size - 1).to_vec(),
                        view.child_at(left_size - 1),
                    )
                };
                let mut entries = InternalRef::new(node, self.key_size).entries();
                entries[0].0 = middle;
                entries.insert(0, (vec![0u8; self.key_size], moved_child));
                InternalMut::new(&mut *node, self.key_size).write_entries(&entries);
                InternalMut::new(&mut *left, self.key_size).remove_at(left_size - 1);
                InternalMut::new(&mut *parent, self.key_size).set_key_at(idx, &moved_key);

                let mut child_guard = self.bpm.fetch_page_write(moved_child)?;
                node::set_parent(&mut child_guard, node.page_id());
            }
        }
        Ok(())
    }

    /// Move the right sibling's first entry across the parent separator.
    /// Only used when the node is its parent's leftmost child (idx 0).
    fn redistribute_from_right(
        &self,
        node: &mut WritePageGuard,
        right: &mut WritePageGuard,
        stack: &mut [WritePageGuard],
    ) -> DbResult<()> {
        let parent = stack.last_mut().expect("parent");
        match node::kind(node)? {
            NodeKind::Leaf => {
                node::leaf_move_first_to_end(&mut *right, &mut *node, self.key_size);
                let separator = LeafRef::new(right, self.key_size).key_at(0).to_vec();
                InternalMut::new(&mut *parent, self.key_size).set_key_at(1, &separator);
            }
            NodeKind::Internal => {
                let middle = InternalRef::new(parent, self.key_size).key_at(1).to_vec();
                let (next_separator, moved_child) = {
                    let view = InternalRef::new(right, self.key_size);
                    (view.key_at(1).to_vec(), view.child_at(0))
                };
                let mut entries = InternalRef::new(node, self.key_size).entries();
                entries.push((middle, moved_child));
                InternalMut::new(&mut *node, self.key_size).write_entries(&entries);
                InternalMut::new(&mut *right, self.key_size).remove_at(0);
                InternalMut::new(&mut *parent, self.key_size).set_key_at(1, &next_separator);

                let mut child_guard = self.bpm.fetch_page_write(moved_child)?;
                node::set_parent(&mut child_guard, node.page_id());
            }
        }
        Ok(())
    }

    /// Merge `node` into its left sibling and drop its parent entry.
    fn coalesce_into_left(
        &self,
        mut left: WritePageGuard,
        mut node: WritePageGuard,
        stack: &mut [WritePageGuard],
        idx: usize,
    ) -> DbResult<()> {
        let left_id = left.page_id();
        let node_id = node.page_id();
        let parent = stack.last_mut().expect("parent");
        match node::kind(&node)? {
            NodeKind::Leaf => {
                let next = LeafRef::new(&node, self.key_size).next_page_id();
                node::leaf_move_all(&mut node, &mut left, self.key_size);
                LeafMut::new(&mut left, self.key_size).set_next_page_id(next);
            }
            NodeKind::Internal => {
                let middle = InternalRef::new(parent, self.key_size).key_at(idx).to_vec();
                let mut moved = InternalRef::new(&node, self.key_size).entries();
                moved[0].0 = middle;
                let mut entries = InternalRef::new(&left, self.key_size).entries();
                entries.extend(moved.iter().cloned());
                InternalMut::new(&mut left, self.key_size).write_entries(&entries);
                for (_, child) in &moved {
                    let mut child_guard = self.bpm.fetch_page_write(*child)?;
                    node::set_parent(&mut child_guard, left_id);
                }
            }
        }
        InternalMut::new(&mut *parent, self.key_size).remove_at(idx);
        drop(left);
        drop(node);
        self.discard_page(node_id);
        debug!(index = %self.index_name, survivor = left_id.0, removed = node_id.0, "coalesced");
        Ok(())
    }

    /// Merge the right sibling into `node` and drop the sibling's parent
    /// entry. Only used when the node is its parent's leftmost child.
    fn coalesce_from_right(
        &self,
        mut node: WritePageGuard,
        mut right: WritePageGuard,
        stack: &mut [WritePageGuard],
    ) -> DbResult<()> {
        let node_id = node.page_id();
        let right_id = right.page_id();
        let parent = stack.last_mut().expect("parent");
        match node::kind(&node)? {
            NodeKind::Leaf => {
                let next = LeafRef::new(&right, self.key_size).next_page_id();
                node::leaf_move_all(&mut right, &mut node, self.key_size);
                LeafMut::new(&mut node, self.key_size).set_next_page_id(next);
            }
            NodeKind::Internal => {
                let middle = InternalRef::new(parent, self.key_size).key_at(1).to_vec();
                let mut moved = InternalRef::new(&right, self.key_size).entries();
                moved[0].0 = middle;
                let mut entries = InternalRef::new(&node, self.key_size).entries();
                entries.extend(moved.iter().cloned());
                InternalMut::new(&mut node, self.key_size).write_entries(&entries);
                for (_, child) in &moved {
                    let mut child_guard = self.bpm.fetch_page_write(*child)?;
                    node::set_parent(&mut child_guard, node_id);
                }
            }
        }
        InternalMut::new(&mut *parent, self.key_size).remove_at(1);
        drop(node);
        drop(right);
        self.discard_page(right_id);
        debug!(index = %self.index_name, survivor = node_id.0, removed = right_id.0, "coalesced");
        Ok(())
    }

    /// The root shrank: collapse a one-child internal root into its child,
    /// or clear the tree when the last leaf entry is gone.
    fn adjust_root<'a>(
        &self,
        stack: &mut Vec<WritePageGuard>,
        root_latch: &mut Option<RootLatch<'a>>,
    ) -> DbResult<()> {
        let root_guard = stack.pop().expect("root on stack");
        let kind = node::kind(&root_guard)?;
        let size = node::size(&root_guard);
        match kind {
            NodeKind::Internal if size == 1 => {
                let old_root = root_guard.page_id();
                let child_id = InternalRef::new(&root_guard, self.key_size).child_at(0);
                let mut child = self.bpm.fetch_page_write(child_id)?;
                node::set_parent(&mut child, PageId::INVALID);
                let latch = root_latch
                    .as_mut()
                    .expect("root change requires the tree latch");
                **latch = child_id;
                drop(child);
                drop(root_guard);
                self.update_root_record(child_id)?;
                self.discard_page(old_root);
                debug!(index = %self.index_name, root = child_id.0, "root collapsed");
            }
            NodeKind::Leaf if size == 0 => {
                let old_root = root_guard.page_id();
                let latch = root_latch
                    .as_mut()
                    .expect("root change requires the tree latch");
                **latch = PageId::INVALID;
                drop(root_guard);
                self.update_root_record(PageId::INVALID)?;
                self.discard_page(old_root);
                debug!(index = %self.index_name, "tree emptied");
            }
            _ => {}
        }
        Ok(())
    }

    /// Reclaim a structurally unreachable page. A concurrent scan may still
    /// hold a pin; if so the page id stays allocated.
    fn discard_page(&self, page_id: PageId) {
        if let Err(err) = self.bpm.delete_page(page_id) {
            debug!(page = page_id.0, %err, "page reclamation deferred");
        }
    }

    /// Iterator positioned at the smallest key.
    pub fn iter(&self) -> DbResult<TreeIterator> {
        TreeIterator::leftmost(self)
    }

    /// Iterator positioned at the first key ≥ `key`.
    pub fn iter_from(&self, key: &[u8]) -> DbResult<TreeIterator> {
        self.check_key(key)?;
        TreeIterator::at_key(self, key)
    }
}

impl std::fmt::Debug for BPlusTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BPlusTree")
            .field("index_name", &self.index_name)
            .field("key_size", &self.key_size)
            .field("leaf_max_size", &self.leaf_max_size)
            .field("internal_max_size", &self.internal_max_size)
            .field("root", &self.root_page_id())
            .finish()
    }
}
