//! Read-only observers: a JSON exporter for debugging and a structural
//! integrity checker used by tests.
//!
//! Both walk the tree under shared latches and never mutate it.

use crate::{
    node::{self, InternalRef, LeafRef, NodeKind},
    BPlusTree,
};
use common::{DbError, DbResult, PageId};
use serde_json::{json, Value};
use std::cmp::Ordering;

fn hex(key: &[u8]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}

/// Render the whole tree as JSON, holding read latches while visiting.
pub fn tree_to_json(tree: &BPlusTree) -> DbResult<Value> {
    let root = tree.root_page_id();
    let mut out = json!({
        "index_name": tree.index_name(),
        "root_page_id": root.0,
        "is_empty": !root.is_valid(),
    });
    if root.is_valid() {
        out["tree"] = node_to_json(tree, root)?;
    }
    Ok(out)
}

fn node_to_json(tree: &BPlusTree, page_id: PageId) -> DbResult<Value> {
    let key_size = tree.key_size();
    let guard = tree.buffer_pool().fetch_page_read(page_id)?;
    let size = node::size(&guard);
    match node::kind(&guard)? {
        NodeKind::Leaf => {
            let leaf = LeafRef::new(&guard, key_size);
            let keys: Vec<String> = (0..size).map(|i| hex(leaf.key_at(i))).collect();
            let values: Vec<String> = (0..size)
                .map(|i| {
                    let rid = leaf.rid_at(i);
                    format!("page:{},slot:{}", rid.page_id.0, rid.slot)
                })
                .collect();
            Ok(json!({
                "type": "leaf",
                "page_id": page_id.0,
                "parent_id": node::parent(&guard).0,
                "size": size,
                "next_page_id": leaf.next_page_id().0,
                "keys": keys,
                "values": values,
            }))
        }
        NodeKind::Internal => {
            let (keys, children) = {
                let internal = InternalRef::new(&guard, key_size);
                let keys: Vec<String> = (1..size).map(|i| hex(internal.key_at(i))).collect();
                let children: Vec<PageId> = (0..size).map(|i| internal.child_at(i)).collect();
                (keys, children)
            };
            let parent = node::parent(&guard).0;
            drop(guard);
            let mut child_json = Vec::with_capacity(children.len());
            for child in &children {
                child_json.push(node_to_json(tree, *child)?);
            }
            Ok(json!({
                "type": "internal",
                "page_id": page_id.0,
                "parent_id": parent,
                "size": size,
                "keys": keys,
                "values": children.iter().map(|c| c.0).collect::<Vec<i32>>(),
                "children": child_json,
            }))
        }
    }
}

impl BPlusTree {
    /// Validate the structural invariants: key ordering inside nodes,
    /// separator bounds, occupancy minimums, parent pointers, and a leaf
    /// chain that visits every key exactly once in order.
    pub fn check_integrity(&self) -> DbResult<()> {
        let root = self.root_page_id();
        if !root.is_valid() {
            return Ok(());
        }
        let mut keys_in_order = Vec::new();
        self.check_node(root, PageId::INVALID, None, None, &mut keys_in_order)?;

        let cmp = &**self.comparator();
        for pair in keys_in_order.windows(2) {
            if cmp.compare(&pair[0], &pair[1]) != Ordering::Less {
                return Err(DbError::Corruption(
                    "in-order key sequence is not strictly increasing".into(),
                ));
            }
        }
        let chained: Vec<Vec<u8>> = self.iter()?.map(|(key, _)| key).collect();
        if chained != keys_in_order {
            return Err(DbError::Corruption(
                "leaf chain disagrees with the in-order traversal".into(),
            ));
        }
        Ok(())
    }

    fn check_node(
        &self,
        page_id: PageId,
        expected_parent: PageId,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
        out: &mut Vec<Vec<u8>>,
    ) -> DbResult<()> {
        let key_size = self.key_size();
        let cmp = &**self.comparator();
        let corrupt = |detail: String| DbError::Corruption(detail);

        let guard = self.buffer_pool().fetch_page_read(page_id)?;
        if node::parent(&guard) != expected_parent {
            return Err(corrupt(format!(
                "page {} has parent {}, expected {}",
                page_id.0,
                node::parent(&guard).0,
                expected_parent.0
            )));
        }
        let size = node::size(&guard);
        let kind = node::kind(&guard)?;
        let is_root = !expected_parent.is_valid();
        if !is_root && size < self.min_size_for(kind) {
            return Err(corrupt(format!(
                "page {} below min occupancy ({size})",
                page_id.0
            )));
        }

        let in_bounds = |key: &[u8]| {
            lower
                .as_deref()
                .map_or(true, |low| cmp.compare(key, low) != Ordering::Less)
                && upper
                    .as_deref()
                    .map_or(true, |high| cmp.compare(key, high) == Ordering::Less)
        };

        match kind {
            NodeKind::Leaf => {
                let leaf = LeafRef::new(&guard, key_size);
                for i in 0..size {
                    let key = leaf.key_at(i);
                    if i > 0 && cmp.compare(leaf.key_at(i - 1), key) != Ordering::Less {
                        return Err(corrupt(format!("leaf {} keys out of order", page_id.0)));
                    }
                    if !in_bounds(key) {
                        return Err(corrupt(format!(
                            "leaf {} key escapes its separator bounds",
                            page_id.0
                        )));
                    }
                    out.push(key.to_vec());
                }
                Ok(())
            }
            NodeKind::Internal => {
                if size < 2 {
                    return Err(corrupt(format!(
                        "internal {} with {size} children",
                        page_id.0
                    )));
                }
                let (separators, children) = {
                    let internal = InternalRef::new(&guard, key_size);
                    let separators: Vec<Vec<u8>> =
                        (1..size).map(|i| internal.key_at(i).to_vec()).collect();
                    let children: Vec<PageId> =
                        (0..size).map(|i| internal.child_at(i)).collect();
                    (separators, children)
                };
                drop(guard);

                for pair in separators.windows(2) {
                    if cmp.compare(&pair[0], &pair[1]) != Ordering::Less {
                        return Err(corrupt(format!(
                            "internal {} separators out of order",
                            page_id.0
                        )));
                    }
                }
                for separator in &separators {
                    if !in_bounds(separator) {
                        return Err(corrupt(format!(
                            "internal {} separator escapes its bounds",
                            page_id.0
                        )));
                    }
                }
                for (i, child) in children.iter().enumerate() {
                    let child_lower = if i == 0 {
                        lower.clone()
                    } else {
                        Some(separators[i - 1].clone())
                    };
                    let child_upper = if i == children.len() - 1 {
                        upper.clone()
                    } else {
                        Some(separators[i].clone())
                    };
                    self.check_node(*child, page_id, child_lower, child_upper, out)?;
                }
                Ok(())
            }
        }
    }

    fn min_size_for(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Leaf => node::min_size(kind, self.leaf_max()),
            NodeKind::Internal => node::min_size(kind, self.internal_max()),
        }
    }
}
