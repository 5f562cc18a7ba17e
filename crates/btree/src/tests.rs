use crate::{
    header::{HeaderPageMut, HeaderPageRef},
    node::{self, InternalMut, InternalRef, LeafMut, LeafRef},
    BPlusTree, MemcmpComparator,
};
use buffer::BufferPoolManager;
use common::{Config, DbError, PageBuf, PageId, RecordId, PAGE_SIZE};
use std::sync::Arc;
use storage::DiskManager;
use tempfile::TempDir;
use wal::LogManager;

const KEY_SIZE: usize = 8;

fn key(v: i64) -> [u8; KEY_SIZE] {
    v.to_be_bytes()
}

fn rid(v: i64) -> RecordId {
    RecordId::new(PageId(v as i32), 0)
}

fn open_tree(dir: &TempDir, leaf_max: Option<usize>, internal_max: Option<usize>) -> BPlusTree {
    let config = Config::builder()
        .data_dir(dir.path().to_path_buf())
        .buffer_pool_pages(64)
        .build();
    let disk = Arc::new(
        DiskManager::open(&config.heap_file(), &config.log_file()).unwrap(),
    );
    let log = Arc::new(LogManager::new(&config, Arc::clone(&disk)));
    let bpm = Arc::new(BufferPoolManager::new(&config, disk, log));
    BPlusTree::new(
        "test_index",
        bpm,
        Arc::new(MemcmpComparator),
        KEY_SIZE,
        leaf_max,
        internal_max,
    )
    .unwrap()
}

#[test]
fn leaf_page_keeps_keys_sorted() {
    let mut buf: PageBuf = [0u8; PAGE_SIZE];
    let cmp = MemcmpComparator;
    let mut leaf = LeafMut::new(&mut buf, KEY_SIZE);
    leaf.init(PageId(1), PageId::INVALID, 8);

    for v in [5i64, 1, 9, 3] {
        leaf.insert(&key(v), rid(v), &cmp);
    }
    let view = LeafRef::new(&buf, KEY_SIZE);
    let keys: Vec<i64> = (0..node::size(&buf))
        .map(|i| i64::from_be_bytes(view.key_at(i).try_into().unwrap()))
        .collect();
    assert_eq!(keys, vec![1, 3, 5, 9]);
    assert_eq!(view.lookup(&key(3), &cmp), Some(rid(3)));
    assert_eq!(view.lookup(&key(4), &cmp), None);
}

#[test]
fn leaf_insert_rejects_duplicates() {
    let mut buf: PageBuf = [0u8; PAGE_SIZE];
    let cmp = MemcmpComparator;
    let mut leaf = LeafMut::new(&mut buf, KEY_SIZE);
    leaf.init(PageId(1), PageId::INVALID, 8);

    assert_eq!(leaf.insert(&key(7), rid(7), &cmp), 1);
    assert_eq!(leaf.insert(&key(7), rid(8), &cmp), 1);
    let view = LeafRef::new(&buf, KEY_SIZE);
    assert_eq!(view.lookup(&key(7), &cmp), Some(rid(7)));
}

#[test]
fn leaf_remove_shifts_entries() {
    let mut buf: PageBuf = [0u8; PAGE_SIZE];
    let cmp = MemcmpComparator;
    let mut leaf = LeafMut::new(&mut buf, KEY_SIZE);
    leaf.init(PageId(1), PageId::INVALID, 8);
    for v in 1..=4i64 {
        leaf.insert(&key(v), rid(v), &cmp);
    }
    assert_eq!(leaf.remove(&key(2), &cmp), 3);
    assert_eq!(leaf.remove(&key(2), &cmp), 3);
    let view = LeafRef::new(&buf, KEY_SIZE);
    assert_eq!(view.lookup(&key(1), &cmp), Some(rid(1)));
    assert_eq!(view.lookup(&key(3), &cmp), Some(rid(3)));
    assert_eq!(view.lookup(&key(4), &cmp), Some(rid(4)));
}

#[test]
fn internal_lookup_routes_by_separator() {
    let mut buf: PageBuf = [0u8; PAGE_SIZE];
    let cmp = MemcmpComparator;
    let mut internal = InternalMut::new(&mut buf, KEY_SIZE);
    internal.init(PageId(9), PageId::INVALID, 8);
    internal.populate_new_root(PageId(1), &key(10), PageId(2));
    internal.insert_node_after(PageId(2), &key(20), PageId(3));

    let view = InternalRef::new(&buf, KEY_SIZE);
    // keys < 10 go left of the first separator; >= 10 to its right child.
    assert_eq!(view.lookup(&key(5), &cmp), PageId(1));
    assert_eq!(view.lookup(&key(10), &cmp), PageId(2));
    assert_eq!(view.lookup(&key(15), &cmp), PageId(2));
    assert_eq!(view.lookup(&key(20), &cmp), PageId(3));
    assert_eq!(view.lookup(&key(99), &cmp), PageId(3));
    assert_eq!(view.value_index(PageId(2)), Some(1));
}

#[test]
fn header_page_registry_round_trips() {
    let mut buf: PageBuf = [0u8; PAGE_SIZE];
    {
        let mut header = HeaderPageMut::new(&mut buf);
        header.insert_record("orders_pk", PageId(3)).unwrap();
        header.insert_record("users_pk", PageId(7)).unwrap();
        assert!(matches!(
            header.insert_record("orders_pk", PageId(9)),
            Err(DbError::AlreadyExists(_))
        ));
    }
    let view = HeaderPageRef::new(&buf);
    assert_eq!(view.record_count(), 2);
    assert_eq!(view.root_id("orders_pk"), Some(PageId(3)));
    assert_eq!(view.root_id("users_pk"), Some(PageId(7)));
    assert_eq!(view.root_id("missing"), None);

    let mut header = HeaderPageMut::new(&mut buf);
    assert!(header.update_record("orders_pk", PageId(11)));
    assert!(!header.update_record("missing", PageId(1)));
    assert!(header.delete_record("orders_pk"));
    let view = HeaderPageRef::new(&buf);
    assert_eq!(view.record_count(), 1);
    assert_eq!(view.root_id("orders_pk"), None);
    assert_eq!(view.root_id("users_pk"), Some(PageId(7)));
}

#[test]
fn header_page_rejects_long_names() {
    let mut buf: PageBuf = [0u8; PAGE_SIZE];
    let mut header = HeaderPageMut::new(&mut buf);
    let long = "x".repeat(40);
    assert!(matches!(
        header.insert_record(&long, PageId(1)),
        Err(DbError::NotSupported(_))
    ));
}

#[test]
fn empty_tree_behaves() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, Some(4), Some(4));
    assert!(tree.is_empty());
    assert_eq!(tree.get(&key(1)).unwrap(), None);
    tree.remove(&key(1)).unwrap();
    assert_eq!(tree.iter().unwrap().count(), 0);
    tree.check_integrity().unwrap();
}

#[test]
fn single_node_insert_get_remove() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, Some(4), Some(4));

    assert!(tree.insert(&key(2), rid(2)).unwrap());
    assert!(tree.insert(&key(1), rid(1)).unwrap());
    assert!(!tree.insert(&key(2), rid(99)).unwrap(), "unique keys only");

    assert_eq!(tree.get(&key(1)).unwrap(), Some(rid(1)));
    assert_eq!(tree.get(&key(2)).unwrap(), Some(rid(2)));

    tree.remove(&key(1)).unwrap();
    assert_eq!(tree.get(&key(1)).unwrap(), None);
    tree.check_integrity().unwrap();
}

#[test]
fn removing_every_key_empties_the_tree() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, Some(4), Some(4));

    for v in 0..32i64 {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }
    for v in 0..32i64 {
        tree.remove(&key(v)).unwrap();
        tree.check_integrity().unwrap();
    }
    assert!(tree.is_empty());
    assert_eq!(tree.iter().unwrap().count(), 0);
}

#[test]
fn mismatched_key_width_is_rejected() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, Some(4), Some(4));
    assert!(matches!(
        tree.insert(b"short", rid(1)),
        Err(DbError::NotSupported(_))
    ));
    assert!(matches!(
        tree.get(b"short"),
        Err(DbError::NotSupported(_))
    ));
}

#[test]
fn root_registry_follows_root_changes() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, Some(4), Some(4));

    for v in 0..16i64 {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    let root = tree.root_page_id();
    assert!(root.is_valid());

    let header = tree
        .buffer_pool()
        .fetch_page_read(common::HEADER_PAGE_ID)
        .unwrap();
    assert_eq!(
        HeaderPageRef::new(&header).root_id("test_index"),
        Some(root)
    );
}

#[test]
fn json_export_reflects_structure() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, Some(4), Some(4));
    for v in 0..10i64 {
        tree.insert(&key(v), rid(v)).unwrap();
    }
    let exported = crate::tree_to_json(&tree).unwrap();
    assert_eq!(exported["index_name"], "test_index");
    assert_eq!(exported["is_empty"], false);
    assert_eq!(exported["tree"]["type"], "internal");
    assert!(exported["tree"]["children"].as_array().unwrap().len() >= 2);
}
