use btree::{BPlusTree, MemcmpComparator};
use buffer::BufferPoolManager;
use common::{Config, PageId, RecordId};
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use storage::DiskManager;
use tempfile::TempDir;
use wal::LogManager;

const KEY_SIZE: usize = 8;

fn key(v: i64) -> [u8; KEY_SIZE] {
    v.to_be_bytes()
}

fn rid(v: i64) -> RecordId {
    RecordId::new(PageId(v as i32), v as u32 % 16)
}

fn open_tree(
    dir: &TempDir,
    pool: usize,
    leaf_max: Option<usize>,
    internal_max: Option<usize>,
) -> BPlusTree {
    let config = Config::builder()
        .data_dir(dir.path().to_path_buf())
        .buffer_pool_pages(pool)
        .build();
    let disk = Arc::new(
        DiskManager::open(&config.heap_file(), &config.log_file()).unwrap(),
    );
    let log = Arc::new(LogManager::new(&config, Arc::clone(&disk)));
    let bpm = Arc::new(BufferPoolManager::new(&config, disk, log));
    BPlusTree::new(
        "scenario_index",
        bpm,
        Arc::new(MemcmpComparator),
        KEY_SIZE,
        leaf_max,
        internal_max,
    )
    .unwrap()
}

fn scan(tree: &BPlusTree) -> Vec<i64> {
    tree.iter()
        .unwrap()
        .map(|(key, _)| i64::from_be_bytes(key.try_into().unwrap()))
        .collect()
}

#[test]
fn insert_delete_round_trip_with_small_leaves() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, 64, Some(4), Some(4));

    for v in [5i64, 9, 1, 3, 7, 2, 4, 8, 6] {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
        tree.check_integrity().unwrap();
    }

    // Nine keys in four-entry leaves force at least one internal level.
    let exported = btree::tree_to_json(&tree).unwrap();
    assert_eq!(exported["tree"]["type"], "internal");

    assert_eq!(scan(&tree), vec![1, 2, 3, 4, 5, 6, 7, 8, 9]);
    for v in 1..=9i64 {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
    }

    for v in [3i64, 5, 7] {
        tree.remove(&key(v)).unwrap();
        tree.check_integrity().unwrap();
    }
    assert_eq!(scan(&tree), vec![1, 2, 4, 6, 8, 9]);
    for v in [3i64, 5, 7] {
        assert_eq!(tree.get(&key(v)).unwrap(), None);
    }
}

#[test]
fn ascending_and_descending_bulk_loads() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, 128, Some(4), Some(4));

    for v in 0..200i64 {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }
    tree.check_integrity().unwrap();
    assert_eq!(scan(&tree), (0..200).collect::<Vec<i64>>());

    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, 128, Some(4), Some(4));
    for v in (0..200i64).rev() {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }
    tree.check_integrity().unwrap();
    assert_eq!(scan(&tree), (0..200).collect::<Vec<i64>>());
}

#[test]
fn interleaved_inserts_and_deletes_converge() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, 128, Some(4), Some(4));

    let mut model = BTreeSet::new();
    for round in 0..6i64 {
        for v in 0..120i64 {
            let v = (v * 7 + round * 13) % 120;
            if model.insert(v) {
                assert!(tree.insert(&key(v), rid(v)).unwrap());
            }
        }
        for v in 0..120i64 {
            if v % (round + 2) == 0 && model.remove(&v) {
                tree.remove(&key(v)).unwrap();
            }
        }
        tree.check_integrity().unwrap();
        assert_eq!(scan(&tree), model.iter().copied().collect::<Vec<i64>>());
    }
}

#[test]
fn range_iteration_from_a_key() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, 64, Some(4), Some(4));
    for v in (0..50i64).step_by(2) {
        tree.insert(&key(v), rid(v)).unwrap();
    }

    // Positioned exactly at a present key.
    let from_ten: Vec<i64> = tree
        .iter_from(&key(10))
        .unwrap()
        .map(|(k, _)| i64::from_be_bytes(k.try_into().unwrap()))
        .collect();
    assert_eq!(from_ten, (10..50).step_by(2).collect::<Vec<i64>>());

    // Positioned between keys: starts at the next larger one.
    let from_eleven: Vec<i64> = tree
        .iter_from(&key(11))
        .unwrap()
        .map(|(k, _)| i64::from_be_bytes(k.try_into().unwrap()))
        .collect();
    assert_eq!(from_eleven, (12..50).step_by(2).collect::<Vec<i64>>());

    // Past the last key: empty.
    assert_eq!(tree.iter_from(&key(100)).unwrap().count(), 0);
}

#[test]
fn default_node_capacities_fill_pages() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, 256, None, None);
    // With page-sized nodes a few thousand keys stay within a short tree.
    for v in 0..4000i64 {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }
    tree.check_integrity().unwrap();
    assert_eq!(tree.get(&key(3999)).unwrap(), Some(rid(3999)));
    assert_eq!(scan(&tree).len(), 4000);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// The tree agrees with an ordered-set model across arbitrary
    /// insert/remove interleavings and keeps its invariants.
    #[test]
    fn behaves_like_an_ordered_map(ops in proptest::collection::vec((any::<bool>(), 0i64..64), 1..300)) {
        let dir = TempDir::new().unwrap();
        let tree = open_tree(&dir, 128, Some(4), Some(4));
        let mut model = BTreeSet::new();

        for (insert, v) in ops {
            if insert {
                let expect_new = model.insert(v);
                prop_assert_eq!(tree.insert(&key(v), rid(v)).unwrap(), expect_new);
            } else {
                model.remove(&v);
                tree.remove(&key(v)).unwrap();
            }
        }
        tree.check_integrity().unwrap();
        prop_assert_eq!(scan(&tree), model.iter().copied().collect::<Vec<i64>>());
        for v in 0..64i64 {
            let expected = model.contains(&v).then(|| rid(v));
            prop_assert_eq!(tree.get(&key(v)).unwrap(), expected);
        }
    }
}
