use btree::{BPlusTree, MemcmpComparator};
use buffer::BufferPoolManager;
use common::{Config, PageId, RecordId};
use std::sync::Arc;
use std::thread;
use storage::DiskManager;
use tempfile::TempDir;
use wal::LogManager;

const KEY_SIZE: usize = 8;

fn key(v: i64) -> [u8; KEY_SIZE] {
    v.to_be_bytes()
}

fn rid(v: i64) -> RecordId {
    RecordId::new(PageId((v / 100) as i32 + 1), (v % 100) as u32)
}

fn open_tree(dir: &TempDir, pool: usize) -> Arc<BPlusTree> {
    let config = Config::builder()
        .data_dir(dir.path().to_path_buf())
        .buffer_pool_pages(pool)
        .build();
    let disk = Arc::new(
        DiskManager::open(&config.heap_file(), &config.log_file()).unwrap(),
    );
    let log = Arc::new(LogManager::new(&config, Arc::clone(&disk)));
    let bpm = Arc::new(BufferPoolManager::new(&config, disk, log));
    Arc::new(
        BPlusTree::new(
            "concurrent_index",
            bpm,
            Arc::new(MemcmpComparator),
            KEY_SIZE,
            None,
            None,
        )
        .unwrap(),
    )
}

#[test]
fn eight_writers_with_disjoint_keys() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, 128);

    let threads = 8i64;
    let per_thread = 1000i64;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for i in 0..per_thread {
                    let v = t * per_thread + i;
                    assert!(tree.insert(&key(v), rid(v)).unwrap(), "duplicate {v}");
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let scanned: Vec<i64> = tree
        .iter()
        .unwrap()
        .map(|(k, _)| i64::from_be_bytes(k.try_into().unwrap()))
        .collect();
    assert_eq!(scanned, (0..threads * per_thread).collect::<Vec<i64>>());
    tree.check_integrity().unwrap();

    for v in (0..threads * per_thread).step_by(97) {
        assert_eq!(tree.get(&key(v)).unwrap(), Some(rid(v)));
    }
}

#[test]
fn readers_run_against_writers() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, 128);

    // Seed a stable prefix that readers can always expect to find.
    for v in 0..500i64 {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }

    let writer = {
        let tree = Arc::clone(&tree);
        thread::spawn(move || {
            for v in 500..2500i64 {
                assert!(tree.insert(&key(v), rid(v)).unwrap());
            }
        })
    };
    let readers: Vec<_> = (0..4)
        .map(|r| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for round in 0..50i64 {
                    let probe = (r * 131 + round * 37) % 500;
                    assert_eq!(tree.get(&key(probe)).unwrap(), Some(rid(probe)));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    tree.check_integrity().unwrap();
    assert_eq!(tree.iter().unwrap().count(), 2500);
}

#[test]
fn concurrent_deletes_leave_a_consistent_tree() {
    let dir = TempDir::new().unwrap();
    let tree = open_tree(&dir, 128);

    for v in 0..4000i64 {
        assert!(tree.insert(&key(v), rid(v)).unwrap());
    }

    // Four threads delete disjoint residue classes.
    let handles: Vec<_> = (0..4i64)
        .map(|t| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                for v in 0..4000i64 {
                    if v % 8 == t {
                        tree.remove(&key(v)).unwrap();
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    tree.check_integrity().unwrap();
    let survivors: Vec<i64> = tree
        .iter()
        .unwrap()
        .map(|(k, _)| i64::from_be_bytes(k.try_into().unwrap()))
        .collect();
    let expected: Vec<i64> = (0..4000i64).filter(|v| v % 8 >= 4).collect();
    assert_eq!(survivors, expected);
}
