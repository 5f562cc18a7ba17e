use crate::page::{TablePageMut, TablePageRef, SLOT_SIZE, TABLE_PAGE_HEADER_SIZE};
use common::{Config, PageBuf, PageId, RecordId, TxnId, PAGE_SIZE};
use proptest::prelude::*;
use std::sync::Arc;
use storage::DiskManager;
use tempfile::TempDir;
use wal::{LogManager, LogRecord, LogRecordType, TxnContext};

fn test_log(dir: &TempDir) -> Arc<LogManager> {
    let config = Config::builder()
        .data_dir(dir.path().to_path_buf())
        .build();
    let disk = Arc::new(
        DiskManager::open(&config.heap_file(), &config.log_file()).unwrap(),
    );
    Arc::new(LogManager::new(&config, disk))
}

fn fresh_page(buf: &mut PageBuf) {
    TablePageMut::new(buf).init(PageId(1), PageId::INVALID);
}

#[test]
fn init_lays_out_an_empty_page() {
    let mut buf = [0u8; PAGE_SIZE];
    fresh_page(&mut buf);
    let view = TablePageRef::new(&buf);
    assert_eq!(view.page_id(), PageId(1));
    assert_eq!(view.prev_page_id(), PageId::INVALID);
    assert_eq!(view.next_page_id(), PageId::INVALID);
    assert_eq!(view.tuple_count(), 0);
    assert_eq!(
        view.free_space_remaining(),
        (PAGE_SIZE - TABLE_PAGE_HEADER_SIZE) as u32
    );
}

#[test]
fn insert_then_get_round_trips() {
    let dir = TempDir::new().unwrap();
    let log = test_log(&dir);
    let mut txn = TxnContext::new(TxnId(1));
    let mut buf = [0u8; PAGE_SIZE];
    fresh_page(&mut buf);

    let rid = TablePageMut::new(&mut buf)
        .insert(b"hello world", &mut txn, &log)
        .unwrap();
    assert_eq!(rid, RecordId::new(PageId(1), 0));

    let view = TablePageRef::new(&buf);
    assert_eq!(view.tuple_at(0).unwrap(), b"hello world");
    assert_eq!(view.tuple_count(), 1);
}

#[test]
fn insert_fails_when_full() {
    let dir = TempDir::new().unwrap();
    let log = test_log(&dir);
    let mut txn = TxnContext::new(TxnId(1));
    let mut buf = [0u8; PAGE_SIZE];
    fresh_page(&mut buf);

    let big = vec![7u8; 2000];
    let mut page = TablePageMut::new(&mut buf);
    assert!(page.insert(&big, &mut txn, &log).is_some());
    assert!(page.insert(&big, &mut txn, &log).is_some());
    // 24 header + 2 slots + 4000 bytes leaves no room for a third.
    assert!(page.insert(&big, &mut txn, &log).is_none());
}

#[test]
fn mark_delete_is_a_tombstone_apply_delete_compacts() {
    let dir = TempDir::new().unwrap();
    let log = test_log(&dir);
    let mut txn = TxnContext::new(TxnId(1));
    let mut buf = [0u8; PAGE_SIZE];
    fresh_page(&mut buf);

    let sizes = [100usize, 200, 300];
    let mut rids = Vec::new();
    for (i, size) in sizes.iter().enumerate() {
        let tuple = vec![i as u8 + 1; *size];
        rids.push(
            TablePageMut::new(&mut buf)
                .insert(&tuple, &mut txn, &log)
                .unwrap(),
        );
    }
    let free_before = TablePageRef::new(&buf).free_space_remaining();
    let third_offset_before = {
        let view = TablePageRef::new(&buf);
        // The 300-byte tuple sits lowest in the page.
        view.free_space_pointer()
    };

    // Tombstone only: space accounting unchanged, reads fail.
    assert!(TablePageMut::new(&mut buf).mark_delete(rids[1], &mut txn, &log));
    assert_eq!(TablePageRef::new(&buf).free_space_remaining(), free_before);
    assert!(TablePageRef::new(&buf).tuple_at(1).is_none());

    // Double tombstone is refused.
    assert!(!TablePageMut::new(&mut buf).mark_delete(rids[1], &mut txn, &log));

    // Physical removal reclaims exactly the 200 bytes and shifts the
    // 300-byte tuple up by the same amount, keeping its rid.
    TablePageMut::new(&mut buf)
        .apply_delete(rids[1], &mut txn, &log)
        .unwrap();
    let view = TablePageRef::new(&buf);
    assert_eq!(view.free_space_remaining(), free_before + 200);
    assert_eq!(view.free_space_pointer(), third_offset_before + 200);
    let third = view.tuple_at(rids[2].slot).unwrap();
    assert_eq!(third.len(), 300);
    assert!(third.iter().all(|b| *b == 3));
    let first = view.tuple_at(rids[0].slot).unwrap();
    assert!(first.iter().all(|b| *b == 1));
}

#[test]
fn reclaimed_slots_are_reused() {
    let dir = TempDir::new().unwrap();
    let log = test_log(&dir);
    let mut txn = TxnContext::new(TxnId(1));
    let mut buf = [0u8; PAGE_SIZE];
    fresh_page(&mut buf);

    let a = TablePageMut::new(&mut buf).insert(b"aaa", &mut txn, &log).unwrap();
    let _b = TablePageMut::new(&mut buf).insert(b"bbb", &mut txn, &log).unwrap();
    assert!(TablePageMut::new(&mut buf).mark_delete(a, &mut txn, &log));
    TablePageMut::new(&mut buf)
        .apply_delete(a, &mut txn, &log)
        .unwrap();

    let c = TablePageMut::new(&mut buf).insert(b"ccc", &mut txn, &log).unwrap();
    assert_eq!(c.slot, a.slot, "first zero-size slot is reused");
    assert_eq!(TablePageRef::new(&buf).tuple_count(), 2);
}

#[test]
fn rollback_delete_restores_visibility() {
    let dir = TempDir::new().unwrap();
    let log = test_log(&dir);
    let mut txn = TxnContext::new(TxnId(1));
    let mut buf = [0u8; PAGE_SIZE];
    fresh_page(&mut buf);

    let rid = TablePageMut::new(&mut buf)
        .insert(b"undo me", &mut txn, &log)
        .unwrap();
    assert!(TablePageMut::new(&mut buf).mark_delete(rid, &mut txn, &log));
    assert!(TablePageRef::new(&buf).tuple_at(rid.slot).is_none());

    assert!(TablePageMut::new(&mut buf).rollback_delete(rid, &mut txn, &log));
    assert_eq!(TablePageRef::new(&buf).tuple_at(rid.slot).unwrap(), b"undo me");

    // No tombstone, nothing to roll back.
    assert!(!TablePageMut::new(&mut buf).rollback_delete(rid, &mut txn, &log));
}

#[test]
fn update_in_place_needs_matching_size() {
    let dir = TempDir::new().unwrap();
    let log = test_log(&dir);
    let mut txn = TxnContext::new(TxnId(1));
    let mut buf = [0u8; PAGE_SIZE];
    fresh_page(&mut buf);

    let rid = TablePageMut::new(&mut buf)
        .insert(b"v1-data", &mut txn, &log)
        .unwrap();

    let old = TablePageMut::new(&mut buf)
        .update(b"v2-data", rid, &mut txn, &log)
        .unwrap();
    assert_eq!(old.unwrap(), b"v1-data");
    assert_eq!(TablePageRef::new(&buf).tuple_at(rid.slot).unwrap(), b"v2-data");

    // Length change is the caller's problem (delete and reinsert).
    let outcome = TablePageMut::new(&mut buf)
        .update(b"longer than before", rid, &mut txn, &log)
        .unwrap();
    assert!(outcome.is_none());
}

#[test]
fn rid_iteration_skips_tombstones() {
    let dir = TempDir::new().unwrap();
    let log = test_log(&dir);
    let mut txn = TxnContext::new(TxnId(1));
    let mut buf = [0u8; PAGE_SIZE];
    fresh_page(&mut buf);

    let rids: Vec<RecordId> = (0..4)
        .map(|i| {
            TablePageMut::new(&mut buf)
                .insert(&[i as u8 + 1; 16], &mut txn, &log)
                .unwrap()
        })
        .collect();
    assert!(TablePageMut::new(&mut buf).mark_delete(rids[0], &mut txn, &log));
    assert!(TablePageMut::new(&mut buf).mark_delete(rids[2], &mut txn, &log));

    let view = TablePageRef::new(&buf);
    let mut seen = Vec::new();
    let mut cursor = view.first_rid();
    while let Some(rid) = cursor {
        seen.push(rid.slot);
        cursor = view.next_rid(rid);
    }
    assert_eq!(seen, vec![1, 3]);
}

#[test]
fn mutations_append_wal_records_and_stamp_the_lsn() {
    let dir = TempDir::new().unwrap();
    let log = test_log(&dir);
    let mut txn = TxnContext::new(TxnId(9));
    let mut buf = [0u8; PAGE_SIZE];
    fresh_page(&mut buf);

    let rid = TablePageMut::new(&mut buf)
        .insert(b"logged", &mut txn, &log)
        .unwrap();
    assert!(TablePageMut::new(&mut buf).mark_delete(rid, &mut txn, &log));
    TablePageMut::new(&mut buf)
        .apply_delete(rid, &mut txn, &log)
        .unwrap();

    assert_eq!(TablePageRef::new(&buf).lsn(), txn.last_lsn);

    log.flush_all().unwrap();
    let image = {
        let dir_log = dir.path().join("wal.log");
        std::fs::read(dir_log).unwrap()
    };
    let records = LogRecord::decode_all(&image).unwrap();
    let kinds: Vec<LogRecordType> = records.iter().map(|r| r.record_type).collect();
    assert_eq!(
        kinds,
        vec![
            LogRecordType::Insert,
            LogRecordType::MarkDelete,
            LogRecordType::ApplyDelete
        ]
    );
    assert_eq!(records[1].prev_lsn, records[0].lsn);
    assert_eq!(records[2].prev_lsn, records[1].lsn);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Invariant: live slot ranges stay inside the page and never overlap,
    /// across arbitrary insert / mark / apply sequences.
    #[test]
    fn slot_ranges_never_overlap(ops in proptest::collection::vec((0u8..3, 1usize..400), 1..60)) {
        let dir = TempDir::new().unwrap();
        let log = test_log(&dir);
        let mut txn = TxnContext::new(TxnId(1));
        let mut buf = [0u8; PAGE_SIZE];
        fresh_page(&mut buf);

        let mut live: Vec<RecordId> = Vec::new();
        for (op, size) in ops {
            match op {
                0 => {
                    if let Some(rid) =
                        TablePageMut::new(&mut buf).insert(&vec![0xAB; size], &mut txn, &log)
                    {
                        live.push(rid);
                    }
                }
                1 => {
                    if let Some(rid) = live.first().copied() {
                        prop_assert!(TablePageMut::new(&mut buf).mark_delete(rid, &mut txn, &log));
                        TablePageMut::new(&mut buf).apply_delete(rid, &mut txn, &log).unwrap();
                        live.remove(0);
                    }
                }
                _ => {
                    if let Some(rid) = live.last().copied() {
                        prop_assert!(TablePageMut::new(&mut buf).mark_delete(rid, &mut txn, &log));
                        TablePageMut::new(&mut buf).apply_delete(rid, &mut txn, &log).unwrap();
                        live.pop();
                    }
                }
            }

            // Check the layout after every step.
            let view = TablePageRef::new(&buf);
            let mut ranges: Vec<(u32, u32)> = Vec::new();
            for rid in &live {
                let data = view.tuple_at(rid.slot);
                prop_assert!(data.is_some());
            }
            let mut cursor = view.first_rid();
            while let Some(rid) = cursor {
                let tuple = view.tuple_at(rid.slot).unwrap();
                let len = tuple.len() as u32;
                prop_assert!(len > 0);
                cursor = view.next_rid(rid);
                ranges.push((rid.slot, len));
            }
            prop_assert_eq!(ranges.len(), live.len());
            prop_assert!(view.free_space_pointer() as usize <= PAGE_SIZE);
            prop_assert!(
                view.free_space_pointer() as usize
                    >= TABLE_PAGE_HEADER_SIZE + SLOT_SIZE * view.tuple_count() as usize
            );
        }
    }
}
