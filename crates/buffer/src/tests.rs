use crate::{ClockReplacer, LruKReplacer, LruReplacer, Replacer};

#[test]
fn lru_evicts_in_unpin_order() {
    let mut lru = LruReplacer::new();
    for frame in [1, 2, 3] {
        lru.unpin(frame);
    }
    assert_eq!(lru.size(), 3);
    assert_eq!(lru.victim(), Some(1));
    assert_eq!(lru.victim(), Some(2));
    assert_eq!(lru.victim(), Some(3));
    assert_eq!(lru.victim(), None);
    assert_eq!(lru.size(), 0);
}

#[test]
fn lru_pin_removes_candidates() {
    let mut lru = LruReplacer::new();
    lru.unpin(1);
    lru.unpin(2);
    lru.pin(1);
    assert_eq!(lru.size(), 1);
    assert_eq!(lru.victim(), Some(2));
    assert_eq!(lru.victim(), None);
}

#[test]
fn lru_duplicate_unpin_keeps_position() {
    let mut lru = LruReplacer::new();
    lru.unpin(1);
    lru.unpin(2);
    lru.unpin(1);
    assert_eq!(lru.size(), 2);
    assert_eq!(lru.victim(), Some(1));
}

#[test]
fn clock_gives_second_chances() {
    let mut clock = ClockReplacer::new();
    for frame in [1, 2, 3] {
        clock.unpin(frame);
    }
    // All reference bits set: the hand sweeps once, clearing them, then
    // evicts in ring order.
    assert_eq!(clock.victim(), Some(1));
    assert_eq!(clock.victim(), Some(2));
    assert_eq!(clock.victim(), Some(3));
    assert_eq!(clock.victim(), None);
}

#[test]
fn clock_skips_re_referenced_frames() {
    let mut clock = ClockReplacer::new();
    clock.unpin(1);
    clock.unpin(2);
    assert_eq!(clock.victim(), Some(1));
    // Re-admit 1; its fresh reference bit protects it while 2's is clear.
    clock.unpin(1);
    assert_eq!(clock.victim(), Some(2));
    assert_eq!(clock.victim(), Some(1));
}

#[test]
fn clock_pin_removes_from_ring() {
    let mut clock = ClockReplacer::new();
    for frame in [1, 2, 3] {
        clock.unpin(frame);
    }
    clock.pin(2);
    assert_eq!(clock.size(), 2);
    assert_eq!(clock.victim(), Some(1));
    assert_eq!(clock.victim(), Some(3));
    assert_eq!(clock.victim(), None);
}

#[test]
fn lru_k_prefers_under_sampled_frames() {
    let mut lru_k = LruKReplacer::new(2);
    // Frames 1..=5 each accessed once; frame 1 then accessed again, giving
    // it a full history of two while the rest stay at infinite distance.
    for frame in 1..=5 {
        lru_k.pin(frame);
    }
    lru_k.pin(1);
    for frame in 1..=5 {
        lru_k.unpin(frame);
    }
    assert_eq!(lru_k.size(), 5);

    // Infinite-distance frames leave first, least recently used first.
    assert_eq!(lru_k.victim(), Some(2));
    assert_eq!(lru_k.victim(), Some(3));
    assert_eq!(lru_k.victim(), Some(4));
    assert_eq!(lru_k.victim(), Some(5));
    // Only the fully sampled frame remains.
    assert_eq!(lru_k.victim(), Some(1));
    assert_eq!(lru_k.victim(), None);
}

#[test]
fn lru_k_orders_by_kth_most_recent_access() {
    let mut lru_k = LruKReplacer::new(2);
    // Access pattern 1 1 2 2 1: the second most recent access of frame 1
    // is ts2 and of frame 2 is ts3, so frame 1 carries the older
    // k-distance.
    lru_k.pin(1); // ts1
    lru_k.pin(1); // ts2
    lru_k.pin(2); // ts3
    lru_k.pin(2); // ts4
    lru_k.pin(1); // ts5 -> history of 1 is [ts2, ts5]
    lru_k.unpin(1);
    lru_k.unpin(2);

    // kth most recent: frame 1 -> ts2, frame 2 -> ts3. Frame 1 goes first.
    assert_eq!(lru_k.victim(), Some(1));
    assert_eq!(lru_k.victim(), Some(2));
}

#[test]
fn lru_k_pin_shields_a_frame() {
    let mut lru_k = LruKReplacer::new(3);
    lru_k.pin(7);
    lru_k.unpin(7);
    lru_k.pin(7);
    assert_eq!(lru_k.size(), 0);
    assert_eq!(lru_k.victim(), None);
    lru_k.unpin(7);
    assert_eq!(lru_k.victim(), Some(7));
}
