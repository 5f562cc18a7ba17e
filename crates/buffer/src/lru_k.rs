use crate::Replacer;
use ahash::RandomState;
use common::FrameId;
use hashbrown::{HashMap, HashSet};
use std::collections::VecDeque;

/// LRU-K: evicts the candidate whose k-th most recent access is oldest.
///
/// A frame with fewer than `k` recorded accesses has an infinite backward
/// k-distance and is always preferred; among such frames the least recently
/// used one goes first. Accesses are recorded when the pool pins a frame.
#[derive(Debug)]
pub struct LruKReplacer {
    k: usize,
    clock: u64,
    history: HashMap<FrameId, VecDeque<u64>, RandomState>,
    candidates: HashSet<FrameId, RandomState>,
}

impl LruKReplacer {
    pub fn new(k: usize) -> Self {
        assert!(k >= 1, "LRU-K needs k >= 1");
        Self {
            k,
            clock: 0,
            history: HashMap::default(),
            candidates: HashSet::default(),
        }
    }

    fn last_access(history: &VecDeque<u64>) -> u64 {
        history.back().copied().unwrap_or(0)
    }

    fn kth_most_recent(&self, history: &VecDeque<u64>) -> Option<u64> {
        if history.len() < self.k {
            None
        } else {
            Some(history[history.len() - self.k])
        }
    }
}

impl Replacer for LruKReplacer {
    fn pin(&mut self, frame: FrameId) {
        self.clock += 1;
        let history = self.history.entry(frame).or_default();
        history.push_back(self.clock);
        while history.len() > self.k {
            history.pop_front();
        }
        self.candidates.remove(&frame);
    }

    fn unpin(&mut self, frame: FrameId) {
        self.history.entry(frame).or_default();
        self.candidates.insert(frame);
    }

    fn victim(&mut self) -> Option<FrameId> {
        let mut infinite: Option<(u64, FrameId)> = None;
        let mut finite: Option<(u64, FrameId)> = None;
        for &frame in &self.candidates {
            let history = &self.history[&frame];
            match self.kth_most_recent(history) {
                None => {
                    let key = (Self::last_access(history), frame);
                    if infinite.map_or(true, |best| key < best) {
                        infinite = Some(key);
                    }
                }
                Some(kth) => {
                    let key = (kth, frame);
                    if finite.map_or(true, |best| key < best) {
                        finite = Some(key);
                    }
                }
            }
        }
        let (_, frame) = infinite.or(finite)?;
        self.candidates.remove(&frame);
        self.history.remove(&frame);
        Some(frame)
    }

    fn size(&self) -> usize {
        self.candidates.len()
    }
}
