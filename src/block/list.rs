//! The current partition of the resource into blocks.
//!
//! Shared by the downloader, all workers, and the monitor for the duration
//! of a run. Workers touch only their own block; the monitor performs
//! structural mutations (splits) under one coarse mutex so that concurrent
//! rebalancing attempts can never claim the same idle slot nor interleave
//! their multi-field updates.

use std::sync::{Arc, Mutex};

use super::{Block, BlockState};

/// Fixed set of block slots. Indices are assigned once at startup and only
/// ever repurposed, never re-minted.
#[derive(Debug)]
pub struct BlockList {
    blocks: Vec<Arc<Block>>,
    // Guards the whole split decision: slot selection plus the four-field
    // range/flag update across source and target.
    structural: Mutex<()>,
}

impl BlockList {
    /// Partition `[0, total_size - 1]` into `count` near-equal inclusive
    /// ranges. The last block absorbs the division remainder and carries the
    /// final flag. A zero-length resource yields a single already-done block.
    pub fn plan(total_size: u64, count: usize) -> Self {
        if total_size == 0 {
            let block = Block::new(0, 0, 0, true);
            block.set_state(BlockState::Done);
            return Self::from_blocks(vec![block]);
        }

        let count = (count.max(1) as u64).min(total_size) as usize;
        let piece = total_size / count as u64;
        let mut blocks = Vec::with_capacity(count);
        for i in 0..count {
            let begin = i as u64 * piece;
            let last = i == count - 1;
            let end = if last { total_size - 1 } else { begin + piece - 1 };
            blocks.push(Block::new(i, begin, end, last));
        }
        Self::from_blocks(blocks)
    }

    pub(crate) fn from_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: blocks.into_iter().map(Arc::new).collect(),
            structural: Mutex::new(()),
        }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn get(&self, index: usize) -> &Arc<Block> {
        &self.blocks[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Block>> {
        self.blocks.iter()
    }

    /// True iff every block has finished its range.
    pub fn is_all_done(&self) -> bool {
        self.blocks.iter().all(|b| b.is_done())
    }

    /// Lowest-index slot whose prior range is finished, if any. A slot is
    /// repurposable when it is done, or when it sits idle with nothing left
    /// to transfer; an idle slot still holding pending work (e.g. planned
    /// but not yet picked up by a worker) is never a split target. The
    /// ascending scan keeps slot reuse deterministic and reproducible.
    pub fn available_slot(&self) -> Option<usize> {
        self.blocks.iter().position(|b| match b.state() {
            BlockState::Done => true,
            BlockState::Idle => b.remaining() == 0,
            BlockState::Active | BlockState::Writing => false,
        })
    }

    /// Halve `source`'s remaining range into `target` under the structural
    /// lock. Returns false without mutating anything when the remainder past
    /// the midpoint is at most `min_split` bytes (too small to parallelize).
    ///
    /// Callers that also need to pick the target slot should use
    /// [`BlockList::rebalance`], which performs selection and split inside
    /// one critical section.
    pub fn split(&self, source: usize, target: usize, min_split: u64) -> bool {
        let _guard = self.structural.lock().unwrap();
        self.split_locked(source, target, min_split)
    }

    /// Find an idle slot and split `source` onto it. Returns the repurposed
    /// slot index, armed and ready for a fresh worker.
    pub fn rebalance(&self, source: usize, min_split: u64) -> Option<usize> {
        let _guard = self.structural.lock().unwrap();
        if self.blocks[source].is_done() {
            return None;
        }
        let target = self.available_slot()?;
        if target == source {
            return None;
        }
        self.split_locked(source, target, min_split).then_some(target)
    }

    fn split_locked(&self, source: usize, target: usize, min_split: u64) -> bool {
        let src = &self.blocks[source];
        let dst = &self.blocks[target];

        let end = src.end();
        let middle = (src.begin() + end) / 2;
        if end.saturating_sub(middle) <= min_split {
            return false;
        }

        dst.store_range(middle + 1, end);
        dst.store_is_final(src.is_final());
        dst.rearm();
        src.store_end(middle);
        src.store_is_final(false);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    /// Collect (begin, end) of every non-done block, sorted by begin.
    fn remaining_ranges(list: &BlockList) -> Vec<(u64, u64)> {
        let mut ranges: Vec<(u64, u64)> = list
            .iter()
            .filter(|b| !b.is_done() && b.remaining() > 0)
            .map(|b| (b.begin(), b.end()))
            .collect();
        ranges.sort_unstable();
        ranges
    }

    /// Assert the non-done ranges are pairwise disjoint and cover exactly
    /// `[0, total - 1]`.
    fn assert_covers_exactly(list: &BlockList, total: u64) {
        let ranges = remaining_ranges(list);
        let mut next = 0u64;
        for (begin, end) in &ranges {
            assert_eq!(*begin, next, "gap or overlap before {begin}");
            assert!(end >= begin);
            next = end + 1;
        }
        assert_eq!(next, total, "union must cover the full resource");
    }

    /// Assert ranges are sorted and pairwise disjoint (remainder may have
    /// gaps where finished blocks used to be).
    fn assert_disjoint(ranges: &[(u64, u64)]) {
        for pair in ranges.windows(2) {
            assert!(pair[0].1 < pair[1].0, "ranges overlap: {pair:?}");
        }
    }

    fn remaining_total(list: &BlockList) -> u64 {
        remaining_ranges(list).iter().map(|(b, e)| e + 1 - b).sum()
    }

    #[test]
    fn plan_matches_worked_example() {
        let list = BlockList::plan(1_000_000, 4);
        let ranges: Vec<(u64, u64)> = list.iter().map(|b| (b.begin(), b.end())).collect();
        assert_eq!(
            ranges,
            vec![
                (0, 249_999),
                (250_000, 499_999),
                (500_000, 749_999),
                (750_000, 999_999),
            ]
        );
        let finals: Vec<usize> = list
            .iter()
            .filter(|b| b.is_final())
            .map(|b| b.index())
            .collect();
        assert_eq!(finals, vec![3]);
    }

    #[test]
    fn plan_remainder_goes_to_final_block() {
        let list = BlockList::plan(10, 4);
        assert_covers_exactly(&list, 10);
        assert!(list.get(3).is_final());
        assert_eq!(list.get(3).end(), 9);
    }

    #[test]
    fn plan_clamps_tiny_resources() {
        let list = BlockList::plan(3, 16);
        assert_eq!(list.len(), 3);
        assert_covers_exactly(&list, 3);
    }

    #[test]
    fn plan_zero_length_is_immediately_done() {
        let list = BlockList::plan(0, 4);
        assert_eq!(list.len(), 1);
        assert!(list.is_all_done());
    }

    #[test]
    fn is_all_done_requires_every_block() {
        let list = BlockList::plan(1000, 4);
        assert!(!list.is_all_done());
        for block in list.iter().take(3) {
            block.mark_done();
        }
        assert!(!list.is_all_done());
        list.get(3).mark_done();
        assert!(list.is_all_done());
    }

    #[test]
    fn available_slot_scans_ascending() {
        let list = BlockList::plan(1000, 4);
        for block in list.iter() {
            block.set_state(BlockState::Active);
        }
        assert_eq!(list.available_slot(), None);
        list.get(2).mark_done();
        list.get(1).mark_done();
        assert_eq!(list.available_slot(), Some(1));
    }

    #[test]
    fn idle_slot_with_pending_work_is_never_available() {
        // A freshly planned list is all idle, but every slot still holds its
        // full range; none may be claimed as a split target.
        let list = BlockList::plan(1_000_000, 4);
        assert_eq!(list.available_slot(), None);
        assert_eq!(list.rebalance(3, 1024), None);

        // Exhausting a range makes its idle slot repurposable.
        let block = list.get(2);
        block.advance(block.remaining());
        assert_eq!(list.available_slot(), Some(2));
        assert_eq!(list.rebalance(3, 1024), Some(2));
    }

    #[test]
    fn split_small_remainder_is_a_no_op() {
        let list = BlockList::plan(1000, 4);
        list.get(3).mark_done();
        let before: Vec<(u64, u64)> = list.iter().map(|b| (b.begin(), b.end())).collect();
        assert!(!list.split(0, 3, 512));
        // Idempotent: repeat attempts change nothing either.
        assert!(!list.split(0, 3, 512));
        let after: Vec<(u64, u64)> = list.iter().map(|b| (b.begin(), b.end())).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn split_halves_range_and_keeps_union() {
        // Worked example: block 0 stalls while block 3 is done.
        let list = BlockList::plan(1_000_000, 4);
        list.get(3).mark_done();
        assert!(list.split(0, 3, 1024));

        assert_eq!((list.get(0).begin(), list.get(0).end()), (0, 124_999));
        assert_eq!((list.get(3).begin(), list.get(3).end()), (125_000, 249_999));
        assert!(!list.get(0).is_final());
        assert!(!list.get(3).is_final());
        assert_eq!(list.get(3).state(), BlockState::Active);

        // Blocks 1 and 2 untouched; union of remaining work unchanged.
        let ranges = remaining_ranges(&list);
        assert_eq!(
            ranges,
            vec![
                (0, 124_999),
                (125_000, 249_999),
                (250_000, 499_999),
                (500_000, 749_999),
            ]
        );
    }

    #[test]
    fn split_transfers_final_flag_with_the_tail() {
        let list = BlockList::plan(1_000_000, 4);
        list.get(0).mark_done();
        assert!(list.split(3, 0, 1024));
        assert!(!list.get(3).is_final(), "source loses the flag");
        assert!(list.get(0).is_final(), "target now covers the tail");
        let finals = list.iter().filter(|b| b.is_final()).count();
        assert_eq!(finals, 1);
    }

    #[test]
    fn rebalance_claims_lowest_idle_slot() {
        let list = BlockList::plan(1_000_000, 4);
        list.get(1).mark_done();
        list.get(2).mark_done();
        assert_eq!(list.rebalance(0, 1024), Some(1));
        assert_eq!(list.rebalance(3, 1024), Some(2));
        assert_eq!(list.rebalance(0, 1024), None, "no idle slot left");
    }

    #[test]
    fn rebalance_refuses_done_source_and_self_target() {
        let list = BlockList::plan(1_000_000, 2);
        list.get(0).mark_done();
        assert_eq!(list.rebalance(0, 1024), None);
        // Only idle slot is the source itself.
        let list = BlockList::plan(1_000_000, 1);
        assert_eq!(list.rebalance(0, 1024), None);
    }

    #[test]
    fn concurrent_rebalances_never_share_a_slot() {
        // Fire simultaneous stall reactions; every claimed slot must be
        // unique and the remaining ranges must stay pairwise disjoint.
        for _ in 0..50 {
            let list = Arc::new(BlockList::plan(64 * 1024 * 1024, 8));
            for i in [1, 3, 5, 7] {
                let block = list.get(i);
                block.advance(block.remaining());
                block.mark_done();
            }
            let before = remaining_total(&list);

            let sources = [0usize, 2, 4, 6];
            let handles: Vec<_> = sources
                .iter()
                .map(|&src| {
                    let list = Arc::clone(&list);
                    std::thread::spawn(move || list.rebalance(src, 1024))
                })
                .collect();
            let claimed: Vec<usize> = handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect();

            let unique: HashSet<usize> = claimed.iter().copied().collect();
            assert_eq!(unique.len(), claimed.len(), "slot claimed twice");
            assert_eq!(claimed.len(), 4, "four idle slots were available");
            assert_disjoint(&remaining_ranges(&list));
            assert_eq!(remaining_total(&list), before);
        }
    }

    #[test]
    fn random_split_sequences_preserve_coverage() {
        // Deterministic xorshift so failures are reproducible.
        let mut seed = 0x9e37_79b9_7f4a_7c15u64;
        let mut next = move || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for round in 0..20 {
            let total = 1_000_000 + round * 77_777;
            let list = BlockList::plan(total, 8);
            // Finish a few blocks up front so splits have slots to claim.
            for i in 0..8 {
                if next() % 3 == 0 {
                    let block = list.get(i);
                    block.advance(block.remaining());
                    block.mark_done();
                }
            }
            let expected_len = remaining_total(&list);

            for _ in 0..64 {
                let src = (next() % 8) as usize;
                if list.get(src).is_done() {
                    continue;
                }
                let _ = list.rebalance(src, 4096);
                // Splits move work between slots but never change the total.
                assert_eq!(remaining_total(&list), expected_len);
                assert_disjoint(&remaining_ranges(&list));
            }
        }
    }
}
