//! Block model: one contended, independently-progressing unit of transfer
//! work over a byte range, and the shared list partitioning the resource.

mod list;

pub use list::BlockList;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::speed::SpeedSampler;

/// Lifecycle of a block's slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockState {
    /// No worker attached. The slot may be repurposed by a split once its
    /// range is exhausted; with work still pending it is merely unclaimed.
    Idle = 0,
    /// A worker is streaming this range.
    Active = 1,
    /// The worker is flushing a chunk to disk.
    Writing = 2,
    /// The range has been fully transferred.
    Done = 3,
}

impl BlockState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => BlockState::Active,
            2 => BlockState::Writing,
            3 => BlockState::Done,
            _ => BlockState::Idle,
        }
    }
}

/// One byte range of the resource, currently assigned to at most one worker.
///
/// `begin` and `end` are inclusive offsets of the *remaining* work and are
/// mutated concurrently: the owning worker advances `begin` as chunks land on
/// disk, and the monitor may shrink `end` during a split. Single fields use
/// atomic access for cross-task visibility; the multi-field split update is
/// only ever performed under [`BlockList`]'s structural lock.
#[derive(Debug)]
pub struct Block {
    index: usize,
    begin: AtomicU64,
    end: AtomicU64,
    is_final: AtomicBool,
    state: AtomicU8,
    speed: AtomicU64,
    sampler: SpeedSampler,
    wait_to_write: AtomicBool,
    // Cancellation handle for the active transport connection, if any.
    // Cancelling it aborts the worker's current attempt; the worker's own
    // retry policy takes over from there.
    transport: Mutex<Option<CancellationToken>>,
}

impl Block {
    pub(crate) fn new(index: usize, begin: u64, end: u64, is_final: bool) -> Self {
        Self {
            index,
            begin: AtomicU64::new(begin),
            end: AtomicU64::new(end),
            is_final: AtomicBool::new(is_final),
            state: AtomicU8::new(BlockState::Idle as u8),
            speed: AtomicU64::new(0),
            sampler: SpeedSampler::new(),
            wait_to_write: AtomicBool::new(false),
            transport: Mutex::new(None),
        }
    }

    /// Rebuild a block from persisted bookkeeping. Transient fields (state,
    /// transport handle, write guard, speed) start cleared.
    pub(crate) fn restore(index: usize, begin: u64, end: u64, is_final: bool, done: bool) -> Self {
        let block = Self::new(index, begin, end, is_final);
        if done {
            block.state.store(BlockState::Done as u8, Ordering::Release);
        }
        block
    }

    /// Stable slot index; never re-minted after startup.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn begin(&self) -> u64 {
        self.begin.load(Ordering::Acquire)
    }

    pub fn end(&self) -> u64 {
        self.end.load(Ordering::Acquire)
    }

    /// Whether this block covers the tail of the resource. Exactly one block
    /// in a list has this set, and it is always the one with the highest
    /// range.
    pub fn is_final(&self) -> bool {
        self.is_final.load(Ordering::Acquire)
    }

    pub fn state(&self) -> BlockState {
        BlockState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: BlockState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn is_done(&self) -> bool {
        self.state() == BlockState::Done
    }

    /// Bytes left to transfer (0 once `begin` has moved past `end`).
    pub fn remaining(&self) -> u64 {
        let begin = self.begin();
        let end = self.end();
        (end + 1).saturating_sub(begin)
    }

    /// Advance `begin` after `bytes` were written to disk.
    pub(crate) fn advance(&self, bytes: u64) {
        self.begin.fetch_add(bytes, Ordering::AcqRel);
    }

    pub(crate) fn mark_done(&self) {
        self.clear_transport();
        self.set_state(BlockState::Done);
    }

    /// Last sampled per-second rate for this block. Up to one tick stale;
    /// feeds trend detection only.
    pub fn speed(&self) -> u64 {
        self.speed.load(Ordering::Relaxed)
    }

    /// Sample this block's own rate counter into `speed`.
    pub(crate) fn sample_speed(&self) {
        self.speed.store(self.sampler.per_second(), Ordering::Relaxed);
    }

    pub(crate) fn sampler(&self) -> &SpeedSampler {
        &self.sampler
    }

    /// True while the worker is flushing a chunk to disk. The monitor never
    /// force-closes a block in this window.
    pub fn wait_to_write(&self) -> bool {
        self.wait_to_write.load(Ordering::Acquire)
    }

    pub(crate) fn begin_write(&self) {
        self.wait_to_write.store(true, Ordering::Release);
        self.set_state(BlockState::Writing);
    }

    pub(crate) fn end_write(&self) {
        self.wait_to_write.store(false, Ordering::Release);
        self.set_state(BlockState::Active);
    }

    /// Register a fresh cancellation token for the connection the worker is
    /// about to open, replacing any previous one.
    pub(crate) fn arm_transport(&self) -> CancellationToken {
        let token = CancellationToken::new();
        *self.transport.lock().unwrap() = Some(token.clone());
        token
    }

    pub(crate) fn clear_transport(&self) {
        self.transport.lock().unwrap().take();
    }

    /// Force-close the active connection, if any. Used by the monitor's
    /// liveness reset; the worker retries on its own.
    pub fn cancel_transport(&self) {
        if let Some(token) = self.transport.lock().unwrap().as_ref() {
            token.cancel();
        }
    }

    // Used by the split protocol; callers must hold the structural lock.
    pub(crate) fn store_range(&self, begin: u64, end: u64) {
        self.begin.store(begin, Ordering::Release);
        self.end.store(end, Ordering::Release);
    }

    pub(crate) fn store_end(&self, end: u64) {
        self.end.store(end, Ordering::Release);
    }

    pub(crate) fn store_is_final(&self, is_final: bool) {
        self.is_final.store(is_final, Ordering::Release);
    }

    /// Clear transient per-slot state when the slot is repurposed.
    pub(crate) fn rearm(&self) {
        self.speed.store(0, Ordering::Relaxed);
        self.sampler.reset();
        self.wait_to_write.store(false, Ordering::Release);
        self.set_state(BlockState::Active);
    }
}
