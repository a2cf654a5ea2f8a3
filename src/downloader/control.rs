//! Pause/resume control for a running transfer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared pause switch handed out by the downloader.
///
/// Pausing halts monitor intervention (no stall detection, no splitting, no
/// checkpointing) but does not cancel in-flight worker I/O; workers keep
/// running until they block, error, or finish naturally.
#[derive(Debug, Clone, Default)]
pub struct TransferControl {
    paused: Arc<AtomicBool>,
}

impl TransferControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
        tracing::info!("transfer paused");
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
        tracing::info!("transfer resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }
}
