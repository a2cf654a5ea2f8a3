//! Downloader orchestration: owns the configuration, block list, aggregate
//! stats, and shutdown plumbing; spawns one worker per block plus the
//! monitor; reports completion or the first fatal error.

mod control;
mod precheck;

pub use control::TransferControl;
pub use precheck::{check_save_path, FileExists};

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::block::BlockList;
use crate::breakpoint::Breakpoint;
use crate::config::TransferConfig;
use crate::monitor;
use crate::speed::StatusStat;
use crate::storage::RangeWriter;
use crate::transport::Transport;
use crate::worker::Worker;

/// Everything the workers and the monitor share for the duration of a run.
pub(crate) struct Shared<T: Transport> {
    pub(crate) config: TransferConfig,
    pub(crate) total_size: u64,
    pub(crate) transport: T,
    pub(crate) writer: RangeWriter,
    pub(crate) blocks: BlockList,
    pub(crate) stats: StatusStat,
    pub(crate) control: TransferControl,
    /// Cancelled when the run ends for any reason; workers and the monitor
    /// observe it and wind down.
    pub(crate) shutdown: CancellationToken,
    /// Workers report unrecoverable failures here; the first one received
    /// aborts the run.
    pub(crate) fatal_tx: mpsc::Sender<anyhow::Error>,
}

/// Outcome of a completed transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    pub total_bytes: u64,
    pub elapsed: Duration,
    /// Whether the run picked up an existing breakpoint.
    pub resumed: bool,
}

/// Orchestrator for one segmented transfer.
pub struct Downloader<T: Transport> {
    config: TransferConfig,
    total_size: u64,
    transport: T,
    control: TransferControl,
}

// Cancels the engine-wide token when the run exits, so detached worker
// tasks never outlive the run that spawned them.
struct ShutdownGuard(CancellationToken);

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

impl<T: Transport> Downloader<T> {
    /// `total_size` is the resource length in bytes, already known to the
    /// caller from provider metadata.
    pub fn new(config: TransferConfig, total_size: u64, transport: T) -> Self {
        Self {
            config,
            total_size,
            transport,
            control: TransferControl::new(),
        }
    }

    /// Pause/resume handle; grab it before `run`.
    pub fn control(&self) -> TransferControl {
        self.control.clone()
    }

    /// Run the transfer to completion.
    ///
    /// Builds the initial block list (resuming from a breakpoint when a
    /// matching sidecar exists), spawns one worker per unfinished block plus
    /// the monitor, and returns when the monitor signals completion or a
    /// worker reports a fatal transport/storage failure.
    pub async fn run(self) -> Result<TransferSummary> {
        let started = Instant::now();
        check_save_path(&self.config.save_path)?;

        let (blocks, resumed) = self.initial_blocks();
        let writer = if resumed {
            RangeWriter::open_existing(&self.config.save_path)?
        } else {
            RangeWriter::create(&self.config.save_path, self.total_size)?
        };

        let (fatal_tx, mut fatal_rx) = mpsc::channel(4);
        let shared = Arc::new(Shared {
            config: self.config,
            total_size: self.total_size,
            transport: self.transport,
            writer,
            blocks,
            stats: StatusStat::new(),
            control: self.control,
            shutdown: CancellationToken::new(),
            fatal_tx,
        });
        let _guard = ShutdownGuard(shared.shutdown.clone());

        let pending: Vec<usize> = shared
            .blocks
            .iter()
            .filter(|b| !b.is_done())
            .map(|b| b.index())
            .collect();
        info!(
            blocks = shared.blocks.len(),
            pending = pending.len(),
            resumed,
            total_size = shared.total_size,
            "starting transfer"
        );
        for index in pending {
            Worker::spawn(Arc::clone(&shared), index);
        }
        let monitor = tokio::spawn(monitor::run(Arc::clone(&shared)));

        tokio::select! {
            joined = monitor => {
                joined.map_err(|e| anyhow!("monitor task failed: {e}"))?;
                shared.writer.sync()?;
                Ok(TransferSummary {
                    total_bytes: shared.total_size,
                    elapsed: started.elapsed(),
                    resumed,
                })
            }
            fatal = fatal_rx.recv() => {
                let err = fatal.unwrap_or_else(|| anyhow!("transfer aborted"));
                warn!("transfer aborted: {err:#}");
                Err(err)
            }
        }
    }

    /// Load a matching breakpoint if one exists, else plan a fresh equal
    /// partition. Stale or unreadable sidecars are discarded with a warning.
    fn initial_blocks(&self) -> (BlockList, bool) {
        if !self.config.testing {
            let sidecar = self.config.sidecar_path();
            match Breakpoint::load(&sidecar) {
                Ok(Some(bp)) if bp.matches(self.total_size, &self.config.save_path) => {
                    info!(sidecar = %sidecar.display(), "resuming from breakpoint");
                    return (bp.into_block_list(), true);
                }
                Ok(Some(_)) => {
                    warn!(
                        sidecar = %sidecar.display(),
                        "breakpoint does not match this transfer, starting fresh"
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("ignoring unreadable breakpoint: {e:#}");
                }
            }
        }
        (
            BlockList::plan(self.total_size, self.config.parallelism),
            false,
        )
    }
}
