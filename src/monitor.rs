//! Monitor: the periodic supervisory task.
//!
//! Ticks once per second while the transfer runs. Each tick, in order:
//! completion detection (delete the breakpoint, return), checkpointing,
//! aggregate and per-block speed sampling, then stall detection. A stall is
//! a systemic throughput collapse: the aggregate rate dropping below a
//! tenth of the historical peak, as when the remote silently drops several
//! parallel connections at once. Recovery force-closes dead transports and splits
//! healthy remainders onto idle slots. While paused, the monitor sleeps and
//! intervenes in nothing.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::breakpoint::Breakpoint;
use crate::downloader::Shared;
use crate::transport::Transport;
use crate::worker::Worker;

const TICK: Duration = Duration::from_secs(1);
const PAUSED_SLEEP: Duration = Duration::from_secs(2);

/// Run the supervisory loop until every block is done or the engine shuts
/// down. Returning normally means the transfer completed.
pub(crate) async fn run<T: Transport>(shared: Arc<Shared<T>>) {
    let sidecar = shared.config.sidecar_path();

    loop {
        if shared.shutdown.is_cancelled() {
            return;
        }

        if shared.control.is_paused() {
            tokio::select! {
                _ = shared.shutdown.cancelled() => return,
                _ = sleep(PAUSED_SLEEP) => {}
            }
            continue;
        }

        if shared.blocks.is_all_done() {
            if !shared.config.testing {
                if let Err(e) = Breakpoint::delete(&sidecar) {
                    warn!("failed to remove breakpoint: {e:#}");
                }
            }
            info!("all blocks complete");
            return;
        }

        if !shared.config.testing {
            let snapshot =
                Breakpoint::capture(shared.total_size, &shared.config.save_path, &shared.blocks);
            if let Err(e) = snapshot.save(&sidecar) {
                // Best-effort: a failed checkpoint costs at most one tick of
                // resume granularity, never the transfer.
                warn!("checkpoint save failed: {e:#}");
            }
        }

        let speeds = shared.stats.sample_aggregate();
        for block in shared.blocks.iter() {
            block.sample_speed();
        }

        let max_speeds = shared.stats.max_speeds();
        if max_speeds > 0 && speeds < max_speeds / 10 {
            // Reset the peak so recovery does not re-trigger while
            // throughput ramps back up.
            shared.stats.reset_max();
            debug!(speeds, max_speeds, "throughput collapsed, probing blocks");

            for block in shared.blocks.iter() {
                if block.is_done() {
                    continue;
                }
                // Liveness reset: a block with zero throughput that is not
                // mid-flush has a dead connection. Close it and let the
                // worker's retry policy bring up a fresh one.
                if !block.wait_to_write() && block.speed() == 0 {
                    block.cancel_transport();
                    debug!(block = block.index(), "stalled transport force-closed");
                }
                // Rebalancing: hand half of the remainder to an idle slot.
                if let Some(target) =
                    shared.blocks.rebalance(block.index(), shared.config.min_split_bytes)
                {
                    debug!(source = block.index(), target, "range split onto idle slot");
                    Worker::spawn(Arc::clone(&shared), target);
                }
            }
        }

        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = sleep(TICK) => {}
        }
    }
}
