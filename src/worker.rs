//! Worker: one concurrent task per block performing the actual ranged
//! transfer through the externally supplied transport.
//!
//! The worker owns its block's progress: it opens a stream for the current
//! remainder, writes chunks at their final offsets, and advances `begin`.
//! It never touches other blocks. A forced close from the monitor aborts
//! the current attempt only; the worker reconnects on its own, applying the
//! retry policy to genuine transport failures.

use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::block::Block;
use crate::downloader::Shared;
use crate::retry::{classify, ErrorKind, RetryDecision};
use crate::transport::{ByteStream, RangeSpec, Transport, TransportError};

/// Read-buffer size for the transfer loop.
const CHUNK_BYTES: usize = 64 * 1024;

/// How one connection's streaming phase ended.
enum StreamEnd {
    /// The block's range is exhausted.
    Drained,
    /// The server closed the stream early; reconnect for the remainder.
    Eof,
    /// The monitor force-closed the transport, or the run is shutting down.
    Interrupted,
    /// Unrecoverable local failure already reported on the fatal channel.
    Fatal,
}

pub(crate) struct Worker<T: Transport> {
    shared: Arc<Shared<T>>,
    block: Arc<Block>,
}

impl<T: Transport> Worker<T> {
    /// Arm the slot and spawn the transfer task. The block is marked active
    /// before the task starts so the monitor never mistakes a just-assigned
    /// slot for an idle one.
    pub(crate) fn spawn(shared: Arc<Shared<T>>, index: usize) {
        let block = Arc::clone(shared.blocks.get(index));
        block.set_state(crate::block::BlockState::Active);
        tokio::spawn(Worker { shared, block }.run());
    }

    async fn run(self) {
        let index = self.block.index();
        let mut attempt: u32 = 1;

        loop {
            if self.shared.shutdown.is_cancelled() {
                return;
            }
            let begin = self.block.begin();
            let end = self.block.end();
            if begin > end {
                break;
            }
            let range = RangeSpec { begin, end };
            let cancel = self.block.arm_transport();

            let opened = tokio::select! {
                _ = self.shared.shutdown.cancelled() => return,
                _ = cancel.cancelled() => Err(TransportError::Aborted),
                r = timeout(
                    self.shared.config.connect_timeout,
                    self.shared.transport.open(&self.shared.config.url, range),
                ) => r.unwrap_or(Err(TransportError::Timeout)),
            };

            let mut stream = match opened {
                Ok(stream) => stream,
                Err(TransportError::Aborted) => {
                    // Forced close while connecting; reconnect right away.
                    self.block.clear_transport();
                    continue;
                }
                Err(e) => {
                    self.block.clear_transport();
                    match self.shared.config.retry.decide(attempt, classify(&e)) {
                        RetryDecision::GiveUp => {
                            warn!(block = index, attempt, "transport failed, giving up: {e}");
                            let _ = self.shared.fatal_tx.try_send(
                                anyhow::Error::new(e)
                                    .context(format!("block {index}: transport failed")),
                            );
                            return;
                        }
                        RetryDecision::RetryAfter(delay) => {
                            debug!(block = index, attempt, "transport failed, retrying: {e}");
                            tokio::select! {
                                _ = self.shared.shutdown.cancelled() => return,
                                _ = sleep(delay) => {}
                            }
                            attempt += 1;
                            continue;
                        }
                    }
                }
            };

            let (ended, wrote) = self.stream_into_block(&mut stream, &cancel).await;
            self.block.clear_transport();
            if wrote {
                attempt = 1;
            }
            match ended {
                StreamEnd::Drained => break,
                StreamEnd::Fatal => return,
                StreamEnd::Interrupted => continue,
                StreamEnd::Eof => {
                    // An early EOF with no progress at all counts as a
                    // connection failure; with progress we just reconnect.
                    if !wrote {
                        match self.shared.config.retry.decide(attempt, ErrorKind::Connection) {
                            RetryDecision::GiveUp => {
                                warn!(block = index, "stream kept ending without data, giving up");
                                let _ = self.shared.fatal_tx.try_send(anyhow::anyhow!(
                                    "block {index}: stream ended before any data"
                                ));
                                return;
                            }
                            RetryDecision::RetryAfter(delay) => {
                                tokio::select! {
                                    _ = self.shared.shutdown.cancelled() => return,
                                    _ = sleep(delay) => {}
                                }
                                attempt += 1;
                            }
                        }
                    }
                }
            }
        }

        self.block.mark_done();
        debug!(block = index, "range complete");
    }

    /// Pump the stream into the save file until the range is drained, the
    /// stream ends, or the attempt is interrupted. Returns how it ended and
    /// whether any bytes were written.
    async fn stream_into_block(
        &self,
        stream: &mut ByteStream,
        cancel: &CancellationToken,
    ) -> (StreamEnd, bool) {
        let index = self.block.index();
        let mut buf = vec![0u8; CHUNK_BYTES];
        let mut wrote = false;

        loop {
            let begin = self.block.begin();
            let end = self.block.end();
            if begin > end {
                return (StreamEnd::Drained, wrote);
            }

            let read = tokio::select! {
                _ = self.shared.shutdown.cancelled() => return (StreamEnd::Interrupted, wrote),
                _ = cancel.cancelled() => {
                    debug!(block = index, "transport force-closed");
                    return (StreamEnd::Interrupted, wrote);
                }
                r = stream.read(&mut buf) => r,
            };
            let n = match read {
                Ok(0) => return (StreamEnd::Eof, wrote),
                Ok(n) => n,
                Err(e) => {
                    debug!(block = index, "stream read failed: {e}");
                    return (StreamEnd::Eof, wrote);
                }
            };

            // The monitor may have split this range since the stream was
            // opened; never write past the current end.
            let take = ((end + 1 - begin).min(n as u64)) as usize;
            self.block.begin_write();
            let written = self.shared.writer.write_at(begin, &buf[..take]);
            self.block.end_write();
            if let Err(e) = written {
                warn!(block = index, "storage write failed: {e:#}");
                let _ = self
                    .shared
                    .fatal_tx
                    .try_send(e.context(format!("block {index}: storage write failed")));
                return (StreamEnd::Fatal, wrote);
            }

            self.block.advance(take as u64);
            self.block.sampler().add(take as u64);
            self.shared.stats.add_bytes(take as u64);
            wrote = true;
        }
    }
}
