//! Breakpoint persistence: a sidecar snapshot of the block list that lets a
//! transfer resume after interruption.
//!
//! The snapshot is captured without taking the structural lock; a torn read
//! is acceptable because checkpointing is best-effort, and a crash between
//! monitor ticks loses at most one tick of progress. Save failures are
//! logged and never abort the transfer.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::block::{Block, BlockList};

/// Suffix appended to the save path for the sidecar file. Its presence at
/// startup is what triggers a resume.
pub const BREAKPOINT_SUFFIX: &str = ".xfer-downloading";

/// Sidecar path for a given save path: `<save-path><suffix>`.
pub fn sidecar_path(save_path: &Path) -> PathBuf {
    let mut os: OsString = save_path.as_os_str().to_os_string();
    os.push(BREAKPOINT_SUFFIX);
    PathBuf::from(os)
}

/// Persisted bookkeeping for one block. Transient fields (transport handle,
/// write guard, sampled speed) are intentionally absent; they read back as
/// cleared on restore.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSnapshot {
    pub index: usize,
    pub begin: u64,
    pub end: u64,
    pub is_final: bool,
    pub done: bool,
}

/// Full block-list snapshot plus enough metadata to validate a resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakpoint {
    pub total_size: u64,
    pub save_path: PathBuf,
    pub blocks: Vec<BlockSnapshot>,
}

impl Breakpoint {
    /// Snapshot the current partition. Lock-free; see module docs.
    pub fn capture(total_size: u64, save_path: &Path, blocks: &BlockList) -> Self {
        Self {
            total_size,
            save_path: save_path.to_path_buf(),
            blocks: blocks
                .iter()
                .map(|b| BlockSnapshot {
                    index: b.index(),
                    begin: b.begin(),
                    end: b.end(),
                    is_final: b.is_final(),
                    done: b.is_done(),
                })
                .collect(),
        }
    }

    /// Whether this breakpoint belongs to the transfer being started.
    /// A mismatch means the sidecar is stale (different resource or target,
    /// or a partition that does not describe this resource) and must be
    /// discarded.
    pub fn matches(&self, total_size: u64, save_path: &Path) -> bool {
        self.total_size == total_size && self.save_path == save_path && self.blocks_consistent()
    }

    /// Structural sanity of the recorded partition: non-empty, indices are
    /// exactly `0..len`, and every range lies inside the resource. A sidecar
    /// that parses but fails this cannot be mapped back onto block slots.
    fn blocks_consistent(&self) -> bool {
        if self.blocks.is_empty() {
            return false;
        }
        let mut indices: Vec<usize> = self.blocks.iter().map(|s| s.index).collect();
        indices.sort_unstable();
        indices.into_iter().eq(0..self.blocks.len())
            && self.blocks.iter().all(|s| {
                // An exhausted range reads back as begin == end + 1.
                s.begin <= s.end.saturating_add(1)
                    && (self.total_size == 0 || s.end < self.total_size)
            })
    }

    /// Write the snapshot to `path` (temp file + rename, so a crash mid-save
    /// never leaves a truncated sidecar behind).
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec(self).context("failed to encode breakpoint")?;
        let mut tmp: OsString = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, &data)
            .with_context(|| format!("failed to write breakpoint: {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move breakpoint into place: {}", path.display()))?;
        Ok(())
    }

    /// Load a breakpoint, returning `None` when no sidecar exists.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read breakpoint: {}", path.display()))
            }
        };
        let bp: Breakpoint = serde_json::from_slice(&data)
            .with_context(|| format!("malformed breakpoint: {}", path.display()))?;
        Ok(Some(bp))
    }

    /// Remove the sidecar. Missing files are fine (e.g. the transfer never
    /// checkpointed before completing).
    pub fn delete(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("failed to remove breakpoint: {}", path.display()))
            }
        }
    }

    /// Rebuild a block list from the persisted bookkeeping. Non-done blocks
    /// come back idle, ready for a fresh worker; transients are cleared.
    pub fn into_block_list(self) -> BlockList {
        let mut snapshots = self.blocks;
        snapshots.sort_by_key(|s| s.index);
        let blocks = snapshots
            .into_iter()
            .map(|s| Block::restore(s.index, s.begin, s.end, s.is_final, s.done))
            .collect();
        BlockList::from_blocks(blocks)
    }
}
