//! Concurrent positional writer for the save file.
//!
//! Every worker writes its own byte range, so writes are `pwrite`-style and
//! never move a shared cursor. The file is preallocated to the resource
//! length up front; completed bytes land at their final offsets and no merge
//! step is needed.

use anyhow::{Context, Result};
use std::fs::File;
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writer for the save file. Cheap to clone; each `write_at` is independent
/// and safe to issue from multiple tasks.
#[derive(Debug, Clone)]
pub struct RangeWriter {
    file: Arc<File>,
    path: PathBuf,
}

impl RangeWriter {
    /// Create (or truncate) the save file and preallocate `total_size` bytes.
    pub fn create(path: &Path, total_size: u64) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to create save file: {}", path.display()))?;
        file.set_len(total_size)
            .with_context(|| format!("failed to preallocate {} bytes", total_size))?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Open an existing save file for resume, without truncation.
    pub fn open_existing(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .open(path)
            .with_context(|| format!("failed to open save file for resume: {}", path.display()))?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Write `data` at `offset` without touching the logical cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.file
            .write_all_at(data, offset)
            .with_context(|| format!("write of {} bytes at {} failed", data.len(), offset))?;
        Ok(())
    }

    /// Non-Unix fallback: seek + write on a cloned handle. Not safe for
    /// concurrent use; supported platforms all take the Unix path.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = (*self.file).try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    /// Flush file data to disk.
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all().context("save file sync failed")?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
