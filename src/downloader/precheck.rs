//! Save-path precheck: refuse to clobber finished or foreign files.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::breakpoint::sidecar_path;

/// The save path already holds a file that is not a resumable partial
/// download (no breakpoint sidecar next to it).
#[derive(Debug, Error)]
#[error("file already exists: {0}")]
pub struct FileExists(pub PathBuf);

/// A transfer may start when the save path is free, or when both the file
/// and its breakpoint sidecar exist (an interrupted download to resume).
pub fn check_save_path(save_path: &Path) -> Result<(), FileExists> {
    if save_path.exists() && !sidecar_path(save_path).exists() {
        return Err(FileExists(save_path.to_path_buf()));
    }
    Ok(())
}
