//! Engine configuration: on-disk defaults plus the per-transfer settings
//! handed to the downloader by the CLI layer.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Retry policy parameters (optional section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum connection attempts per block (including the first).
    pub max_attempts: u32,
    /// Base backoff delay in seconds (e.g. 0.25 = 250ms).
    pub base_delay_secs: f64,
    /// Upper bound on the backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.25,
            max_delay_secs: 30,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_secs_f64(self.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// Engine defaults loaded from `~/.config/xfer/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Initial number of parallel range transfers per file.
    pub parallelism: usize,
    /// Minimum remainder, in bytes, worth splitting onto an idle slot.
    pub min_split_bytes: u64,
    /// Connection-establishment timeout in seconds (the only timeout the
    /// engine owns; stalled established connections are handled by the
    /// monitor instead).
    pub connect_timeout_secs: u64,
    /// Optional retry policy; built-in defaults when missing.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            parallelism: 5,
            min_split_bytes: 256 * 1024,
            connect_timeout_secs: 30,
            retry: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("xfer")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load the engine config from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}

/// Settings for one transfer, consumed by the downloader.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Resource URL, passed through opaquely to the transport.
    pub url: String,
    /// Local target path; the breakpoint sidecar lives next to it.
    pub save_path: PathBuf,
    /// Desired initial block count.
    pub parallelism: usize,
    /// Minimum splittable remainder for rebalancing.
    pub min_split_bytes: u64,
    pub connect_timeout: Duration,
    /// Dry-run/test mode: suppresses breakpoint writes and deletes so tests
    /// stay deterministic.
    pub testing: bool,
    pub retry: RetryPolicy,
}

impl TransferConfig {
    pub fn new(engine: &EngineConfig, url: impl Into<String>, save_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            save_path: save_path.into(),
            parallelism: engine.parallelism,
            min_split_bytes: engine.min_split_bytes,
            connect_timeout: Duration::from_secs(engine.connect_timeout_secs),
            testing: false,
            retry: engine
                .retry
                .as_ref()
                .map(RetryConfig::to_policy)
                .unwrap_or_default(),
        }
    }

    /// Sidecar path for this transfer's breakpoint file.
    pub fn sidecar_path(&self) -> PathBuf {
        crate::breakpoint::sidecar_path(&self.save_path)
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }
}
