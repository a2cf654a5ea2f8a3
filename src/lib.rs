//! Segmented, resumable transfer engine.
//!
//! Moves a remote resource addressable by byte-range requests to local
//! storage using several concurrent range transfers. The partition of the
//! resource into blocks is rebalanced at runtime when throughput collapses,
//! and a sidecar breakpoint file allows a transfer to survive process
//! restarts. Networking itself is an external collaborator: callers supply a
//! [`transport::Transport`] implementation and the engine owns only range
//! bookkeeping, health monitoring, and checkpoint/resume.

pub mod block;
pub mod breakpoint;
pub mod config;
pub mod downloader;
pub mod logging;
pub mod retry;
pub mod speed;
pub mod storage;
pub mod transport;

pub(crate) mod monitor;
pub(crate) mod worker;
