//! Integration tests for the monitor: stall detection with forced close and
//! rebalancing, and the pause switch.

mod common;

use common::{test_body, test_config, StubTransport};
use std::time::Duration;
use tempfile::tempdir;
use xfer_core::breakpoint::sidecar_path;
use xfer_core::downloader::Downloader;

#[tokio::test(start_paused = true)]
async fn stalled_block_is_recovered_and_transfer_completes() {
    let body = test_body(256 * 1024);
    let dir = tempdir().unwrap();
    let config = test_config(&dir.path().join("out.bin"));
    let save = config.save_path.clone();

    // The first connection for the block at offset 0 hangs silently; the
    // other three blocks finish at full speed, so the aggregate rate
    // collapses and the monitor must force-close the dead transport and
    // split the stalled remainder onto the freed slots.
    let transport = StubTransport::new(body.clone()).hang_first_open_at(0);
    let downloader = Downloader::new(config, body.len() as u64, transport);
    let summary = downloader.run().await.expect("transfer should recover");

    assert_eq!(summary.total_bytes, body.len() as u64);
    assert_eq!(std::fs::read(&save).unwrap(), body);
    assert!(!sidecar_path(&save).exists());
}

#[tokio::test(start_paused = true)]
async fn pause_halts_monitor_until_resumed() {
    let body = test_body(64 * 1024);
    let dir = tempdir().unwrap();
    let config = test_config(&dir.path().join("out.bin"));
    let save = config.save_path.clone();
    let sidecar = sidecar_path(&save);

    let downloader = Downloader::new(config, body.len() as u64, StubTransport::new(body.clone()));
    let control = downloader.control();
    control.pause();

    let handle = tokio::spawn(downloader.run());

    // Workers finish on their own, but the paused monitor neither
    // checkpoints nor signals completion.
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!handle.is_finished(), "paused run must not complete");
    assert!(!sidecar.exists(), "paused monitor must not checkpoint");

    control.resume();
    let summary = handle.await.unwrap().expect("resumed run completes");
    assert_eq!(summary.total_bytes, body.len() as u64);
    assert_eq!(std::fs::read(&save).unwrap(), body);
    assert!(!sidecar.exists());
}
