//! Shared test helpers: in-memory transports standing in for the provider's
//! networking layer, and config builders.
#![allow(dead_code)]

use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

use xfer_core::config::{EngineConfig, TransferConfig};
use xfer_core::transport::{ByteStream, RangeSpec, Transport, TransportError};

/// Deterministic body for content checks.
pub fn test_body(len: usize) -> Vec<u8> {
    (0u8..251).cycle().take(len).collect()
}

/// Transfer config with small limits suited to in-memory bodies.
pub fn test_config(save_path: &Path) -> TransferConfig {
    let engine = EngineConfig {
        parallelism: 4,
        min_split_bytes: 4 * 1024,
        connect_timeout_secs: 5,
        retry: None,
    };
    TransferConfig::new(&engine, "stub://resource", save_path)
}

/// A stream that never yields: simulates a connection the remote silently
/// stopped feeding.
pub struct PendingReader;

impl AsyncRead for PendingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}

/// In-memory transport serving ranges of a fixed body.
///
/// Optionally hangs the first stream opened at a given offset, to exercise
/// stall detection and forced close.
pub struct StubTransport {
    body: Arc<Vec<u8>>,
    hang_once_at: Mutex<Option<u64>>,
}

impl StubTransport {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body: Arc::new(body),
            hang_once_at: Mutex::new(None),
        }
    }

    pub fn hang_first_open_at(self, offset: u64) -> Self {
        *self.hang_once_at.lock().unwrap() = Some(offset);
        self
    }
}

impl Transport for StubTransport {
    async fn open(&self, _url: &str, range: RangeSpec) -> Result<ByteStream, TransportError> {
        {
            let mut hang = self.hang_once_at.lock().unwrap();
            if *hang == Some(range.begin) {
                *hang = None;
                return Ok(Box::new(PendingReader));
            }
        }
        let end_excl = ((range.end + 1) as usize).min(self.body.len());
        let begin = (range.begin as usize).min(end_excl);
        Ok(Box::new(io::Cursor::new(self.body[begin..end_excl].to_vec())))
    }
}

/// Transport that always fails with a fixed status code.
pub struct FailingTransport(pub u16);

impl Transport for FailingTransport {
    async fn open(&self, _url: &str, _range: RangeSpec) -> Result<ByteStream, TransportError> {
        Err(TransportError::Status(self.0))
    }
}
