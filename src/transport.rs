//! Transport contract consumed from the networking/API collaborator.
//!
//! The engine owns range bookkeeping and health monitoring, not HTTP
//! semantics or authentication: a [`Transport`] implementation closes over
//! whatever session state it needs and hands back a live byte stream for a
//! requested range. The engine treats both the stream and the errors as
//! opaque, classifying errors only to drive the worker retry policy.

use std::future::Future;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Live byte stream for one ranged request.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// Inclusive byte range of the resource to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeSpec {
    pub begin: u64,
    pub end: u64,
}

impl RangeSpec {
    /// Number of bytes covered.
    pub fn len(&self) -> u64 {
        (self.end + 1).saturating_sub(self.begin)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Range` header value for implementations speaking HTTP.
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.begin, self.end)
    }
}

/// Failure opening or reading a ranged stream, as reported by the
/// collaborator. Variants map onto retry classification; anything the
/// collaborator cannot express lands in `Other` and is not retried.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection could not be established in time")]
    Timeout,
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("remote throttled the transfer")]
    Throttled,
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("transfer attempt aborted")]
    Aborted,
    #[error("{0}")]
    Other(String),
}

/// Opens ranged byte streams against the remote resource.
///
/// Implementations live in the provider plumbing (REST endpoint
/// construction, signing, sessions); tests use in-memory stubs.
pub trait Transport: Send + Sync + 'static {
    /// Open a stream covering exactly `range` of the resource at `url`.
    fn open(
        &self,
        url: &str,
        range: RangeSpec,
    ) -> impl Future<Output = Result<ByteStream, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_len_and_header() {
        let r = RangeSpec { begin: 250_000, end: 499_999 };
        assert_eq!(r.len(), 250_000);
        assert!(!r.is_empty());
        assert_eq!(r.header_value(), "bytes=250000-499999");
    }

    #[test]
    fn single_byte_range() {
        let r = RangeSpec { begin: 42, end: 42 };
        assert_eq!(r.len(), 1);
        assert_eq!(r.header_value(), "bytes=42-42");
    }
}
