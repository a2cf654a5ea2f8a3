//! Per-worker retry policy for transport failures.
//!
//! After a stall-induced forced close or an ordinary transport error, the
//! worker decides locally whether to reconnect; nothing here is surfaced to
//! the caller unless the policy is exhausted, at which point the downloader
//! aborts the whole transfer.

use std::time::Duration;

use crate::transport::TransportError;

/// Retry-relevant classification of a transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection establishment timed out.
    Timeout,
    /// Network-level failure (reset, refused, short stream).
    Connection,
    /// The remote asked us to slow down.
    Throttled,
    /// Retryable server-side failure (5xx).
    Server(u16),
    /// Not retryable (client errors, unclassified failures).
    Fatal,
}

/// Decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    GiveUp,
    RetryAfter(Duration),
}

/// Exponential backoff with caps. `attempt` is 1-based and counts connection
/// attempts since the last successful chunk, so a long healthy transfer that
/// hits a blip starts over from the base delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn decide(&self, attempt: u32, kind: ErrorKind) -> RetryDecision {
        if attempt >= self.max_attempts || kind == ErrorKind::Fatal {
            return RetryDecision::GiveUp;
        }
        let shift = attempt.saturating_sub(1).min(8);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay);
        RetryDecision::RetryAfter(delay)
    }
}

/// Map a transport failure onto a retry classification.
///
/// A forced close (`Aborted`) counts as a connection-level failure: the
/// monitor expects the worker to come back with a fresh connection.
pub fn classify(err: &TransportError) -> ErrorKind {
    match err {
        TransportError::Timeout => ErrorKind::Timeout,
        TransportError::Connection(_) | TransportError::Aborted => ErrorKind::Connection,
        TransportError::Throttled => ErrorKind::Throttled,
        TransportError::Status(429) | TransportError::Status(503) => ErrorKind::Throttled,
        TransportError::Status(code) if (500..=599).contains(code) => ErrorKind::Server(*code),
        TransportError::Status(_) => ErrorKind::Fatal,
        TransportError::Other(_) => ErrorKind::Fatal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_is_never_retried() {
        let p = RetryPolicy::default();
        assert_eq!(p.decide(1, ErrorKind::Fatal), RetryDecision::GiveUp);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let p = RetryPolicy {
            max_attempts: 20,
            ..RetryPolicy::default()
        };
        let delay = |attempt| match p.decide(attempt, ErrorKind::Connection) {
            RetryDecision::RetryAfter(d) => d,
            RetryDecision::GiveUp => panic!("expected retry"),
        };
        assert!(delay(2) >= delay(1));
        assert!(delay(12) <= p.max_delay);
    }

    #[test]
    fn gives_up_at_max_attempts() {
        let p = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(matches!(
            p.decide(2, ErrorKind::Timeout),
            RetryDecision::RetryAfter(_)
        ));
        assert_eq!(p.decide(3, ErrorKind::Timeout), RetryDecision::GiveUp);
    }

    #[test]
    fn classify_maps_status_codes() {
        assert_eq!(classify(&TransportError::Status(429)), ErrorKind::Throttled);
        assert_eq!(classify(&TransportError::Status(503)), ErrorKind::Throttled);
        assert_eq!(classify(&TransportError::Status(502)), ErrorKind::Server(502));
        assert_eq!(classify(&TransportError::Status(404)), ErrorKind::Fatal);
        assert_eq!(classify(&TransportError::Aborted), ErrorKind::Connection);
        assert_eq!(
            classify(&TransportError::Other("boom".into())),
            ErrorKind::Fatal
        );
    }
}
