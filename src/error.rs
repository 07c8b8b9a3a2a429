//! Custom error types for the capture pipeline.
//!
//! This module defines the primary error type, `CaptureError`, shared by every stage of the
//! pipeline. Using the `thiserror` crate it gives one consistent way to report problems, from
//! configuration mistakes at startup to storage failures in the middle of a capture session.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically file parsing or type mismatches in
//!   the TOML configuration or in `RADAR_CAPTURE_` environment overrides.
//! - **`Configuration`**: Values that parse but are logically invalid (fewer than two ring
//!   chunks, zero samples per pulse, an unknown retain mode name).
//! - **`Framing`**: A chunk whose magic number is neither the pulse sentinel nor the
//!   end-of-stream sentinel. The stream is desynchronized and the session ends.
//! - **`Io`**, **`Database`**, **`Json`**: Wrapped errors from the standard library,
//!   `rusqlite` and `serde_json`.
//! - **`Storage`**: Semantic storage failures (a pulse arrived before a digitize mode was set,
//!   a sweep file that cannot be parsed back).
//!
//! Transient conditions (no chunk ready yet, short socket reads) and capacity conditions
//! (early sweep flush, ring buffer lapping) are never errors; they are handled locally and
//! reported through counters and log events.

use thiserror::Error;

/// Convenience alias for results using the capture error type.
pub type AppResult<T> = std::result::Result<T, CaptureError>;

/// Primary error type for the capture pipeline.
///
/// # Error Categories
///
/// 1. **Configuration Errors** - `Config`, `Configuration`
///    - Raised while building a session, before any data flows
///    - Recovery: fix the configuration and restart
///
/// 2. **Stream Errors** - `Framing`, `ThreadPanicked`
///    - Fatal to the current capture session; the open sweep is flushed first
///
/// 3. **Storage Errors** - `Io`, `Database`, `Json`, `Storage`
///    - Fatal, since a session that cannot persist must stop rather than drop samples
#[derive(Error, Debug)]
pub enum CaptureError {
    /// Configuration file or environment parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration values parsed but failed semantic validation.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// A chunk did not start with a known magic number.
    #[error("Framing error: chunk {sequence} has magic {magic:#010x}; stream desynchronized")]
    Framing {
        /// Write sequence number of the offending chunk.
        sequence: u64,
        /// Magic number found at the start of the chunk.
        magic: u32,
    },

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite operation failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Sweep file header (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Storage backend could not accept data.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A pipeline thread panicked.
    #[error("Thread '{0}' panicked")]
    ThreadPanicked(String),

    /// Shutdown completed but one or more steps failed.
    #[error("Shutdown failed with errors")]
    ShutdownFailed(Vec<CaptureError>),
}

impl From<figment::Error> for CaptureError {
    fn from(value: figment::Error) -> Self {
        CaptureError::Config(Box::new(value))
    }
}

impl CaptureError {
    /// Whether the error must end the capture session.
    ///
    /// Every variant that can surface from the pipeline is fatal except an I/O error of kind
    /// `Interrupted`, `WouldBlock` or `TimedOut`, which the socket loops retry.
    pub fn is_fatal(&self) -> bool {
        match self {
            CaptureError::Io(err) => !matches!(
                err.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => true,
        }
    }

    /// Whether the error was raised before any data was captured.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CaptureError::Config(_) | CaptureError::Configuration(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_error_reports_magic_in_hex() {
        let err = CaptureError::Framing {
            sequence: 7,
            magic: 0xdead_beef,
        };
        let message = err.to_string();
        assert!(message.contains("0xdeadbeef"));
        assert!(message.contains("chunk 7"));
    }

    #[test]
    fn retryable_io_is_not_fatal() {
        for kind in [
            std::io::ErrorKind::Interrupted,
            std::io::ErrorKind::WouldBlock,
            std::io::ErrorKind::TimedOut,
        ] {
            assert!(!CaptureError::Io(std::io::Error::from(kind)).is_fatal());
        }

        let err = CaptureError::Io(std::io::Error::from(std::io::ErrorKind::PermissionDenied));
        assert!(err.is_fatal());
        assert!(CaptureError::Storage("disk full".into()).is_fatal());
    }

    #[test]
    fn configuration_errors_are_classified() {
        assert!(CaptureError::Configuration("num_chunks".into()).is_configuration());
        assert!(!CaptureError::Storage("disk full".into()).is_configuration());
    }

    #[test]
    fn shutdown_failure_keeps_inner_errors() {
        let err = CaptureError::ShutdownFailed(vec![
            CaptureError::Storage("flush".into()),
            CaptureError::ThreadPanicked("pulse-ingest".into()),
        ]);
        match err {
            CaptureError::ShutdownFailed(inner) => assert_eq!(inner.len(), 2),
            other => panic!("unexpected variant: {:?}", other),
        }
    }
}
