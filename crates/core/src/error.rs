//! Error types for the partition write pipeline
//!
//! Every failure in the pipeline is fatal for the current partition; the only
//! retry anywhere is the error-correcting replica fallback inside the verified
//! source reader. We use `thiserror` for `Display` and `Error` impls.

use std::io;
use thiserror::Error;

/// Result type alias for deltacow operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the partition write pipeline
#[derive(Debug, Error)]
pub enum Error {
    /// Sink or source could not be opened, or partition geometry is invalid
    #[error("Init error: {0}")]
    Init(String),

    /// Declared size disagrees with extents or patch output
    #[error("Length mismatch in {context}: expected {expected} bytes, got {actual}")]
    LengthMismatch {
        /// What was being measured
        context: String,
        /// Length implied by the destination extents
        expected: u64,
        /// Length actually provided or produced
        actual: u64,
    },

    /// Source content failed verification, including after replica fallback
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Diff/patch algorithm rejected its input
    #[error("Decode error: {0}")]
    Decode(String),

    /// The snapshot sink or checkpoint store rejected a write
    #[error("Sink error: {0}")]
    Sink(String),

    /// Operation shape is malformed or the call is not valid in this state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Reading the source partition failed and no replica could serve it
    #[error("Source I/O error: {0}")]
    SourceIo(#[from] io::Error),
}

impl Error {
    /// Build a length mismatch error.
    pub fn length_mismatch(context: impl Into<String>, expected: u64, actual: u64) -> Self {
        Error::LengthMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Flat error code reported to the caller.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Init(_) => ErrorCode::InitError,
            Error::LengthMismatch { .. } => ErrorCode::LengthMismatch,
            Error::Integrity(_) => ErrorCode::VerityFailure,
            Error::Decode(_) => ErrorCode::DecodeError,
            Error::Sink(_) => ErrorCode::SinkError,
            Error::InvalidOperation(_) => ErrorCode::InvalidOperation,
            Error::SourceIo(_) => ErrorCode::SourceIoError,
        }
    }

    /// Whether the error indicates a corrupt or malformed payload.
    ///
    /// Payload errors will fail again on retry from the same checkpoint.
    pub fn is_payload_error(&self) -> bool {
        matches!(
            self,
            Error::LengthMismatch { .. } | Error::Decode(_) | Error::InvalidOperation(_)
        )
    }
}

/// Error code surfaced to the operation-sequencing driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Sink or source unopenable, bad geometry
    InitError = 1,
    /// Size disagreement between operation, data and extents
    LengthMismatch = 2,
    /// Source verification failed even after replica fallback
    VerityFailure = 3,
    /// Patch rejected by the diff algorithm
    DecodeError = 4,
    /// Snapshot log or checkpoint store write failed
    SinkError = 5,
    /// Malformed operation or call out of sequence
    InvalidOperation = 6,
    /// Source read failed
    SourceIoError = 7,
}

impl ErrorCode {
    /// Numeric value of the code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_length_mismatch() {
        let err = Error::length_mismatch("replace data", 8192, 4096);
        let msg = err.to_string();
        assert!(msg.contains("Length mismatch"));
        assert!(msg.contains("replace data"));
        assert!(msg.contains("8192"));
        assert!(msg.contains("4096"));
    }

    #[test]
    fn test_error_display_integrity() {
        let err = Error::Integrity("sha256 mismatch on extents [(0, 4)]".to_string());
        assert!(err.to_string().contains("Integrity error"));
    }

    #[test]
    fn test_error_from_io() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "short read").into();
        assert!(matches!(err, Error::SourceIo(_)));
        assert_eq!(err.code(), ErrorCode::SourceIoError);
    }

    #[test]
    fn test_codes() {
        assert_eq!(Error::Init(String::new()).code(), ErrorCode::InitError);
        assert_eq!(Error::Integrity(String::new()).code(), ErrorCode::VerityFailure);
        assert_eq!(Error::Decode(String::new()).code(), ErrorCode::DecodeError);
        assert_eq!(Error::Sink(String::new()).code(), ErrorCode::SinkError);
        assert_eq!(ErrorCode::VerityFailure.as_i32(), 3);
    }

    #[test]
    fn test_payload_errors() {
        assert!(Error::Decode("bad magic".into()).is_payload_error());
        assert!(Error::length_mismatch("x", 1, 2).is_payload_error());
        assert!(!Error::Sink("disk full".into()).is_payload_error());
        assert!(!Error::Integrity("mismatch".into()).is_payload_error());
    }
}
