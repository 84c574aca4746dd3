//! Error types for the logpack archive engine.
//!
//! All fallible operations in this library return [`Result`]. Each variant of
//! [`LogPackError`] corresponds to one failure kind; [`LogPackError::code`]
//! exposes a stable numeric code for telemetry. Corruption and
//! unsupported-format errors capture the source location of the call site
//! that raised them.

use std::io;
use std::panic::Location;

use thiserror::Error;

/// Main error type for the logpack archive engine.
#[derive(Debug, Error)]
pub enum LogPackError {
    /// A read, write, or fsync on the underlying storage failed.
    ///
    /// The writer deletes any partially written segment; the reader closes
    /// the archive.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The embedded metadata store reported an error.
    #[error("metadata store error: {0}")]
    Metadata(#[from] rusqlite::Error),

    /// A framing or ID-density invariant was violated while reading an
    /// archive. The archive is refused.
    #[error("corrupt archive at {location}: {detail}")]
    CorruptArchive {
        /// What was found to be inconsistent.
        detail: String,
        /// Call site that detected the corruption.
        location: &'static Location<'static>,
    },

    /// An operation was invoked on a component before `open`.
    ///
    /// This is a programming error, not a data error.
    #[error("component used before open")]
    NotInitialised,

    /// Invalid caller-supplied input (bad argument, missing file).
    #[error("bad input: {0}")]
    BadInput(String),

    /// An unknown format specifier, placeholder, or on-disk format version.
    #[error("unsupported at {location}: {detail}")]
    Unsupported {
        /// What was not recognised.
        detail: String,
        /// Call site that raised the error.
        location: &'static Location<'static>,
    },

    /// An iterator or stream was exhausted. Normal termination, not a
    /// failure.
    #[error("end of stream")]
    EndOfStream,

    /// The metadata store could not be closed because statements are still
    /// live. The caller should release them and retry.
    #[error("metadata store busy")]
    Busy,
}

impl LogPackError {
    /// Creates a [`LogPackError::CorruptArchive`] capturing the caller's
    /// source location.
    #[track_caller]
    pub fn corrupt(detail: impl Into<String>) -> Self {
        LogPackError::CorruptArchive {
            detail: detail.into(),
            location: Location::caller(),
        }
    }

    /// Creates a [`LogPackError::Unsupported`] capturing the caller's source
    /// location.
    #[track_caller]
    pub fn unsupported(detail: impl Into<String>) -> Self {
        LogPackError::Unsupported {
            detail: detail.into(),
            location: Location::caller(),
        }
    }

    /// Stable numeric code for this failure kind.
    pub fn code(&self) -> u32 {
        match self {
            LogPackError::Io(_) => 1,
            LogPackError::Metadata(_) => 2,
            LogPackError::CorruptArchive { .. } => 3,
            LogPackError::NotInitialised => 4,
            LogPackError::BadInput(_) => 5,
            LogPackError::Unsupported { .. } => 6,
            LogPackError::EndOfStream => 7,
            LogPackError::Busy => 8,
        }
    }

    /// Returns true if this error marks ordinary stream exhaustion.
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, LogPackError::EndOfStream)
    }
}

/// Type alias for Results using [`LogPackError`].
pub type Result<T> = std::result::Result<T, LogPackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_display_includes_location() {
        let error = LogPackError::corrupt("dictionary ID 7 out of range");
        let display = format!("{}", error);
        assert!(display.contains("dictionary ID 7 out of range"));
        assert!(display.contains("error.rs"));
    }

    #[test]
    fn test_io_error_from() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: LogPackError = io_error.into();
        assert!(matches!(error, LogPackError::Io(_)));
        assert_eq!(error.code(), 1);
    }

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            LogPackError::corrupt("x"),
            LogPackError::unsupported("y"),
            LogPackError::NotInitialised,
            LogPackError::BadInput("z".to_string()),
            LogPackError::EndOfStream,
            LogPackError::Busy,
        ];
        for (i, a) in errors.iter().enumerate() {
            for b in errors.iter().skip(i + 1) {
                assert_ne!(a.code(), b.code());
            }
        }
    }

    #[test]
    fn test_end_of_stream_is_not_a_failure_kind() {
        assert!(LogPackError::EndOfStream.is_end_of_stream());
        assert!(!LogPackError::Busy.is_end_of_stream());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LogPackError>();
    }
}
