//! Error types for the tsdfile storage library.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all tsdfile operations.
///
/// This enum covers all possible error conditions, from value-model
/// construction through codec validation to storage I/O.
#[derive(Error, Debug)]
pub enum TsdError {
    /// Error constructing a value-model entity (names, tags, values,
    /// collections).
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Error encoding or decoding the binary wire format.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Error in the storage layer (file creation, append, manifest).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors raised while constructing value-model entities.
///
/// These are local and recoverable: the caller receives the error and the
/// offending entity is never realized.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A path segment is empty or contains a reserved byte.
    #[error("invalid name segment {segment:?}: {reason}")]
    InvalidName {
        /// The offending segment.
        segment: String,
        /// Why the segment is invalid.
        reason: String,
    },

    /// Two tag entries share the same key.
    #[error("duplicate tag key: {key:?}")]
    DuplicateTagKey {
        /// The duplicated key.
        key: String,
    },

    /// Two metric entries within one group share the same metric name.
    #[error("duplicate metric name: {name}")]
    DuplicateMetricName {
        /// The duplicated metric name, rendered as a dotted path.
        name: String,
    },

    /// Two entries in one collection share the same group name.
    #[error("duplicate group name: {group}")]
    DuplicateGroupName {
        /// The duplicated group name, rendered as path plus tags.
        group: String,
    },

    /// A metric value payload violates its invariants.
    #[error("invalid value: {reason}")]
    InvalidValue {
        /// Why the value is invalid.
        reason: String,
    },
}

/// Errors raised by the binary codec.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The byte stream is truncated or structurally inconsistent.
    #[error("corrupt data at offset {offset}: {reason}")]
    Corrupt {
        /// Byte offset into the stream where decoding failed.
        offset: usize,
        /// Description of the inconsistency.
        reason: String,
    },

    /// The stream ended before a complete unit could be decoded.
    #[error("truncated data at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Byte offset where the read was attempted.
        offset: usize,
        /// Bytes the decoder needed.
        needed: usize,
        /// Bytes remaining in the stream.
        available: usize,
    },

    /// The header carries a format version newer than this decoder supports.
    #[error("unsupported format version {major}.{minor} (supported: {supported_major}.x)")]
    UnsupportedVersion {
        /// Major version found in the header.
        major: u16,
        /// Minor version found in the header.
        minor: u16,
        /// Highest major version this decoder understands.
        supported_major: u16,
    },
}

/// Errors raised by the storage strategy layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The target path could not be created or opened for the requested mode.
    #[error("storage unavailable at '{}': {source}", path.display())]
    Unavailable {
        /// The path that could not be created or opened.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The target already exists and overwrite was not requested.
    #[error("history already exists at '{}'", path.display())]
    AlreadyExists {
        /// The existing path.
        path: PathBuf,
    },

    /// An append carried a timestamp earlier than the last appended one.
    #[error("out-of-order write: timestamp {attempted_millis}ms precedes last appended {last_millis}ms")]
    OutOfOrderWrite {
        /// Millisecond timestamp of the last successful append.
        last_millis: i64,
        /// Millisecond timestamp of the rejected append.
        attempted_millis: i64,
    },

    /// A write to a history file failed.
    #[error("failed to write '{}': {source}", path.display())]
    WriteFailed {
        /// The file being written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A read from a history file failed.
    #[error("failed to read '{}': {source}", path.display())]
    ReadFailed {
        /// The file being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Syncing a history file to disk failed.
    #[error("failed to sync '{}': {source}", path.display())]
    SyncFailed {
        /// The file being synced.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file-list manifest could not be serialized.
    #[error("failed to serialize manifest: {0}")]
    ManifestSerialize(#[from] serde_json::Error),

    /// The file-list manifest could not be parsed.
    #[error("corrupt manifest in '{}': {source}", path.display())]
    CorruptManifest {
        /// The manifest file.
        path: PathBuf,
        /// The underlying JSON parsing error.
        #[source]
        source: serde_json::Error,
    },

    /// A constituent file failed codec validation, with file identity.
    #[error("corrupt history file '{}': {source}", path.display())]
    CorruptFile {
        /// The file that failed validation.
        path: PathBuf,
        /// The codec error describing the failure.
        #[source]
        source: CodecError,
    },
}

/// Type alias for `Result<T, TsdError>`.
pub type Result<T> = std::result::Result<T, TsdError>;

impl TsdError {
    /// Returns true if this error indicates corrupt or truncated on-disk data.
    pub fn is_corrupt_data(&self) -> bool {
        matches!(
            self,
            TsdError::Codec(CodecError::Corrupt { .. })
                | TsdError::Codec(CodecError::Truncated { .. })
                | TsdError::Storage(StorageError::CorruptManifest { .. })
                | TsdError::Storage(StorageError::CorruptFile { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_carries_context() {
        let err = TsdError::from(CodecError::Truncated {
            offset: 17,
            needed: 8,
            available: 3,
        });
        let msg = err.to_string();
        assert!(msg.contains("17"));
        assert!(msg.contains("needed 8"));
        assert!(err.is_corrupt_data());
    }

    #[test]
    fn test_storage_error_display() {
        let err = TsdError::from(StorageError::OutOfOrderWrite {
            last_millis: 2000,
            attempted_millis: 1000,
        });
        assert!(err.to_string().contains("out-of-order"));
        assert!(!err.is_corrupt_data());
    }
}
