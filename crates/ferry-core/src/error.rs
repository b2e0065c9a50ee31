//! Error types for the transfer engine

use crate::storage::StorageError;
use crate::validator::Rejection;
use thiserror::Error;

/// Errors that end a transfer or a file info query
#[derive(Debug, Error)]
pub enum TransferError {
    /// Client sent a chunk outside the protocol contract
    #[error("protocol violation: {0}")]
    ProtocolViolation(#[from] Rejection),

    /// Stream closed, failed or went idle before the last chunk
    #[error("stream ended prematurely: {0}")]
    StreamTerminatedEarly(String),

    /// Storage backend could not be reached or the destination not opened
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A write, flush or sync failed
    #[error("storage write failed: {0}")]
    StorageWrite(String),

    /// Another live stream holds the advisory claim on this filename
    #[error("file {0:?} is already being written by another transfer")]
    FilenameBusy(String),

    /// Session API used after its terminal outcome
    #[error("session contract violated: {0}")]
    ContractViolation(&'static str),
}

impl TransferError {
    /// Map a storage error raised while opening or querying
    pub fn unavailable(err: StorageError) -> Self {
        Self::StorageUnavailable(err.to_string())
    }

    /// Map a storage error raised while writing
    pub fn write(err: StorageError) -> Self {
        Self::StorageWrite(err.to_string())
    }

    /// Whether the client caused this error (reported in-band, not as a transport error)
    #[must_use]
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::ProtocolViolation(_) | Self::StreamTerminatedEarly(_)
        )
    }
}

/// Result type for transfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_converts_to_protocol_violation() {
        let err: TransferError = Rejection::EmptyFilename.into();
        assert!(matches!(err, TransferError::ProtocolViolation(_)));
        assert!(err.is_client_fault());
        assert_eq!(err.to_string(), "protocol violation: filename is empty");
    }

    #[test]
    fn test_storage_errors_are_not_client_faults() {
        let err = TransferError::write(StorageError::Unavailable("disk gone".into()));
        assert!(!err.is_client_fault());
        assert!(err.to_string().contains("disk gone"));
    }
}
