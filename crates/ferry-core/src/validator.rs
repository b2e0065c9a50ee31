//! Stateless chunk validation.
//!
//! Every inbound chunk is checked against the sequence state of its session
//! before anything touches storage. A rejection is fatal to the transfer:
//! the protocol has no per-chunk retry, only a whole new stream.

use crate::chunk::Chunk;
use crate::session::SessionState;
use thiserror::Error;

/// Why a chunk was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Filename is empty or whitespace
    #[error("filename is empty")]
    EmptyFilename,

    /// Filename would resolve outside the storage root
    #[error("filename {filename:?} is not allowed: {reason}")]
    UnsafeFilename {
        /// Offending filename
        filename: String,
        /// What made it unsafe
        reason: &'static str,
    },

    /// Non-positive total, non-positive chunk number, or number past the total
    #[error("invalid chunk position {chunk_number} of {total_chunks}")]
    InvalidTotalChunks {
        /// Chunk number as received
        chunk_number: i64,
        /// Total chunks as received
        total_chunks: i64,
    },

    /// Filename differs from the one the session was opened with
    #[error("filename changed mid-transfer from {expected:?} to {actual:?}")]
    FilenameChanged {
        /// Filename recorded by the session
        expected: String,
        /// Filename on the chunk
        actual: String,
    },

    /// Total chunks differs from the value declared by the first chunk
    #[error("total_chunks changed mid-transfer from {expected} to {actual}")]
    TotalChunksChanged {
        /// Total declared by the first chunk
        expected: i64,
        /// Total on this chunk
        actual: i64,
    },

    /// Chunk arrived out of sequence
    #[error("expected chunk {expected}, got chunk {actual}")]
    SequenceMismatch {
        /// Next chunk number the session accepts
        expected: i64,
        /// Chunk number received
        actual: i64,
    },

    /// `is_last_chunk` disagrees with the chunk's position
    #[error(
        "is_last_chunk={is_last_chunk} on chunk {chunk_number} of {total_chunks}"
    )]
    LastChunkFlagMismatch {
        /// Chunk number received
        chunk_number: i64,
        /// Declared total
        total_chunks: i64,
        /// Flag as received
        is_last_chunk: bool,
    },

    /// Empty payload outside a single-chunk empty file
    #[error("chunk {chunk_number} of {total_chunks} carries no data")]
    EmptyPayload {
        /// Chunk number received
        chunk_number: i64,
        /// Declared total
        total_chunks: i64,
    },
}

/// Chunk validation rules
///
/// Pure functions only: nothing here mutates a session or storage.
pub struct ChunkValidator;

impl ChunkValidator {
    /// Check `chunk` against the session's current sequence state
    ///
    /// # Errors
    ///
    /// Returns the first [`Rejection`] that applies, in this order:
    /// empty filename, unsafe filename, invalid position, filename change,
    /// total change, sequence mismatch, last-chunk flag, empty payload.
    pub fn validate(state: &SessionState<'_>, chunk: &Chunk) -> Result<(), Rejection> {
        Self::validate_filename(&chunk.filename)?;

        if chunk.total_chunks <= 0
            || chunk.chunk_number <= 0
            || chunk.chunk_number > chunk.total_chunks
        {
            return Err(Rejection::InvalidTotalChunks {
                chunk_number: chunk.chunk_number,
                total_chunks: chunk.total_chunks,
            });
        }

        if chunk.filename != state.filename {
            return Err(Rejection::FilenameChanged {
                expected: state.filename.to_string(),
                actual: chunk.filename.clone(),
            });
        }

        if chunk.total_chunks != state.declared_total_chunks {
            return Err(Rejection::TotalChunksChanged {
                expected: state.declared_total_chunks,
                actual: chunk.total_chunks,
            });
        }

        if chunk.chunk_number != state.expected_next_chunk_number {
            return Err(Rejection::SequenceMismatch {
                expected: state.expected_next_chunk_number,
                actual: chunk.chunk_number,
            });
        }

        if chunk.is_last_chunk != (chunk.chunk_number == chunk.total_chunks) {
            return Err(Rejection::LastChunkFlagMismatch {
                chunk_number: chunk.chunk_number,
                total_chunks: chunk.total_chunks,
                is_last_chunk: chunk.is_last_chunk,
            });
        }

        // Only a one-chunk transfer may be empty: that is how an empty file travels.
        if chunk.data.is_empty() && chunk.total_chunks != 1 {
            return Err(Rejection::EmptyPayload {
                chunk_number: chunk.chunk_number,
                total_chunks: chunk.total_chunks,
            });
        }

        Ok(())
    }

    /// Check that a filename is a plain name that stays inside the storage root
    ///
    /// Used both for inbound chunks and for file info queries.
    ///
    /// # Errors
    ///
    /// Returns [`Rejection::EmptyFilename`] or [`Rejection::UnsafeFilename`].
    pub fn validate_filename(filename: &str) -> Result<(), Rejection> {
        if filename.trim().is_empty() {
            return Err(Rejection::EmptyFilename);
        }

        let unsafe_name = |reason| Rejection::UnsafeFilename {
            filename: filename.to_string(),
            reason,
        };

        if filename == "." || filename == ".." {
            return Err(unsafe_name("relative directory reference"));
        }
        if filename.contains('/') || filename.contains('\\') {
            return Err(unsafe_name("path separators are not allowed"));
        }
        if filename.contains('\0') {
            return Err(unsafe_name("NUL byte"));
        }
        if cfg!(windows) && has_drive_prefix(filename) {
            return Err(unsafe_name("drive prefix"));
        }

        Ok(())
    }
}

/// `C:` style prefix, which Windows resolves relative to another drive
fn has_drive_prefix(filename: &str) -> bool {
    let bytes = filename.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}
