//! # Ferry Core
//!
//! Server-side transfer engine for Ferry.
//!
//! This crate provides:
//! - Stateless chunk validation against a transfer's sequence state
//! - Per-stream transfer sessions that write, hash and finalize uploads
//! - A registry that isolates in-flight streams and guards filenames
//! - File info queries (existence, size, BLAKE3 checksum)
//! - A storage abstraction with a directory-rooted filesystem backend
//!
//! Transport is not handled here; the gRPC service in `ferry-server` feeds
//! decoded [`Chunk`]s into a [`TransferSession`] and turns the resulting
//! [`TransferOutcome`] into a wire response.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod chunk;
pub mod error;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod storage;
pub mod validator;

pub use checksum::ChecksumAccumulator;
pub use chunk::{Chunk, FileInfo, TransferOutcome};
pub use error::{Result, TransferError};
pub use registry::{StreamId, StreamLease, TransferSessionRegistry};
pub use resolver::FileInfoResolver;
pub use session::{SessionState, TransferSession};
pub use storage::{FsStorage, Storage, StorageError, StorageReader, StorageWriter};
pub use validator::{ChunkValidator, Rejection};

/// Default read buffer for streaming a stored file through the checksum (64 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;
