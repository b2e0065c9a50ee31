//! Per-transfer state machine.
//!
//! A [`TransferSession`] is created from the first chunk of a stream, applies
//! every validated chunk in order (write, then hash) and reaches exactly one
//! terminal outcome:
//!
//! ```text
//! create ──> apply* ──┬──> finalize(last_chunk_seen) ──> outcome
//!                     └──> fail(reason) ─────────────────> outcome
//! ```
//!
//! The write handle is released on every terminal path. Partial bytes of a
//! failed transfer stay in storage; the protocol has no delete primitive.

use std::time::{Duration, Instant};

use crate::checksum::ChecksumAccumulator;
use crate::chunk::{Chunk, TransferOutcome};
use crate::error::{Result, TransferError};
use crate::storage::{Storage, StorageWriter};

/// Sequence state a chunk is validated against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState<'a> {
    /// Filename the transfer is bound to
    pub filename: &'a str,
    /// Next chunk number the session accepts
    pub expected_next_chunk_number: i64,
    /// Total declared by the first chunk
    pub declared_total_chunks: i64,
}

impl<'a> SessionState<'a> {
    /// State of a session that would be opened by `first_chunk`
    ///
    /// Lets the first chunk be validated before any storage is touched.
    #[must_use]
    pub fn initial(first_chunk: &'a Chunk) -> Self {
        Self {
            filename: &first_chunk.filename,
            expected_next_chunk_number: 1,
            declared_total_chunks: first_chunk.total_chunks,
        }
    }
}

/// Server-side state of one in-progress transfer
pub struct TransferSession {
    filename: String,
    expected_next_chunk_number: i64,
    declared_total_chunks: i64,
    bytes_received: u64,
    checksum: Option<ChecksumAccumulator>,
    writer: Option<Box<dyn StorageWriter>>,
    terminal: bool,
    started_at: Instant,
}

impl TransferSession {
    /// Open (or truncate) the destination named by `first_chunk`
    ///
    /// The chunk itself is not applied; call [`apply`](Self::apply) next.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::StorageUnavailable`] if the destination
    /// cannot be opened.
    pub async fn create(storage: &dyn Storage, first_chunk: &Chunk) -> Result<Self> {
        let writer = storage
            .open_for_write(&first_chunk.filename)
            .await
            .map_err(TransferError::unavailable)?;

        tracing::debug!(
            "Opened {} for a transfer of {} chunks",
            first_chunk.filename,
            first_chunk.total_chunks
        );

        Ok(Self {
            filename: first_chunk.filename.clone(),
            expected_next_chunk_number: 1,
            declared_total_chunks: first_chunk.total_chunks,
            bytes_received: 0,
            checksum: Some(ChecksumAccumulator::new()),
            writer: Some(writer),
            terminal: false,
            started_at: Instant::now(),
        })
    }

    /// Current sequence state, for validation
    #[must_use]
    pub fn state(&self) -> SessionState<'_> {
        SessionState {
            filename: &self.filename,
            expected_next_chunk_number: self.expected_next_chunk_number,
            declared_total_chunks: self.declared_total_chunks,
        }
    }

    /// Destination filename
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Payload bytes written so far
    #[must_use]
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Number of chunks applied so far
    #[must_use]
    pub fn chunks_applied(&self) -> i64 {
        self.expected_next_chunk_number - 1
    }

    /// Total declared by the first chunk
    #[must_use]
    pub fn declared_total_chunks(&self) -> i64 {
        self.declared_total_chunks
    }

    /// Whether a terminal outcome has been produced
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// Time since the session was created
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Write a validated chunk and advance the sequence
    ///
    /// The chunk must already have passed
    /// [`ChunkValidator::validate`](crate::ChunkValidator::validate) against
    /// [`state`](Self::state). Nothing is hashed or counted unless the write
    /// succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::StorageWrite`] if the write fails, or
    /// [`TransferError::ContractViolation`] after a terminal outcome.
    pub async fn apply(&mut self, chunk: &Chunk) -> Result<()> {
        if self.terminal {
            return Err(TransferError::ContractViolation(
                "apply called after the terminal outcome",
            ));
        }
        let (Some(writer), Some(checksum)) = (self.writer.as_mut(), self.checksum.as_mut()) else {
            return Err(TransferError::ContractViolation(
                "session has no open write handle",
            ));
        };

        writer
            .append(&chunk.data)
            .await
            .map_err(TransferError::write)?;
        checksum.update(&chunk.data);
        self.bytes_received += chunk.data.len() as u64;
        self.expected_next_chunk_number += 1;

        Ok(())
    }

    /// Produce the terminal outcome when the stream ends
    ///
    /// Succeeds only if the last chunk was seen and every chunk
    /// `1..=total_chunks` was applied; the file is then flushed and synced.
    /// Otherwise the handle is released and a failure describing how far the
    /// transfer got is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ContractViolation`] if called twice.
    pub async fn finalize(&mut self, last_chunk_seen: bool) -> Result<TransferOutcome> {
        self.enter_terminal()?;

        let applied = self.chunks_applied();
        let complete = last_chunk_seen && applied == self.declared_total_chunks;
        let checksum = self.checksum.take();
        let closed = self.release_writer().await;

        if !complete {
            return Ok(TransferOutcome::failed(
                format!(
                    "stream ended after {applied} of {} chunks",
                    self.declared_total_chunks
                ),
                self.bytes_received,
            ));
        }

        match (closed, checksum) {
            (Ok(()), Some(checksum)) => Ok(TransferOutcome::completed(
                &self.filename,
                self.bytes_received,
                checksum.finalize(),
            )),
            (Err(e), _) => Ok(TransferOutcome::failed(
                format!("failed to flush {}: {e}", self.filename),
                self.bytes_received,
            )),
            (Ok(()), None) => Err(TransferError::ContractViolation(
                "session lost its checksum before finalize",
            )),
        }
    }

    /// Produce a failure outcome from a recorded rejection or write error
    ///
    /// No further bytes are written; the handle is closed so whatever was
    /// already accepted reaches storage.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::ContractViolation`] after a terminal outcome.
    pub async fn fail(&mut self, reason: &TransferError) -> Result<TransferOutcome> {
        self.enter_terminal()?;
        self.checksum = None;
        // The outcome is already a failure; a close error only gets logged
        let _ = self.release_writer().await;

        Ok(TransferOutcome::failed(reason.to_string(), self.bytes_received))
    }

    /// Flush and close the write handle if it is still open
    async fn release_writer(&mut self) -> std::result::Result<(), String> {
        let Some(writer) = self.writer.take() else {
            return Ok(());
        };
        writer.close().await.map_err(|e| {
            tracing::error!("Failed to flush {}: {}", self.filename, e);
            e.to_string()
        })
    }

    fn enter_terminal(&mut self) -> Result<()> {
        if self.terminal {
            return Err(TransferError::ContractViolation(
                "terminal outcome already produced",
            ));
        }
        self.terminal = true;
        Ok(())
    }
}

impl std::fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferSession")
            .field("filename", &self.filename)
            .field("expected_next_chunk_number", &self.expected_next_chunk_number)
            .field("declared_total_chunks", &self.declared_total_chunks)
            .field("bytes_received", &self.bytes_received)
            .field("terminal", &self.terminal)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_bytes;
    use crate::storage::{FsStorage, StorageError, StorageReader, StorageResult};
    use crate::validator::{ChunkValidator, Rejection};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Storage whose writers fail after a fixed number of appends
    struct FailingStorage {
        appends_before_failure: usize,
    }

    struct FailingWriter {
        remaining: usize,
    }

    #[async_trait]
    impl StorageWriter for FailingWriter {
        async fn append(&mut self, _data: &[u8]) -> StorageResult<()> {
            if self.remaining == 0 {
                return Err(StorageError::Io(std::io::Error::other("disk full")));
            }
            self.remaining -= 1;
            Ok(())
        }

        async fn close(self: Box<Self>) -> StorageResult<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl Storage for FailingStorage {
        async fn open_for_write(&self, _name: &str) -> StorageResult<Box<dyn StorageWriter>> {
            Ok(Box::new(FailingWriter {
                remaining: self.appends_before_failure,
            }))
        }

        async fn exists(&self, _name: &str) -> StorageResult<bool> {
            Ok(false)
        }

        async fn size(&self, name: &str) -> StorageResult<u64> {
            Err(StorageError::NotFound(name.to_string()))
        }

        async fn open_for_read(&self, name: &str) -> StorageResult<Box<dyn StorageReader>> {
            Err(StorageError::NotFound(name.to_string()))
        }
    }

    fn chunks(name: &str, parts: &[&[u8]]) -> Vec<Chunk> {
        let total = parts.len() as i64;
        parts
            .iter()
            .enumerate()
            .map(|(i, data)| Chunk::new(name, data.to_vec(), i as i64 + 1, total))
            .collect()
    }

    #[tokio::test]
    async fn test_complete_transfer() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());
        let parts: [&[u8]; 3] = [b"alpha-", b"beta-", b"gamma"];
        let chunks = chunks("greek.txt", &parts);

        let mut session = TransferSession::create(&storage, &chunks[0]).await.unwrap();
        for chunk in &chunks {
            ChunkValidator::validate(&session.state(), chunk).unwrap();
            session.apply(chunk).await.unwrap();
        }
        assert_eq!(session.chunks_applied(), 3);

        let outcome = session.finalize(true).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.bytes_received, 16);
        assert_eq!(outcome.message, "File greek.txt received successfully");

        let written = std::fs::read(dir.path().join("greek.txt")).unwrap();
        assert_eq!(written, b"alpha-beta-gamma");
        assert_eq!(outcome.checksum, Some(checksum_bytes(&written)));
    }

    #[tokio::test]
    async fn test_create_does_not_apply_first_chunk() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());
        let first = Chunk::new("a.bin", vec![1, 2, 3], 1, 2);

        let session = TransferSession::create(&storage, &first).await.unwrap();
        assert_eq!(session.state(), SessionState::initial(&first));
        assert_eq!(session.bytes_received(), 0);
        assert_eq!(session.declared_total_chunks(), 2);
        assert!(!session.is_terminal());
    }

    #[tokio::test]
    async fn test_create_fails_when_storage_unavailable() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path().join("missing-root"));
        let first = Chunk::new("a.bin", vec![1], 1, 1);

        let err = TransferSession::create(&storage, &first).await.unwrap_err();
        assert!(matches!(err, TransferError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_finalize_incomplete() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());
        let parts: [&[u8]; 5] = [b"11", b"22", b"33", b"44", b"55"];
        let chunks = chunks("partial.bin", &parts);

        let mut session = TransferSession::create(&storage, &chunks[0]).await.unwrap();
        session.apply(&chunks[0]).await.unwrap();
        session.apply(&chunks[1]).await.unwrap();

        let outcome = session.finalize(false).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.bytes_received, 4);
        assert_eq!(outcome.message, "stream ended after 2 of 5 chunks");
        assert!(outcome.checksum.is_none());

        // Partial bytes are left in place
        let written = std::fs::read(dir.path().join("partial.bin")).unwrap();
        assert_eq!(written, b"1122");
    }

    #[tokio::test]
    async fn test_finalize_requires_all_chunks_even_with_last_flag() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());
        let chunks = chunks("short.bin", &[b"aa", b"bb"]);

        let mut session = TransferSession::create(&storage, &chunks[0]).await.unwrap();
        session.apply(&chunks[0]).await.unwrap();

        let outcome = session.finalize(true).await.unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn test_terminal_flag_blocks_reuse() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());
        let chunk = Chunk::new("once.bin", b"x".to_vec(), 1, 1);

        let mut session = TransferSession::create(&storage, &chunk).await.unwrap();
        session.apply(&chunk).await.unwrap();
        assert!(session.finalize(true).await.unwrap().success);
        assert!(session.is_terminal());

        assert!(matches!(
            session.apply(&chunk).await,
            Err(TransferError::ContractViolation(_))
        ));
        assert!(matches!(
            session.finalize(true).await,
            Err(TransferError::ContractViolation(_))
        ));
        assert!(matches!(
            session.fail(&TransferError::StreamTerminatedEarly("late".into())).await,
            Err(TransferError::ContractViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_reports_rejection_and_freezes_bytes() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());
        let chunks = chunks("rejected.bin", &[b"one", b"two", b"three"]);

        let mut session = TransferSession::create(&storage, &chunks[0]).await.unwrap();
        session.apply(&chunks[0]).await.unwrap();

        let rejection = ChunkValidator::validate(&session.state(), &chunks[2]).unwrap_err();
        assert!(matches!(rejection, Rejection::SequenceMismatch { .. }));

        let outcome = session.fail(&rejection.into()).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.bytes_received, 3);
        assert!(outcome.message.contains("expected chunk 2, got chunk 3"));
    }

    #[tokio::test]
    async fn test_write_failure_does_not_count_bytes() {
        let storage = FailingStorage {
            appends_before_failure: 1,
        };
        let chunks = chunks("flaky.bin", &[b"first", b"second"]);

        let mut session = TransferSession::create(&storage, &chunks[0]).await.unwrap();
        session.apply(&chunks[0]).await.unwrap();

        let err = session.apply(&chunks[1]).await.unwrap_err();
        assert!(matches!(err, TransferError::StorageWrite(_)));
        assert_eq!(session.bytes_received(), 5);
        assert_eq!(session.chunks_applied(), 1);

        let outcome = session.fail(&err).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.message.contains("disk full"));
    }

    #[tokio::test]
    async fn test_empty_file_transfer() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());
        let chunk = Chunk::new("empty.bin", Vec::new(), 1, 1);

        let mut session = TransferSession::create(&storage, &chunk).await.unwrap();
        ChunkValidator::validate(&session.state(), &chunk).unwrap();
        session.apply(&chunk).await.unwrap();

        let outcome = session.finalize(true).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.bytes_received, 0);
        assert_eq!(outcome.checksum, Some(checksum_bytes(b"")));
        assert_eq!(std::fs::metadata(dir.path().join("empty.bin")).unwrap().len(), 0);
    }
}
