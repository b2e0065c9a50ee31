//! Transfer value types shared by the engine and the RPC layer.

/// One unit of file data, as decoded from the wire.
///
/// Counters are signed because the wire carries signed integers; the
/// validator rejects non-positive values instead of letting them wrap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Destination filename (relative to the storage root)
    pub filename: String,
    /// Payload bytes
    pub data: Vec<u8>,
    /// 1-based position within the transfer
    pub chunk_number: i64,
    /// Declared number of chunks in the transfer
    pub total_chunks: i64,
    /// Set on the chunk whose number equals `total_chunks`
    pub is_last_chunk: bool,
}

impl Chunk {
    /// Build a chunk, deriving `is_last_chunk` from its position
    pub fn new(
        filename: impl Into<String>,
        data: impl Into<Vec<u8>>,
        chunk_number: i64,
        total_chunks: i64,
    ) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
            chunk_number,
            total_chunks,
            is_last_chunk: chunk_number == total_chunks,
        }
    }
}

/// Terminal result of one transfer attempt.
///
/// Exactly one is produced per stream; the service maps it onto the wire
/// `TransferResponse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    /// Whether every chunk was received and the file was flushed
    pub success: bool,
    /// Human-readable description
    pub message: String,
    /// Total payload bytes written
    pub bytes_received: u64,
    /// BLAKE3 digest of the written bytes (successful transfers only)
    pub checksum: Option<String>,
}

impl TransferOutcome {
    /// Successful transfer
    pub fn completed(filename: &str, bytes_received: u64, checksum: String) -> Self {
        Self {
            success: true,
            message: format!("File {filename} received successfully"),
            bytes_received,
            checksum: Some(checksum),
        }
    }

    /// Failed transfer
    pub fn failed(message: impl Into<String>, bytes_received: u64) -> Self {
        Self {
            success: false,
            message: message.into(),
            bytes_received,
            checksum: None,
        }
    }
}

/// Answer to a file info query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileInfo {
    /// Whether the file exists in storage
    pub exists: bool,
    /// Size in bytes (0 when missing)
    pub file_size: u64,
    /// Lowercase hex BLAKE3 digest (empty when missing)
    pub checksum: String,
}

impl FileInfo {
    /// Info for a file that does not exist
    #[must_use]
    pub fn missing() -> Self {
        Self::default()
    }
}
