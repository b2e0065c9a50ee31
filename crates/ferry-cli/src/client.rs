//! Ferry gRPC client.
//!
//! Uploads read the file sequentially and push chunks through a bounded
//! channel, so at most a few chunks are held in memory regardless of file
//! size. The local BLAKE3 digest is computed while sending.

use crate::config::ClientConfig;
use crate::progress::TransferProgress;
use crate::proto::file_transfer_service_client::FileTransferServiceClient;
use crate::proto::{FileChunk, FileInfoRequest, FileInfoResponse, TransferResponse};
use ferry_core::ChecksumAccumulator;
use ferry_core::checksum::checksum_file;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};

/// Chunks buffered between the file reader and the RPC
const SEND_QUEUE_DEPTH: usize = 4;

/// Client errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Endpoint URI is malformed
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    /// Could not connect to the server
    #[error("failed to connect: {0}")]
    Connect(#[from] tonic::transport::Error),

    /// Server returned a gRPC error
    #[error("server error: {}: {}", .0.code(), .0.message())]
    Rpc(#[from] tonic::Status),

    /// Local file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File being read
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// File has no usable name to upload under
    #[error("cannot derive a remote name from {0}")]
    NoFileName(PathBuf),

    /// File changed size while it was being sent
    #[error("{path} changed while sending: expected {expected} bytes, read {actual}")]
    FileChanged {
        /// File being sent
        path: PathBuf,
        /// Size at the start of the upload
        expected: u64,
        /// Bytes actually read
        actual: u64,
    },

    /// Reader task panicked or was cancelled
    #[error("send task failed: {0}")]
    Task(String),
}

/// Result type for client operations
pub type Result<T> = std::result::Result<T, ClientError>;

/// Outcome of one upload as seen by the client
#[derive(Debug, Clone)]
pub struct TransferReport {
    /// Server's verdict
    pub success: bool,
    /// Server's message
    pub message: String,
    /// Bytes the server says it wrote
    pub bytes_received: u64,
    /// Bytes the client sent
    pub bytes_sent: u64,
    /// Chunks declared for the transfer
    pub total_chunks: i64,
    /// BLAKE3 digest of the bytes sent (empty if the server stopped early)
    pub local_checksum: String,
    /// Wall-clock duration of the upload
    pub elapsed: Duration,
}

/// Local file compared against the server's copy
#[derive(Debug, Clone)]
pub struct Verification {
    /// BLAKE3 digest of the local file
    pub local_checksum: String,
    /// Local file size
    pub local_size: u64,
    /// What the server reported
    pub remote: FileInfoResponse,
}

impl Verification {
    /// Whether the server has an identical copy
    pub fn matches(&self) -> bool {
        self.remote.exists
            && self.remote.file_size == self.local_size as i64
            && self.remote.checksum == self.local_checksum
    }
}

/// Connected Ferry client
#[derive(Clone)]
pub struct FerryClient {
    inner: FileTransferServiceClient<Channel>,
    chunk_size: usize,
}

impl FerryClient {
    /// Connect using `config`
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidEndpoint`] or [`ClientError::Connect`].
    pub async fn connect(config: &ClientConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(config.server.endpoint.clone())
            .map_err(|_| ClientError::InvalidEndpoint(config.server.endpoint.clone()))?
            .connect_timeout(config.connect_timeout())
            .http2_keep_alive_interval(config.keepalive_interval())
            .keep_alive_timeout(config.keepalive_timeout());

        tracing::debug!("Connecting to {}", config.server.endpoint);
        let channel = endpoint.connect().await?;

        Ok(Self::from_channel(
            channel,
            config.server.max_message_size,
            config.transfer.chunk_size,
        ))
    }

    /// Wrap an existing channel
    pub fn from_channel(channel: Channel, max_message_size: usize, chunk_size: usize) -> Self {
        let inner = FileTransferServiceClient::new(channel)
            .max_decoding_message_size(max_message_size)
            .max_encoding_message_size(max_message_size);
        Self {
            inner,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Payload bytes per chunk
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Upload `path` under `remote_name`
    ///
    /// An empty file is sent as a single empty last chunk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the RPC fails. A
    /// transfer the server refused is not an error: check
    /// [`TransferReport::success`].
    pub async fn send_file(
        &mut self,
        path: &Path,
        remote_name: &str,
        progress: &TransferProgress,
    ) -> Result<TransferReport> {
        let io_err = |source| ClientError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).await.map_err(io_err)?;
        let file_size = file.metadata().await.map_err(io_err)?.len();
        let total_chunks = total_chunks_for(file_size, self.chunk_size);

        tracing::info!(
            "Sending {} as {} ({} bytes, {} chunks of up to {} bytes)",
            path.display(),
            remote_name,
            file_size,
            total_chunks,
            self.chunk_size
        );

        let (tx, rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let reader = tokio::spawn(read_chunks(
            file,
            path.to_path_buf(),
            file_size,
            remote_name.to_string(),
            self.chunk_size,
            total_chunks,
            tx,
            progress.clone(),
        ));

        let start = Instant::now();
        let rpc_result = self.inner.transfer_file(ReceiverStream::new(rx)).await;
        let elapsed = start.elapsed();

        // The server only reports success after the last chunk, by which
        // point the reader is done. Otherwise it may be parked on a full queue.
        let delivered = matches!(&rpc_result, Ok(response) if response.get_ref().success);
        if !delivered {
            reader.abort();
        }
        let read_result = match reader.await {
            // A local read failure explains a server-side "stream ended" verdict
            Ok(result) => Some(result?),
            Err(e) if e.is_cancelled() => None,
            Err(e) => return Err(ClientError::Task(e.to_string())),
        };
        let response = rpc_result?.into_inner();
        let (bytes_sent, local_checksum) =
            read_result.unwrap_or_else(|| (progress.position(), String::new()));

        Ok(TransferReport {
            success: response.success,
            message: response.message,
            bytes_received: u64::try_from(response.bytes_received).unwrap_or_default(),
            bytes_sent,
            total_chunks,
            local_checksum,
            elapsed,
        })
    }

    /// Stream pre-built chunks as one transfer
    ///
    /// Sends exactly what it is given, which makes it useful for probing how
    /// the server handles malformed sequences.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rpc`] if the server fails the call.
    pub async fn send_chunks(&mut self, chunks: Vec<FileChunk>) -> Result<TransferResponse> {
        self.send_stream(tokio_stream::iter(chunks)).await
    }

    /// Stream chunks from any source as one transfer
    ///
    /// The transfer ends when `chunks` ends.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rpc`] if the server fails the call.
    pub async fn send_stream<S>(&mut self, chunks: S) -> Result<TransferResponse>
    where
        S: Stream<Item = FileChunk> + Send + 'static,
    {
        let response = self.inner.transfer_file(chunks).await?;
        Ok(response.into_inner())
    }

    /// Ask the server about `remote_name`
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Rpc`] if the server fails the call.
    pub async fn file_info(&mut self, remote_name: &str) -> Result<FileInfoResponse> {
        let response = self
            .inner
            .get_file_info(FileInfoRequest {
                filename: remote_name.to_string(),
            })
            .await?;
        Ok(response.into_inner())
    }

    /// Compare `path` with the server's copy named `remote_name`
    ///
    /// # Errors
    ///
    /// Returns an error if the local file cannot be hashed or the query fails.
    pub async fn verify(&mut self, path: &Path, remote_name: &str) -> Result<Verification> {
        let (local_size, local_checksum) = hash_local_file(path).await?;
        let remote = self.file_info(remote_name).await?;
        Ok(Verification {
            local_checksum,
            local_size,
            remote,
        })
    }
}

/// Name a local file is uploaded under when none is given
///
/// # Errors
///
/// Returns [`ClientError::NoFileName`] for paths like `/` or `..`.
pub fn remote_name_for(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| ClientError::NoFileName(path.to_path_buf()))
}

/// Number of chunks a file of `file_size` bytes is split into
pub fn total_chunks_for(file_size: u64, chunk_size: usize) -> i64 {
    let chunks = file_size.div_ceil(chunk_size.max(1) as u64).max(1);
    i64::try_from(chunks).unwrap_or(i64::MAX)
}

/// Size and BLAKE3 digest of a local file
///
/// Hashing runs on the blocking pool with bounded reads.
///
/// # Errors
///
/// Returns [`ClientError::Io`] if the file cannot be read.
pub async fn hash_local_file(path: &Path) -> Result<(u64, String)> {
    let io_err = |source| ClientError::Io {
        path: path.to_path_buf(),
        source,
    };
    let size = tokio::fs::metadata(path).await.map_err(io_err)?.len();

    let owned = path.to_path_buf();
    let checksum = tokio::task::spawn_blocking(move || checksum_file(&owned))
        .await
        .map_err(|e| ClientError::Task(e.to_string()))?
        .map_err(io_err)?;
    Ok((size, checksum))
}

#[allow(clippy::too_many_arguments)]
async fn read_chunks(
    mut file: File,
    path: PathBuf,
    file_size: u64,
    filename: String,
    chunk_size: usize,
    total_chunks: i64,
    tx: mpsc::Sender<FileChunk>,
    progress: TransferProgress,
) -> Result<(u64, String)> {
    let mut checksum = ChecksumAccumulator::new();
    let mut sent = 0u64;

    for chunk_number in 1..=total_chunks {
        let mut data = vec![0u8; chunk_size];
        let n = read_full(&mut file, &mut data)
            .await
            .map_err(|source| ClientError::Io {
                path: path.clone(),
                source,
            })?;
        data.truncate(n);

        let is_last_chunk = chunk_number == total_chunks;
        // Short reads before the last chunk mean the file shrank
        if (n == 0 && file_size > 0) || (!is_last_chunk && n < chunk_size) {
            return Err(ClientError::FileChanged {
                path,
                expected: file_size,
                actual: sent + n as u64,
            });
        }

        checksum.update(&data);
        sent += n as u64;

        let chunk = FileChunk {
            filename: filename.clone(),
            data,
            chunk_number,
            total_chunks,
            is_last_chunk,
        };
        if tx.send(chunk).await.is_err() {
            // Server ended the call early; its response says why
            tracing::debug!("Stream closed by server after {} bytes", sent);
            break;
        }
        progress.inc(n as u64);
    }

    Ok((sent, checksum.finalize()))
}

async fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
