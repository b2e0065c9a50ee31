//! `FileTransferService` implementation.
//!
//! Each `TransferFile` call runs its receive loop in a spawned task:
//!
//! ```text
//! AwaitingFirstChunk ──validate──> Receiving ──last chunk──────> Finalizing ──> Done
//!         │                          │  │                          ^
//!         └─ rejected / closed ──────┼──┴─ rejected / closed / idle┘
//! ```
//!
//! The task keeps running if the client disconnects, so the session is
//! always finalized and its write handle released. Only storage faults at
//! session creation surface as gRPC errors; everything the client caused is
//! reported in-band through `TransferResponse`.

use crate::proto::file_transfer_service_server::FileTransferService;
use crate::proto::{FileChunk, FileInfoRequest, FileInfoResponse, TransferResponse};
use ferry_core::{
    Chunk, ChunkValidator, FileInfo, FileInfoResolver, SessionState, Storage, StreamId,
    TransferError, TransferOutcome, TransferSession, TransferSessionRegistry,
};
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};

/// Tunables for the transfer service
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// How long a stream may go without delivering a chunk
    pub idle_chunk_timeout: Duration,
    /// Log progress every this many chunks (0 disables)
    pub progress_log_interval: u64,
    /// Transfers served at once
    pub max_concurrent_transfers: usize,
    /// Refuse concurrent uploads to one filename
    pub exclusive_filenames: bool,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            idle_chunk_timeout: Duration::from_secs(300),
            progress_log_interval: 100,
            max_concurrent_transfers: 50,
            exclusive_filenames: true,
        }
    }
}

/// gRPC-facing coordinator for uploads and file info queries
#[derive(Clone)]
pub struct TransferService {
    registry: Arc<TransferSessionRegistry>,
    resolver: Arc<FileInfoResolver>,
    permits: Arc<Semaphore>,
    options: ServiceOptions,
}

enum Inbound {
    Chunk(Chunk),
    Closed,
    Failed(Status),
    Idle,
}

impl TransferService {
    /// Create a service writing through `storage`
    pub fn new(storage: Arc<dyn Storage>, options: ServiceOptions) -> Self {
        let registry = TransferSessionRegistry::new(Arc::clone(&storage))
            .with_exclusive_filenames(options.exclusive_filenames);
        Self {
            registry: Arc::new(registry),
            resolver: Arc::new(FileInfoResolver::new(storage)),
            permits: Arc::new(Semaphore::new(options.max_concurrent_transfers.max(1))),
            options,
        }
    }

    /// Registry of in-flight transfers
    pub fn registry(&self) -> &Arc<TransferSessionRegistry> {
        &self.registry
    }

    /// Drive one inbound chunk stream to its terminal outcome
    ///
    /// # Errors
    ///
    /// Only storage faults while opening the destination, a filename claim
    /// conflict or a session contract violation are returned as errors.
    /// Protocol violations and early stream ends become a failed
    /// [`TransferOutcome`].
    pub async fn receive<S>(&self, inbound: S) -> ferry_core::Result<TransferOutcome>
    where
        S: Stream<Item = Result<FileChunk, Status>> + Send,
    {
        let mut inbound = pin!(inbound);
        let lease = self.registry.open_stream();
        let stream_id = lease.stream_id();

        let first = match self.next_chunk(&mut inbound).await {
            Inbound::Chunk(chunk) => chunk,
            Inbound::Closed => {
                tracing::warn!("Stream {} closed before sending a chunk", stream_id);
                return Ok(TransferOutcome::failed("stream ended before the first chunk", 0));
            }
            Inbound::Failed(status) => {
                tracing::warn!("Stream {} failed before the first chunk: {}", stream_id, status);
                return Ok(TransferOutcome::failed(
                    TransferError::StreamTerminatedEarly(status.message().to_string()).to_string(),
                    0,
                ));
            }
            Inbound::Idle => {
                tracing::warn!("Stream {} sent nothing within the idle timeout", stream_id);
                return Ok(TransferOutcome::failed(
                    TransferError::StreamTerminatedEarly("no chunk received".into()).to_string(),
                    0,
                ));
            }
        };

        // Nothing is opened until the first chunk is known to be sane
        if let Err(rejection) = ChunkValidator::validate(&SessionState::initial(&first), &first) {
            tracing::warn!("Stream {} rejected first chunk: {}", stream_id, rejection);
            return Ok(TransferOutcome::failed(
                TransferError::from(rejection).to_string(),
                0,
            ));
        }

        let session = self.registry.get_or_create(stream_id, &first).await?;
        let mut session = session.lock().await;
        tracing::info!(
            "Stream {}: receiving {} ({} chunks)",
            stream_id,
            first.filename,
            first.total_chunks
        );

        let outcome = self
            .run_session(stream_id, &mut session, first, &mut inbound)
            .await?;

        if outcome.success {
            let secs = session.elapsed().as_secs_f64();
            tracing::info!(
                "Stream {}: {} received ({} bytes in {:.2}s, {:.2} MiB/s, blake3 {})",
                stream_id,
                session.filename(),
                outcome.bytes_received,
                secs,
                mib_per_sec(outcome.bytes_received, secs),
                outcome.checksum.as_deref().unwrap_or_default()
            );
        } else {
            tracing::warn!(
                "Stream {}: transfer of {} failed: {}",
                stream_id,
                session.filename(),
                outcome.message
            );
        }

        drop(session);
        drop(lease);
        Ok(outcome)
    }

    async fn run_session<S>(
        &self,
        stream_id: StreamId,
        session: &mut TransferSession,
        first: Chunk,
        inbound: &mut Pin<&mut S>,
    ) -> ferry_core::Result<TransferOutcome>
    where
        S: Stream<Item = Result<FileChunk, Status>> + Send,
    {
        let mut chunk = first;
        loop {
            if let Err(e) = session.apply(&chunk).await {
                tracing::error!("Stream {}: {}", stream_id, e);
                return session.fail(&e).await;
            }
            self.log_progress(stream_id, session);

            if chunk.is_last_chunk {
                return session.finalize(true).await;
            }

            chunk = match self.next_chunk(inbound).await {
                Inbound::Chunk(next) => next,
                Inbound::Closed => {
                    tracing::warn!("Stream {} closed before the last chunk", stream_id);
                    return session.finalize(false).await;
                }
                Inbound::Failed(status) => {
                    tracing::warn!("Stream {} failed: {}", stream_id, status);
                    return session.finalize(false).await;
                }
                Inbound::Idle => {
                    let reason = TransferError::StreamTerminatedEarly(format!(
                        "no chunk received for {}s after {} of {} chunks",
                        self.options.idle_chunk_timeout.as_secs(),
                        session.chunks_applied(),
                        session.declared_total_chunks()
                    ));
                    tracing::warn!("Stream {}: {}", stream_id, reason);
                    return session.fail(&reason).await;
                }
            };

            if let Err(rejection) = ChunkValidator::validate(&session.state(), &chunk) {
                tracing::warn!("Stream {} rejected chunk: {}", stream_id, rejection);
                return session.fail(&rejection.into()).await;
            }
        }
    }

    async fn next_chunk<S>(&self, inbound: &mut Pin<&mut S>) -> Inbound
    where
        S: Stream<Item = Result<FileChunk, Status>> + Send,
    {
        match tokio::time::timeout(self.options.idle_chunk_timeout, inbound.next()).await {
            Err(_) => Inbound::Idle,
            Ok(None) => Inbound::Closed,
            Ok(Some(Err(status))) => Inbound::Failed(status),
            Ok(Some(Ok(message))) => Inbound::Chunk(message.into()),
        }
    }

    fn log_progress(&self, stream_id: StreamId, session: &TransferSession) {
        let interval = self.options.progress_log_interval;
        let applied = session.chunks_applied() as u64;
        if interval > 0 && applied % interval == 0 {
            tracing::info!(
                "Stream {}: {}/{} chunks ({:.1} MiB)",
                stream_id,
                applied,
                session.declared_total_chunks(),
                session.bytes_received() as f64 / (1024.0 * 1024.0)
            );
        }
    }
}

#[tonic::async_trait]
impl FileTransferService for TransferService {
    async fn transfer_file(
        &self,
        request: Request<Streaming<FileChunk>>,
    ) -> Result<Response<TransferResponse>, Status> {
        if let Some(peer) = request.remote_addr() {
            tracing::debug!("Transfer stream opened by {}", peer);
        }

        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Status::unavailable("server is shutting down"))?;

        let inbound = request.into_inner();
        let service = self.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            service.receive(inbound).await
        });

        let result = task
            .await
            .map_err(|e| Status::internal(format!("transfer task failed: {e}")))?;

        Ok(Response::new(outcome_or_status(result)?.into()))
    }

    async fn get_file_info(
        &self,
        request: Request<FileInfoRequest>,
    ) -> Result<Response<FileInfoResponse>, Status> {
        let filename = request.into_inner().filename;
        tracing::debug!("File info requested for {:?}", filename);

        let info = self
            .resolver
            .resolve(&filename)
            .await
            .map_err(status_from_error)?;

        Ok(Response::new(info.into()))
    }
}

/// Report client faults in-band as a failed transfer; everything else
/// becomes a gRPC status
pub fn outcome_or_status(
    result: ferry_core::Result<TransferOutcome>,
) -> Result<TransferOutcome, Status> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) if e.is_client_fault() => Ok(TransferOutcome::failed(e.to_string(), 0)),
        Err(e) => Err(status_from_error(e)),
    }
}

/// Map engine errors that escape the in-band path onto gRPC status codes
pub fn status_from_error(err: TransferError) -> Status {
    match err {
        TransferError::ProtocolViolation(rejection) => Status::invalid_argument(rejection.to_string()),
        TransferError::StreamTerminatedEarly(msg) => Status::cancelled(msg),
        TransferError::StorageUnavailable(msg) => Status::unavailable(msg),
        TransferError::StorageWrite(msg) => Status::internal(msg),
        err @ TransferError::FilenameBusy(_) => Status::aborted(err.to_string()),
        err @ TransferError::ContractViolation(_) => {
            tracing::error!("{}", err);
            Status::internal(err.to_string())
        }
    }
}

fn mib_per_sec(bytes: u64, secs: f64) -> f64 {
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / (1024.0 * 1024.0) / secs
}

fn saturating_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl From<FileChunk> for Chunk {
    fn from(message: FileChunk) -> Self {
        Chunk {
            filename: message.filename,
            data: message.data,
            chunk_number: message.chunk_number,
            total_chunks: message.total_chunks,
            is_last_chunk: message.is_last_chunk,
        }
    }
}

impl From<TransferOutcome> for TransferResponse {
    fn from(outcome: TransferOutcome) -> Self {
        TransferResponse {
            success: outcome.success,
            message: outcome.message,
            bytes_received: saturating_i64(outcome.bytes_received),
        }
    }
}

impl From<FileInfo> for FileInfoResponse {
    fn from(info: FileInfo) -> Self {
        FileInfoResponse {
            exists: info.exists,
            file_size: saturating_i64(info.file_size),
            checksum: info.checksum,
        }
    }
}
