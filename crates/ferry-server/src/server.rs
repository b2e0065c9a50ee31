//! Server bootstrap.

use crate::config::{ConfigError, ServerConfig};
use crate::proto::file_transfer_service_server::FileTransferServiceServer;
use crate::service::{ServiceOptions, TransferService};
use ferry_core::{FsStorage, Storage, StorageError};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::transport::server::Router;

/// Errors raised while starting or running the server
#[derive(Debug, Error)]
pub enum ServerError {
    /// Configuration was rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Upload directory could not be prepared
    #[error("storage setup failed: {0}")]
    Storage(#[from] StorageError),

    /// Transport failed to bind or serve
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

/// A configured, not yet listening, Ferry server
pub struct FerryServer {
    config: ServerConfig,
    service: TransferService,
}

impl FerryServer {
    /// Validate `config`, create the upload directory and build the service
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] for invalid settings and
    /// [`ServerError::Storage`] if the upload directory cannot be created.
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let storage = FsStorage::create(&config.storage.upload_dir)
            .await?
            .with_read_buffer_size(config.storage.read_buffer_size);
        Ok(Self::with_storage(config, Arc::new(storage)))
    }

    /// Build a server over an existing storage backend
    pub fn with_storage(config: ServerConfig, storage: Arc<dyn Storage>) -> Self {
        let options = ServiceOptions {
            idle_chunk_timeout: config.idle_chunk_timeout(),
            progress_log_interval: config.transfer.progress_log_interval,
            max_concurrent_transfers: config.server.max_concurrent_transfers,
            exclusive_filenames: config.transfer.exclusive_filenames,
        };
        Self {
            service: TransferService::new(storage, options),
            config,
        }
    }

    /// The transfer service this server exposes
    pub fn service(&self) -> &TransferService {
        &self.service
    }

    fn router(&self) -> Router {
        let limit = self.config.server.max_message_size;
        let service = FileTransferServiceServer::new(self.service.clone())
            .max_decoding_message_size(limit)
            .max_encoding_message_size(limit);

        Server::builder()
            .http2_keepalive_interval(Some(self.config.keepalive_interval()))
            .http2_keepalive_timeout(Some(self.config.keepalive_timeout()))
            .add_service(service)
    }

    /// Serve on the configured address until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] if binding or serving fails.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        let addr: SocketAddr = self.config.listen_addr()?;
        self.log_startup(addr);
        self.router().serve_with_shutdown(addr, shutdown).await?;
        tracing::info!("Server stopped");
        Ok(())
    }

    /// Serve on an already bound listener until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] if serving fails.
    pub async fn serve_with_listener<F>(
        self,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<(), ServerError>
    where
        F: Future<Output = ()> + Send,
    {
        if let Ok(addr) = listener.local_addr() {
            self.log_startup(addr);
        }
        self.router()
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
            .await?;
        tracing::info!("Server stopped");
        Ok(())
    }

    fn log_startup(&self, addr: SocketAddr) {
        tracing::info!("Ferry server listening on {}", addr);
        tracing::info!(
            "Upload directory: {}",
            self.config.storage.upload_dir.display()
        );
        tracing::info!(
            "Max message size: {} MiB, max concurrent transfers: {}, idle timeout: {}s",
            self.config.server.max_message_size / (1024 * 1024),
            self.config.server.max_concurrent_transfers,
            self.config.transfer.idle_chunk_timeout_secs
        );
    }
}
