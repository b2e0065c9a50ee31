//! Registry of in-progress transfers.
//!
//! Each inbound stream gets a [`StreamId`] that is never reused for the life
//! of the registry. Sessions are keyed by that id, so two streams naming the
//! same file never share state. On top of that the registry can hold an
//! advisory claim per filename so that a second concurrent writer is refused
//! instead of interleaving bytes into the same file.

use crate::chunk::Chunk;
use crate::error::{Result, TransferError};
use crate::session::TransferSession;
use crate::storage::Storage;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

/// Identifier of one inbound stream
pub type StreamId = u64;

struct SessionEntry {
    filename: String,
    session: Arc<Mutex<TransferSession>>,
}

/// Concurrent map of active transfer sessions
///
/// Thread-safe; the service shares one instance across every stream.
pub struct TransferSessionRegistry {
    storage: Arc<dyn Storage>,
    sessions: DashMap<StreamId, SessionEntry>,
    claims: DashMap<String, StreamId>,
    next_stream_id: AtomicU64,
    exclusive_filenames: bool,
}

impl TransferSessionRegistry {
    /// Create a registry whose sessions write through `storage`
    ///
    /// Filename claims are enabled by default.
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            sessions: DashMap::new(),
            claims: DashMap::new(),
            next_stream_id: AtomicU64::new(1),
            exclusive_filenames: true,
        }
    }

    /// Enable or disable per-filename claims
    #[must_use]
    pub fn with_exclusive_filenames(mut self, exclusive: bool) -> Self {
        self.exclusive_filenames = exclusive;
        self
    }

    /// Storage backend shared by all sessions
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Allocate a fresh stream id wrapped in a lease
    ///
    /// Dropping the lease removes whatever session was registered under the
    /// id, including when the owning task is cancelled.
    pub fn open_stream(self: &Arc<Self>) -> StreamLease {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        StreamLease {
            registry: Arc::clone(self),
            stream_id,
        }
    }

    /// Return the session for `stream_id`, creating it from `first_chunk`
    ///
    /// Creation opens the destination for writing. The first chunk must have
    /// been validated already.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::FilenameBusy`] if another stream holds the
    /// filename, or [`TransferError::StorageUnavailable`] if the destination
    /// cannot be opened.
    pub async fn get_or_create(
        &self,
        stream_id: StreamId,
        first_chunk: &Chunk,
    ) -> Result<Arc<Mutex<TransferSession>>> {
        if let Some(entry) = self.sessions.get(&stream_id) {
            return Ok(Arc::clone(&entry.session));
        }

        let filename = first_chunk.filename.clone();
        if self.exclusive_filenames {
            self.claim(&filename, stream_id)?;
        }

        let session = match TransferSession::create(self.storage.as_ref(), first_chunk).await {
            Ok(session) => Arc::new(Mutex::new(session)),
            Err(e) => {
                self.release_claim(&filename, stream_id);
                return Err(e);
            }
        };

        self.sessions.insert(
            stream_id,
            SessionEntry {
                filename,
                session: Arc::clone(&session),
            },
        );
        tracing::debug!(
            "Registered stream {} ({} active)",
            stream_id,
            self.sessions.len()
        );

        Ok(session)
    }

    /// Remove the session for `stream_id` and release its filename claim
    ///
    /// Idempotent.
    pub fn remove(&self, stream_id: StreamId) -> Option<Arc<Mutex<TransferSession>>> {
        let Some((_, entry)) = self.sessions.remove(&stream_id) else {
            // Cancelled between claiming and registering
            self.claims.retain(|_, owner| *owner != stream_id);
            return None;
        };
        self.release_claim(&entry.filename, stream_id);
        tracing::debug!(
            "Removed stream {} ({} active)",
            stream_id,
            self.sessions.len()
        );
        Some(entry.session)
    }

    /// Number of registered sessions
    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Whether some stream currently holds a claim on `filename`
    pub fn is_claimed(&self, filename: &str) -> bool {
        self.claims.contains_key(filename)
    }

    fn claim(&self, filename: &str, stream_id: StreamId) -> Result<()> {
        match self.claims.entry(filename.to_string()) {
            Entry::Occupied(owner) if *owner.get() != stream_id => {
                Err(TransferError::FilenameBusy(filename.to_string()))
            }
            Entry::Occupied(_) => Ok(()),
            Entry::Vacant(slot) => {
                slot.insert(stream_id);
                Ok(())
            }
        }
    }

    fn release_claim(&self, filename: &str, stream_id: StreamId) {
        self.claims.remove_if(filename, |_, owner| *owner == stream_id);
    }
}

/// Ownership of one stream id
///
/// Removes the stream's session from the registry on drop.
pub struct StreamLease {
    registry: Arc<TransferSessionRegistry>,
    stream_id: StreamId,
}

impl StreamLease {
    /// Id allocated for this stream
    pub fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Registry the lease belongs to
    pub fn registry(&self) -> &Arc<TransferSessionRegistry> {
        &self.registry
    }
}

impl Drop for StreamLease {
    fn drop(&mut self) {
        self.registry.remove(self.stream_id);
    }
}

impl std::fmt::Debug for StreamLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamLease")
            .field("stream_id", &self.stream_id)
            .finish()
    }
}
