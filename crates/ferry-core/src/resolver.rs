//! File info queries against storage.

use crate::checksum::ChecksumAccumulator;
use crate::chunk::FileInfo;
use crate::error::{Result, TransferError};
use crate::storage::{Storage, StorageError};
use crate::validator::ChunkValidator;
use std::sync::Arc;

/// Answers "does this file exist, how big is it, what is its checksum"
///
/// Reads the file fresh on every call. A file that is still being written
/// reports whatever is on disk at the time of the query.
pub struct FileInfoResolver {
    storage: Arc<dyn Storage>,
}

impl FileInfoResolver {
    /// Create a resolver over `storage`
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Look up `filename`
    ///
    /// A missing file is not an error: it yields [`FileInfo::missing`].
    /// Neither is a name no upload could ever have stored (empty, nested,
    /// or otherwise refused by [`ChunkValidator::validate_filename`]).
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::StorageUnavailable`] if storage cannot be read.
    pub async fn resolve(&self, filename: &str) -> Result<FileInfo> {
        if let Err(rejection) = ChunkValidator::validate_filename(filename) {
            tracing::debug!("File info for unstorable name: {}", rejection);
            return Ok(FileInfo::missing());
        }

        if !self
            .storage
            .exists(filename)
            .await
            .map_err(TransferError::unavailable)?
        {
            return Ok(FileInfo::missing());
        }

        match self.read_info(filename).await {
            Ok(info) => Ok(info),
            // Deleted between the existence check and the read
            Err(StorageError::NotFound(_)) => {
                tracing::debug!("{} vanished while computing its checksum", filename);
                Ok(FileInfo::missing())
            }
            Err(e) => Err(TransferError::unavailable(e)),
        }
    }

    async fn read_info(&self, filename: &str) -> std::result::Result<FileInfo, StorageError> {
        let file_size = self.storage.size(filename).await?;
        let mut reader = self.storage.open_for_read(filename).await?;

        let mut checksum = ChecksumAccumulator::new();
        while let Some(block) = reader.read_chunk().await? {
            checksum.update(&block);
        }

        Ok(FileInfo {
            exists: true,
            file_size,
            checksum: checksum.finalize(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::checksum_bytes;
    use crate::storage::FsStorage;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_existing_file() {
        let dir = TempDir::new().unwrap();
        let content = vec![0x5au8; 200_000];
        std::fs::write(dir.path().join("blob.bin"), &content).unwrap();
        let resolver = FileInfoResolver::new(Arc::new(
            FsStorage::new(dir.path()).with_read_buffer_size(4096),
        ));

        let info = resolver.resolve("blob.bin").await.unwrap();
        assert!(info.exists);
        assert_eq!(info.file_size, 200_000);
        assert_eq!(info.checksum, checksum_bytes(&content));
    }

    #[tokio::test]
    async fn test_empty_file_exists() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("empty"), b"").unwrap();
        let resolver = FileInfoResolver::new(Arc::new(FsStorage::new(dir.path())));

        let info = resolver.resolve("empty").await.unwrap();
        assert!(info.exists);
        assert_eq!(info.file_size, 0);
        assert_eq!(info.checksum, checksum_bytes(b""));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let resolver = FileInfoResolver::new(Arc::new(FsStorage::new(dir.path())));

        assert_eq!(
            resolver.resolve("never-uploaded.bin").await.unwrap(),
            FileInfo::missing()
        );
    }

    #[tokio::test]
    async fn test_unstorable_names_report_missing() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub").join("x.bin"), b"nested").unwrap();
        std::fs::write(dir.path().join("secret"), b"outside").unwrap();
        let root = dir.path().join("uploads");
        std::fs::create_dir(&root).unwrap();
        let resolver = FileInfoResolver::new(Arc::new(FsStorage::new(&root)));

        for name in ["", "   ", ".", "..", "../secret", "sub/x.bin", "sub\\x.bin", "nul\0byte"] {
            assert_eq!(
                resolver.resolve(name).await.unwrap(),
                FileInfo::missing(),
                "{name:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_unavailable_storage() {
        let dir = TempDir::new().unwrap();
        let resolver =
            FileInfoResolver::new(Arc::new(FsStorage::new(dir.path().join("missing"))));

        assert!(matches!(
            resolver.resolve("a.bin").await,
            Err(TransferError::StorageUnavailable(_))
        ));
    }
}
