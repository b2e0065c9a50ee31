//! Storage backend abstraction.
//!
//! The engine only needs append-only writes and sequential reads, so the
//! backend surface is deliberately small:
//!
//! ```text
//! open_for_write(name) -> writer      writer.append(bytes), writer.close()
//! open_for_read(name)  -> reader      reader.read_chunk() -> bytes | EOF
//! exists(name), size(name)
//! ```
//!
//! [`FsStorage`] stores each file directly under a root directory.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

use crate::DEFAULT_READ_BUFFER_SIZE;

/// Errors raised by a storage backend
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend itself cannot be reached
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// The named file does not exist
    #[error("file not found: {0}")]
    NotFound(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Append handle to a destination file
#[async_trait]
pub trait StorageWriter: Send {
    /// Append bytes at the current end of the file
    async fn append(&mut self, data: &[u8]) -> StorageResult<()>;

    /// Flush, sync and release the handle
    async fn close(self: Box<Self>) -> StorageResult<()>;
}

/// Sequential read handle to a stored file
#[async_trait]
pub trait StorageReader: Send {
    /// Read the next block; `None` at end of file
    async fn read_chunk(&mut self) -> StorageResult<Option<Vec<u8>>>;
}

/// Raw storage primitives used by sessions and the file info resolver
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create or truncate `name` and return an append handle
    async fn open_for_write(&self, name: &str) -> StorageResult<Box<dyn StorageWriter>>;

    /// Whether `name` exists as a regular file
    async fn exists(&self, name: &str) -> StorageResult<bool>;

    /// Size of `name` in bytes
    async fn size(&self, name: &str) -> StorageResult<u64>;

    /// Open `name` for sequential reads
    async fn open_for_read(&self, name: &str) -> StorageResult<Box<dyn StorageReader>>;
}

/// Filesystem storage rooted at a single upload directory
///
/// Names are joined directly onto the root; callers validate them first
/// (see [`ChunkValidator::validate_filename`](crate::ChunkValidator::validate_filename)).
#[derive(Debug, Clone)]
pub struct FsStorage {
    root: PathBuf,
    read_buffer_size: usize,
}

impl FsStorage {
    /// Create a backend over an existing directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    /// Create the root directory if needed and return a backend over it
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Unavailable`] if the directory cannot be created.
    pub async fn create(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await.map_err(|e| {
            StorageError::Unavailable(format!("cannot create {}: {e}", root.display()))
        })?;
        Ok(Self::new(root))
    }

    /// Set the block size used by readers
    #[must_use]
    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.max(1);
        self
    }

    /// Upload directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    async fn check_root(&self) -> StorageResult<()> {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::Unavailable(format!(
                "{} is not a directory",
                self.root.display()
            ))),
            Err(e) => Err(StorageError::Unavailable(format!(
                "{}: {e}",
                self.root.display()
            ))),
        }
    }

    fn not_found_or_io(name: &str, err: io::Error) -> StorageError {
        if err.kind() == io::ErrorKind::NotFound {
            StorageError::NotFound(name.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}

#[async_trait]
impl Storage for FsStorage {
    async fn open_for_write(&self, name: &str) -> StorageResult<Box<dyn StorageWriter>> {
        self.check_root().await?;
        let file = File::create(self.path_for(name)).await?;
        Ok(Box::new(FsWriter {
            file: BufWriter::new(file),
        }))
    }

    async fn exists(&self, name: &str) -> StorageResult<bool> {
        self.check_root().await?;
        match tokio::fs::metadata(self.path_for(name)).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn size(&self, name: &str) -> StorageResult<u64> {
        self.check_root().await?;
        let meta = tokio::fs::metadata(self.path_for(name))
            .await
            .map_err(|e| Self::not_found_or_io(name, e))?;
        Ok(meta.len())
    }

    async fn open_for_read(&self, name: &str) -> StorageResult<Box<dyn StorageReader>> {
        self.check_root().await?;
        let file = File::open(self.path_for(name))
            .await
            .map_err(|e| Self::not_found_or_io(name, e))?;
        Ok(Box::new(FsReader {
            file,
            buffer_size: self.read_buffer_size,
        }))
    }
}

struct FsWriter {
    file: BufWriter<File>,
}

#[async_trait]
impl StorageWriter for FsWriter {
    async fn append(&mut self, data: &[u8]) -> StorageResult<()> {
        self.file.write_all(data).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> StorageResult<()> {
        let FsWriter { mut file } = *self;
        file.flush().await?;
        file.get_mut().sync_all().await?;
        Ok(())
    }
}

struct FsReader {
    file: File,
    buffer_size: usize,
}

#[async_trait]
impl StorageReader for FsReader {
    async fn read_chunk(&mut self) -> StorageResult<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.buffer_size];
        let n = self.file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_then_read_back() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path()).with_read_buffer_size(4);

        let mut writer = storage.open_for_write("out.bin").await.unwrap();
        writer.append(b"Hello").await.unwrap();
        writer.append(b" World").await.unwrap();
        writer.close().await.unwrap();

        assert!(storage.exists("out.bin").await.unwrap());
        assert_eq!(storage.size("out.bin").await.unwrap(), 11);

        let mut reader = storage.open_for_read("out.bin").await.unwrap();
        let mut content = Vec::new();
        while let Some(block) = reader.read_chunk().await.unwrap() {
            assert!(block.len() <= 4);
            content.extend_from_slice(&block);
        }
        assert_eq!(content, b"Hello World");
    }

    #[tokio::test]
    async fn test_open_for_write_truncates() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("old.bin"), b"previous contents").unwrap();
        let storage = FsStorage::new(dir.path());

        let mut writer = storage.open_for_write("old.bin").await.unwrap();
        writer.append(b"new").await.unwrap();
        writer.close().await.unwrap();

        assert_eq!(std::fs::read(dir.path().join("old.bin")).unwrap(), b"new");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path());

        assert!(!storage.exists("nope.bin").await.unwrap());
        assert!(matches!(
            storage.size("nope.bin").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            storage.open_for_read("nope.bin").await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_directory_is_not_a_file() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        let storage = FsStorage::new(dir.path());
        assert!(!storage.exists("subdir").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_root_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let storage = FsStorage::new(dir.path().join("gone"));

        assert!(matches!(
            storage.exists("a.bin").await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(matches!(
            storage.open_for_write("a.bin").await,
            Err(StorageError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_create_makes_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("uploads");
        let storage = FsStorage::create(&root).await.unwrap();
        assert!(root.is_dir());
        assert_eq!(storage.root(), root.as_path());
    }
}
