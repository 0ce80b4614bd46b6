use std::io::Cursor;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::StorageError;
use super::location::BlobLocation;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Key-addressed blob storage.
///
/// Writes and deletes are idempotent and never participate in database
/// transactions; callers clean up blobs they no longer reference.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes at `location` and return the location written.
    async fn put(
        &self,
        location: &BlobLocation,
        data: &[u8],
    ) -> Result<BlobLocation, StorageError> {
        let reader: BoxReader = Box::new(Cursor::new(data.to_vec()));
        self.put_stream(location, reader).await
    }

    /// Store data from an async reader at `location`.
    async fn put_stream(
        &self,
        location: &BlobLocation,
        reader: BoxReader,
    ) -> Result<BlobLocation, StorageError>;

    /// Retrieve all bytes stored at `location`.
    async fn get(&self, location: &BlobLocation) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.get_stream(location).await?;
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Retrieve a blob as a streaming async reader.
    async fn get_stream(&self, location: &BlobLocation) -> Result<BoxReader, StorageError>;

    /// Check whether a blob exists.
    async fn exists(&self, location: &BlobLocation) -> Result<bool, StorageError>;

    /// Delete a blob.
    ///
    /// Returns `true` if the blob was deleted, `false` if it did not exist.
    async fn delete(&self, location: &BlobLocation) -> Result<bool, StorageError>;

    /// Get the size of a blob in bytes.
    async fn size(&self, location: &BlobLocation) -> Result<u64, StorageError>;
}
