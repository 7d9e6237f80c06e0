use async_trait::async_trait;
use utilities::chunk::Chunk;

use crate::error::StoreError;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Node side persistence, chunks are keyed by `(upload_id, chunk_number)`.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Validates and persists one chunk, replacing a chunk stored under the same key.
    /// Returns the number of payload bytes written.
    async fn store(&self, chunk: &Chunk) -> Result<u64>;
    async fn used_bytes(&self) -> Result<u64>;
    fn capacity_bytes(&self) -> u64;
    /// Stored chunk numbers of an upload in ascending order, empty if the upload is unknown.
    async fn chunk_numbers(&self, upload_id: &str) -> Result<Vec<u64>>;
    async fn read(&self, upload_id: &str, chunk_number: u64) -> Result<Chunk>;
}

// upload ids become directory names, only accept what a uuid can contain
pub fn check_upload_id(upload_id: &str) -> Result<()> {
    let valid = !upload_id.is_empty()
        && upload_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidUploadId(upload_id.to_owned()))
    }
}
