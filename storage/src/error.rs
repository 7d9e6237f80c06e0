use utilities::chunk::ChunkValidationError;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("chunk {chunk_number} of upload {upload_id} not found")]
    NotFound { upload_id: String, chunk_number: u64 },

    #[error("invalid upload id {0:?}")]
    InvalidUploadId(String),

    #[error("invalid chunk: {0}")]
    InvalidChunk(#[from] ChunkValidationError),

    #[error("store capacity exceeded: need {needed} bytes, only {available} available")]
    CapacityExceeded { needed: u64, available: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("chunk metadata is corrupt: {0}")]
    Metadata(#[from] serde_json::Error),
}
