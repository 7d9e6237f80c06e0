use proto::messages::ChunkMessage;

pub const DEFAULT_CHUNK_SIZE: u64 = 50 * 1024;

/// One fragment of an uploaded file.
///
/// `chunk_number` is 1-based, every chunk of an upload carries the same
/// `upload_id`, `total_chunks`, `total_file_size` and `filename`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub upload_id: String,
    pub chunk_number: u64,
    pub total_chunks: u64,
    pub total_file_size: u64,
    pub filename: String,
    pub data: Vec<u8>,
}

// `chunk_size` is non zero, configuration loading rejects zero
pub fn total_chunks(total_file_size: u64, chunk_size: u64) -> u64 {
    total_file_size.div_ceil(chunk_size)
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ChunkValidationError {
    #[error("upload id is empty")]
    MissingUploadId,
    #[error("filename is empty")]
    MissingFilename,
    #[error("chunk number {chunk_number} is outside 1..={total_chunks}")]
    ChunkNumberOutOfRange { chunk_number: u64, total_chunks: u64 },
    #[error("chunk carries no data")]
    EmptyData,
    #[error("chunk carries {len} bytes but the whole file is {total_file_size} bytes")]
    DataLargerThanFile { len: u64, total_file_size: u64 },
    #[error("{total_chunks} chunks cannot make up a file of {total_file_size} bytes")]
    TooManyChunks { total_chunks: u64, total_file_size: u64 },
}

impl Chunk {
    pub fn len(&self) -> u64 {
        self.data.len() as u64
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn validate(&self) -> Result<(), ChunkValidationError> {
        if self.upload_id.is_empty() {
            return Err(ChunkValidationError::MissingUploadId);
        }
        if self.filename.is_empty() {
            return Err(ChunkValidationError::MissingFilename);
        }
        if self.chunk_number == 0 || self.chunk_number > self.total_chunks {
            return Err(ChunkValidationError::ChunkNumberOutOfRange {
                chunk_number: self.chunk_number,
                total_chunks: self.total_chunks,
            });
        }
        if self.data.is_empty() {
            return Err(ChunkValidationError::EmptyData);
        }
        if self.len() > self.total_file_size {
            return Err(ChunkValidationError::DataLargerThanFile {
                len: self.len(),
                total_file_size: self.total_file_size,
            });
        }
        // every chunk holds at least one byte
        if self.total_chunks > self.total_file_size {
            return Err(ChunkValidationError::TooManyChunks {
                total_chunks: self.total_chunks,
                total_file_size: self.total_file_size,
            });
        }
        Ok(())
    }
}

impl From<ChunkMessage> for Chunk {
    fn from(message: ChunkMessage) -> Self {
        Self {
            upload_id: message.upload_id,
            chunk_number: message.chunk_number,
            total_chunks: message.total_chunks,
            total_file_size: message.total_file_size,
            filename: message.filename,
            data: message.data,
        }
    }
}

impl From<Chunk> for ChunkMessage {
    fn from(chunk: Chunk) -> Self {
        Self {
            upload_id: chunk.upload_id,
            chunk_number: chunk.chunk_number,
            total_chunks: chunk.total_chunks,
            total_file_size: chunk.total_file_size,
            filename: chunk.filename,
            data: chunk.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(chunk_number: u64, total_chunks: u64, data: &[u8]) -> Chunk {
        Chunk {
            upload_id: "upload".to_owned(),
            chunk_number,
            total_chunks,
            total_file_size: 100,
            filename: "file.bin".to_owned(),
            data: data.to_vec(),
        }
    }

    #[test]
    fn total_chunks_rounds_up() {
        assert_eq!(total_chunks(0, 50), 0);
        assert_eq!(total_chunks(1, 50), 1);
        assert_eq!(total_chunks(50, 50), 1);
        assert_eq!(total_chunks(51, 50), 2);
        assert_eq!(total_chunks(120 * 1024, DEFAULT_CHUNK_SIZE), 3);
    }

    #[test]
    fn validate_rejects_out_of_range_numbers() {
        assert!(chunk(1, 2, b"abc").validate().is_ok());
        assert_eq!(
            chunk(0, 2, b"abc").validate(),
            Err(ChunkValidationError::ChunkNumberOutOfRange {
                chunk_number: 0,
                total_chunks: 2
            })
        );
        assert!(chunk(3, 2, b"abc").validate().is_err());
    }

    #[test]
    fn validate_rejects_more_chunks_than_bytes() {
        assert!(chunk(1, 100, b"a").validate().is_ok());
        assert_eq!(
            chunk(1, 101, b"a").validate(),
            Err(ChunkValidationError::TooManyChunks {
                total_chunks: 101,
                total_file_size: 100
            })
        );
        let mut forged = chunk(1, u64::MAX, b"abc");
        forged.total_file_size = 3;
        assert!(matches!(
            forged.validate(),
            Err(ChunkValidationError::TooManyChunks { .. })
        ));
    }

    #[test]
    fn validate_rejects_missing_fields() {
        let mut missing_id = chunk(1, 1, b"abc");
        missing_id.upload_id.clear();
        assert_eq!(
            missing_id.validate(),
            Err(ChunkValidationError::MissingUploadId)
        );
        let mut missing_name = chunk(1, 1, b"abc");
        missing_name.filename.clear();
        assert_eq!(
            missing_name.validate(),
            Err(ChunkValidationError::MissingFilename)
        );
        assert_eq!(
            chunk(1, 1, b"").validate(),
            Err(ChunkValidationError::EmptyData)
        );
        assert!(matches!(
            chunk(1, 1, &[0u8; 101]).validate(),
            Err(ChunkValidationError::DataLargerThanFile { len: 101, .. })
        ));
    }
}
