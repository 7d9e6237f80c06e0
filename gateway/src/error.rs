use std::time::Duration;

use thiserror::Error;
use tonic::Status;
use utilities::worker_pool::PoolError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("no datanodes configured")]
    NoNodes,
    #[error("datanode {addrs} unreachable during startup: {reason}")]
    Probe { addrs: String, reason: String },
    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("stream closed before the metadata frame")]
    MissingMetadata,
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("metadata frame received after the upload started")]
    UnexpectedMetadata,
    #[error("frame carries no data")]
    EmptyFrame,
    #[error("frame of {len} bytes exceeds the chunk size of {chunk_size} bytes")]
    FrameTooLarge { len: u64, chunk_size: u64 },
    #[error("received {received} bytes but the upload declared {expected}")]
    Overflow { expected: u64, received: u64 },
    #[error(
        "frame {chunk_number} carries {len} bytes, only the last frame may be shorter than {chunk_size} bytes"
    )]
    Misaligned {
        chunk_number: u64,
        len: u64,
        chunk_size: u64,
    },
    #[error("stream closed after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
    #[error("error while reading the upload stream: {0}")]
    Transport(String),
    #[error("upload cancelled")]
    Cancelled,
    #[error("error while dispatching chunk: {0}")]
    Dispatch(#[from] GatewayError),
    #[error("chunk forwarder stopped: {0}")]
    Forwarder(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DownloadError {
    #[error("no chunks found for upload {0}")]
    NotFound(String),
    #[error("upload {upload_id} is missing chunks {missing:?}")]
    MissingChunks { upload_id: String, missing: Vec<u64> },
    #[error("reassembled {actual} bytes but the upload declared {expected}")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("download timed out after {0:?}")]
    TimedOut(Duration),
    #[error("download cancelled")]
    Cancelled,
}

impl From<SessionError> for Status {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::MissingMetadata
            | SessionError::InvalidMetadata(_)
            | SessionError::UnexpectedMetadata
            | SessionError::EmptyFrame
            | SessionError::FrameTooLarge { .. }
            | SessionError::Overflow { .. }
            | SessionError::Misaligned { .. } => Status::invalid_argument(e.to_string()),
            SessionError::Truncated { .. } | SessionError::Transport(_) => {
                Status::aborted(e.to_string())
            }
            SessionError::Cancelled | SessionError::Dispatch(_) => {
                Status::unavailable(e.to_string())
            }
            SessionError::Forwarder(_) => Status::internal(e.to_string()),
        }
    }
}

impl From<DownloadError> for Status {
    fn from(e: DownloadError) -> Self {
        match e {
            DownloadError::NotFound(_) => Status::not_found(e.to_string()),
            DownloadError::MissingChunks { .. } | DownloadError::SizeMismatch { .. } => {
                Status::data_loss(e.to_string())
            }
            DownloadError::TimedOut(_) => Status::deadline_exceeded(e.to_string()),
            DownloadError::Cancelled => Status::unavailable(e.to_string()),
        }
    }
}
