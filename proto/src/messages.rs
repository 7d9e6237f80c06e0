//! Wire messages shared by the gateway, the datanodes and the client.
//!
//! Field tags are part of the wire contract, never reuse a retired tag.

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ChunkMessage {
    #[prost(string, tag = "1")]
    pub upload_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub chunk_number: u64,
    #[prost(uint64, tag = "3")]
    pub total_chunks: u64,
    #[prost(uint64, tag = "4")]
    pub total_file_size: u64,
    #[prost(string, tag = "5")]
    pub filename: ::prost::alloc::string::String,
    #[prost(bytes = "vec", tag = "6")]
    pub data: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StoreChunkResponse {
    #[prost(uint64, tag = "1")]
    pub bytes_received: u64,
}

#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StateRequest {}

// the authoritative value is also sent in the `x-node-state` response header
#[derive(Clone, Copy, PartialEq, ::prost::Message)]
pub struct StateResponse {
    #[prost(uint64, tag = "1")]
    pub used_bytes: u64,
    #[prost(uint64, tag = "2")]
    pub capacity_bytes: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FetchChunksRequest {
    #[prost(string, tag = "1")]
    pub upload_id: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UploadMetadata {
    #[prost(uint64, tag = "1")]
    pub total_file_size: u64,
    #[prost(string, tag = "2")]
    pub filename: ::prost::alloc::string::String,
}

/// First frame of an upload stream carries metadata, every later frame carries data.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct UploadFrame {
    #[prost(oneof = "upload_frame::Frame", tags = "1, 2")]
    pub frame: ::core::option::Option<upload_frame::Frame>,
}

pub mod upload_frame {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Frame {
        #[prost(message, tag = "1")]
        Metadata(super::UploadMetadata),
        #[prost(bytes, tag = "2")]
        Data(::prost::alloc::vec::Vec<u8>),
    }
}

#[derive(Clone, PartialEq, Eq, ::prost::Message)]
pub struct UploadSummary {
    #[prost(string, tag = "1")]
    pub upload_id: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub total_chunks: u64,
    #[prost(uint64, tag = "3")]
    pub bytes_received: u64,
    /// Chunks whose dispatch to a datanode failed, the upload is incomplete when non zero.
    #[prost(uint64, tag = "4")]
    pub failed_chunks: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DownloadRequest {
    #[prost(string, tag = "1")]
    pub upload_id: ::prost::alloc::string::String,
}
