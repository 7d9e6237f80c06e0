pub mod messages;

pub mod generated {
    pub mod datanode {
        pub use crate::messages::{
            ChunkMessage, FetchChunksRequest, StateRequest, StateResponse, StoreChunkResponse,
        };
        include!(concat!(env!("OUT_DIR"), "/datanode.Datanode.rs"));
    }
    pub mod gateway {
        pub use crate::messages::{
            ChunkMessage, DownloadRequest, UploadFrame, UploadMetadata, UploadSummary,
            upload_frame,
        };
        include!(concat!(env!("OUT_DIR"), "/gateway.Storage.rs"));
    }
}

pub const NODE_STATE_HEADER: &str = "x-node-state";
