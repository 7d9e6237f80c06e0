use std::error::Error;

use tonic_build::manual::{Builder, Method, Service};

const PROST_CODEC: &str = "tonic::codec::ProstCodec";

fn method(name: &str, route: &str, input: &str, output: &str) -> tonic_build::manual::MethodBuilder {
    Method::builder()
        .name(name)
        .route_name(route)
        .input_type(format!("crate::messages::{input}"))
        .output_type(format!("crate::messages::{output}"))
        .codec_path(PROST_CODEC)
}

fn main() -> Result<(), Box<dyn Error>> {
    // services are described here instead of .proto files so the build does not need protoc,
    // message types live in src/messages.rs
    let datanode = Service::builder()
        .name("Datanode")
        .package("datanode")
        .method(method("store_chunk", "StoreChunk", "ChunkMessage", "StoreChunkResponse").build())
        .method(method("state", "State", "StateRequest", "StateResponse").build())
        .method(
            method("fetch_chunks", "FetchChunks", "FetchChunksRequest", "ChunkMessage")
                .server_streaming()
                .build(),
        )
        .build();

    let gateway = Service::builder()
        .name("Storage")
        .package("gateway")
        .method(
            method("upload", "Upload", "UploadFrame", "UploadSummary")
                .client_streaming()
                .build(),
        )
        .method(
            method("download", "Download", "DownloadRequest", "ChunkMessage")
                .server_streaming()
                .build(),
        )
        .build();

    Builder::new().compile(&[datanode, gateway]);
    println!("cargo:rerun-if-changed=build.rs");
    Ok(())
}
