use std::sync::Arc;

use proto::{
    NODE_STATE_HEADER,
    generated::datanode::{
        ChunkMessage, FetchChunksRequest, StateRequest, StateResponse, StoreChunkResponse,
        datanode_server::Datanode,
    },
};
use storage::{error::StoreError, storage::ChunkStore};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status, metadata::MetadataValue};
use utilities::{
    chunk::Chunk,
    logger::{Instrument, debug, error, instrument, trace, tracing, warn},
};

// chunks read ahead of a slow fetch consumer
const FETCH_BUFFER: usize = 4;

fn store_error_status(e: StoreError) -> Status {
    match e {
        StoreError::InvalidChunk(_) | StoreError::InvalidUploadId(_) => {
            Status::invalid_argument(e.to_string())
        }
        StoreError::NotFound { .. } => Status::not_found(e.to_string()),
        StoreError::CapacityExceeded { .. } => Status::resource_exhausted(e.to_string()),
        StoreError::Io(_) | StoreError::Metadata(_) => Status::internal(e.to_string()),
    }
}

pub struct GatewayHandler {
    store: Arc<dyn ChunkStore>,
}
impl GatewayHandler {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }
}

#[tonic::async_trait]
impl Datanode for GatewayHandler {
    #[instrument(name = "grpc_gateway_store_chunk", skip(self, request), fields(upload_id = %request.get_ref().upload_id, chunk_number = request.get_ref().chunk_number))]
    async fn store_chunk(
        &self,
        request: Request<ChunkMessage>,
    ) -> Result<Response<StoreChunkResponse>, Status> {
        let chunk = Chunk::from(request.into_inner());
        if let Err(e) = chunk.validate() {
            warn!(error = %e, "rejecting invalid chunk");
            return Err(Status::invalid_argument(e.to_string()));
        }
        match self.store.store(&chunk).await {
            Ok(bytes_received) => {
                debug!(bytes_received, "chunk stored");
                Ok(Response::new(StoreChunkResponse { bytes_received }))
            }
            Err(e) => {
                error!(error = %e, "error while storing chunk");
                Err(store_error_status(e))
            }
        }
    }

    #[instrument(name = "grpc_gateway_state", skip(self, _request))]
    async fn state(
        &self,
        _request: Request<StateRequest>,
    ) -> Result<Response<StateResponse>, Status> {
        let used_bytes = self.store.used_bytes().await.map_err(store_error_status)?;
        trace!(used_bytes, "reporting node state");
        let mut response = Response::new(StateResponse {
            used_bytes,
            capacity_bytes: self.store.capacity_bytes(),
        });
        response
            .metadata_mut()
            .insert(NODE_STATE_HEADER, MetadataValue::from(used_bytes));
        Ok(response)
    }

    type FetchChunksStream = ReceiverStream<Result<ChunkMessage, Status>>;

    #[instrument(name = "grpc_gateway_fetch_chunks", skip(self, request), fields(upload_id = %request.get_ref().upload_id))]
    async fn fetch_chunks(
        &self,
        request: Request<FetchChunksRequest>,
    ) -> Result<Response<Self::FetchChunksStream>, Status> {
        let upload_id = request.into_inner().upload_id;
        let chunk_numbers = self
            .store
            .chunk_numbers(&upload_id)
            .await
            .map_err(store_error_status)?;
        debug!(count = chunk_numbers.len(), "streaming stored chunks");

        let (tx, rx) = mpsc::channel(FETCH_BUFFER);
        let store = self.store.clone();
        tokio::spawn(
            async move {
                for chunk_number in chunk_numbers {
                    let message = store
                        .read(&upload_id, chunk_number)
                        .await
                        .map(ChunkMessage::from)
                        .map_err(store_error_status);
                    let failed = message.is_err();
                    if tx.send(message).await.is_err() {
                        trace!("fetch receiver dropped");
                        break;
                    }
                    if failed {
                        break;
                    }
                }
            }
            .in_current_span(),
        );
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::memory_storage::MemoryStorage;
    use tokio_stream::StreamExt;

    fn message(upload_id: &str, chunk_number: u64, data: &[u8]) -> ChunkMessage {
        ChunkMessage {
            upload_id: upload_id.to_owned(),
            chunk_number,
            total_chunks: 3,
            total_file_size: 30,
            filename: "notes.txt".to_owned(),
            data: data.to_vec(),
        }
    }

    fn handler() -> GatewayHandler {
        GatewayHandler::new(Arc::new(MemoryStorage::new(1024)))
    }

    #[tokio::test]
    async fn stores_valid_chunks_and_rejects_invalid_ones() {
        let handler = handler();
        let response = handler
            .store_chunk(Request::new(message("u1", 1, b"0123456789")))
            .await
            .unwrap();
        assert_eq!(response.get_ref().bytes_received, 10);

        let status = handler
            .store_chunk(Request::new(message("u1", 4, b"x")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);

        let status = handler
            .store_chunk(Request::new(message("", 1, b"x")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[tokio::test]
    async fn full_store_reports_resource_exhausted() {
        let handler = GatewayHandler::new(Arc::new(MemoryStorage::new(4)));
        let status = handler
            .store_chunk(Request::new(message("u1", 1, b"0123456789")))
            .await
            .unwrap_err();
        assert_eq!(status.code(), tonic::Code::ResourceExhausted);
    }

    #[tokio::test]
    async fn state_carries_used_bytes_header() {
        let handler = handler();
        handler
            .store_chunk(Request::new(message("u1", 1, b"0123456789")))
            .await
            .unwrap();
        handler
            .store_chunk(Request::new(message("u2", 1, b"abcde")))
            .await
            .unwrap();

        let response = handler.state(Request::new(StateRequest {})).await.unwrap();
        let header = response
            .metadata()
            .get(NODE_STATE_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_owned();
        assert_eq!(header, "15");
        assert_eq!(response.get_ref().used_bytes, 15);
        assert_eq!(response.get_ref().capacity_bytes, 1024);
    }

    #[tokio::test]
    async fn fetch_streams_every_chunk_of_the_upload() {
        let handler = handler();
        for (n, data) in [(2, &b"world"[..]), (1, &b"hello"[..]), (3, &b"!"[..])] {
            handler
                .store_chunk(Request::new(message("u1", n, data)))
                .await
                .unwrap();
        }
        handler
            .store_chunk(Request::new(message("u2", 1, b"other")))
            .await
            .unwrap();

        let stream = handler
            .fetch_chunks(Request::new(FetchChunksRequest {
                upload_id: "u1".to_owned(),
            }))
            .await
            .unwrap()
            .into_inner();
        let chunks: Vec<ChunkMessage> = stream.map(|m| m.unwrap()).collect().await;
        let numbers: Vec<u64> = chunks.iter().map(|c| c.chunk_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(chunks[0].data, b"hello");
        assert!(chunks.iter().all(|c| c.upload_id == "u1"));
    }

    #[tokio::test]
    async fn fetch_of_unknown_upload_is_empty() {
        let stream = handler()
            .fetch_chunks(Request::new(FetchChunksRequest {
                upload_id: "nothing-here".to_owned(),
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(stream.collect::<Vec<_>>().await.len(), 0);
    }
}
