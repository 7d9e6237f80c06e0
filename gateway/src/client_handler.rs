use std::{sync::Arc, time::Duration};

use proto::generated::gateway::{
    ChunkMessage, DownloadRequest, UploadFrame, UploadSummary, storage_server::Storage,
};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use utilities::logger::{debug, instrument, trace, tracing};

use crate::{
    download_aggregator::DownloadAggregator, ingest_session::IngestSession,
    storage_gateway::StorageGateway,
};

// chunks buffered towards a slow downloading client
const DOWNLOAD_BUFFER: usize = 4;

pub struct ClientHandler {
    gateway: Arc<StorageGateway>,
    aggregator: DownloadAggregator,
    chunk_size: u64,
    cancel: CancellationToken,
}

impl ClientHandler {
    pub fn new(
        gateway: Arc<StorageGateway>,
        chunk_size: u64,
        download_timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            aggregator: DownloadAggregator::new(
                gateway.clone(),
                chunk_size,
                download_timeout,
                cancel.clone(),
            ),
            gateway,
            chunk_size,
            cancel,
        }
    }
}

#[tonic::async_trait]
impl Storage for ClientHandler {
    #[instrument(name = "grpc_client_upload", skip(self, request))]
    async fn upload(
        &self,
        request: Request<Streaming<UploadFrame>>,
    ) -> Result<Response<UploadSummary>, Status> {
        let frames = request.into_inner();
        let mut session =
            IngestSession::new(self.gateway.clone(), self.chunk_size, self.cancel.child_token());
        let summary = session.run(frames).await?;
        Ok(Response::new(summary))
    }

    type DownloadStream = ReceiverStream<Result<ChunkMessage, Status>>;

    #[instrument(name = "grpc_client_download", skip(self, request), fields(upload_id = %request.get_ref().upload_id))]
    async fn download(
        &self,
        request: Request<DownloadRequest>,
    ) -> Result<Response<Self::DownloadStream>, Status> {
        let upload_id = request.into_inner().upload_id;
        if upload_id.is_empty() {
            return Err(Status::invalid_argument("upload id is empty"));
        }
        let chunks = self.aggregator.collect(&upload_id).await?;
        debug!(chunks = chunks.len(), "streaming download");
        let (tx, rx) = mpsc::channel(DOWNLOAD_BUFFER);
        tokio::spawn(async move {
            for chunk in chunks {
                if tx.send(Ok(ChunkMessage::from(chunk))).await.is_err() {
                    trace!("client dropped the download stream");
                    break;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
