use proto::generated::gateway::{
    ChunkMessage, DownloadRequest, UploadFrame, UploadSummary, storage_client::StorageClient,
};
use tokio_stream::Stream;
use tonic::{Streaming, transport::Channel};
use utilities::{
    grpc_channel_pool::GRPC_CHANNEL_POOL,
    logger::{instrument, trace, tracing},
    result::Result,
};

#[derive(Clone, Debug)]
pub struct GatewayService {
    addrs: String,
}
impl GatewayService {
    pub fn new(addrs: String) -> Self {
        Self { addrs }
    }
    async fn get_grpc_connection(&self) -> Result<StorageClient<Channel>> {
        let channel = GRPC_CHANNEL_POOL.get_channel(&self.addrs).await?;
        Ok(StorageClient::new(channel))
    }

    #[instrument(name = "gateway_service_upload", skip(self, frames))]
    pub async fn upload(
        &self,
        frames: impl Stream<Item = UploadFrame> + Send + 'static,
    ) -> Result<UploadSummary> {
        let response = self
            .get_grpc_connection()
            .await?
            .upload(frames)
            .await
            .map_err(|e| format!("Error while uploading to gateway : {}, error : {e}", self.addrs))?;
        trace!(summary = ?response.get_ref(), "upload acknowledged");
        Ok(response.into_inner())
    }

    #[instrument(name = "gateway_service_download", skip(self))]
    pub async fn download(&self, upload_id: &str) -> Result<Streaming<ChunkMessage>> {
        let request = DownloadRequest {
            upload_id: upload_id.to_owned(),
        };
        let response = self
            .get_grpc_connection()
            .await?
            .download(tonic::Request::new(request))
            .await
            .map_err(|e| format!("Error while downloading {upload_id} from gateway, error : {e}"))?;
        Ok(response.into_inner())
    }
}
