use utilities::{
    logger::{info, instrument, tracing},
    result::Result,
};

use crate::{chunk_joiner::ChunkJoiner, gateway_service::GatewayService};

pub struct DownloadFileHandler {
    gateway: GatewayService,
}
impl DownloadFileHandler {
    pub fn new(gateway: GatewayService) -> Self {
        Self { gateway }
    }
    #[instrument(skip(self))]
    pub async fn download_file(&self, upload_id: String, local_file_path: String) -> Result<String> {
        let mut stream = self.gateway.download(&upload_id).await?;
        let mut joiner = ChunkJoiner::new(local_file_path.clone()).await?;
        let joined: Result<u64> = async {
            let mut total_file_size = 0;
            while let Some(chunk) = stream
                .message()
                .await
                .map_err(|e| format!("Error while reading download stream {e}"))?
            {
                total_file_size = chunk.total_file_size;
                joiner.join_chunk(&chunk).await?;
            }
            joiner.finish(total_file_size).await
        }
        .await;
        match joined {
            Ok(written) => {
                info!(written, "file downloaded");
                Ok(format!("File downloaded to {local_file_path} ({written} bytes)"))
            }
            Err(e) => {
                joiner.abort().await;
                Err(e)
            }
        }
    }
}
