use std::path::Path;

use utilities::{
    logger::{info, instrument, trace, tracing, warn},
    result::Result,
};

use crate::{file_chunker::FileChunker, gateway_service::GatewayService};

pub struct UploadFileHandler {
    gateway: GatewayService,
    chunk_size: u64,
}
impl UploadFileHandler {
    pub fn new(gateway: GatewayService, chunk_size: u64) -> Self {
        Self {
            gateway,
            chunk_size,
        }
    }
    #[instrument(skip(self))]
    pub async fn upload_file(&self, local_file_path: String) -> Result<String> {
        trace!("Fetching file metadata");
        let file_metadata = tokio::fs::metadata(&local_file_path)
            .await
            .map_err(|e| format!("Errror while reading file metadata : {e:?}"))?;
        if file_metadata.is_dir() {
            return Err(format!("Provided file path ({local_file_path}) is dir").into());
        }
        let filename = Path::new(&local_file_path)
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| format!("Provided file path ({local_file_path}) has no file name"))?
            .to_owned();

        let chunker = FileChunker::new(local_file_path.clone(), self.chunk_size);
        let (file_size, frames) = chunker.frames(filename).await?;
        info!(file_size, "uploading file");
        let summary = self.gateway.upload(frames).await?;
        if summary.failed_chunks > 0 {
            warn!(upload_id = %summary.upload_id, failed_chunks = summary.failed_chunks, "upload stored partially");
            return Err(format!(
                "upload {} is incomplete, {} of {} chunks could not be stored",
                summary.upload_id, summary.failed_chunks, summary.total_chunks
            )
            .into());
        }
        info!(upload_id = %summary.upload_id, total_chunks = summary.total_chunks, "file uploaded");
        Ok(format!(
            "File uploaded, upload id : {} ({} bytes in {} chunks)",
            summary.upload_id, summary.bytes_received, summary.total_chunks
        ))
    }
}
