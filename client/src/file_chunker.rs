use proto::generated::gateway::{UploadFrame, UploadMetadata, upload_frame};
use tokio::{
    fs::File,
    io::{AsyncRead, AsyncReadExt},
    sync::mpsc,
};
use tokio_stream::wrappers::ReceiverStream;
use utilities::{
    logger::{Instrument, error, instrument, trace, tracing},
    result::Result,
};

/// Reads a local file as the frame sequence the gateway expects: one metadata
/// frame, then data frames of exactly `chunk_size` bytes except the last.
pub struct FileChunker {
    file_path: String,
    chunk_size: u64,
}

impl FileChunker {
    pub fn new(file_path: String, chunk_size: u64) -> Self {
        Self {
            file_path,
            chunk_size,
        }
    }

    #[instrument(name = "file_chunker_frames", skip(self))]
    pub async fn frames(&self, filename: String) -> Result<(u64, ReceiverStream<UploadFrame>)> {
        let mut file = File::open(&self.file_path)
            .await
            .map_err(|e| format!("Error while opening the file {} : {e:?}", self.file_path))?;
        let total_file_size = file
            .metadata()
            .await
            .map_err(|e| format!("Error while reading file metadata : {e:?}"))?
            .len();

        let (tx, rx) = mpsc::channel(2);
        let metadata = UploadFrame {
            frame: Some(upload_frame::Frame::Metadata(UploadMetadata {
                total_file_size,
                filename,
            })),
        };
        tx.send(metadata)
            .await
            .map_err(|_| "frame receiver dropped before the upload started")?;
        let chunk_size = self.chunk_size;
        tokio::spawn(
            async move {
                loop {
                    let data = match read_frame(&mut file, chunk_size).await {
                        Ok(data) if data.is_empty() => break,
                        Ok(data) => data,
                        Err(e) => {
                            // the gateway sees a short upload and rejects it
                            error!(error = %e, "Error while reading file, ending upload stream");
                            break;
                        }
                    };
                    trace!(bytes = data.len(), "frame read");
                    let frame = UploadFrame {
                        frame: Some(upload_frame::Frame::Data(data)),
                    };
                    if tx.send(frame).await.is_err() {
                        trace!("upload stream closed");
                        break;
                    }
                }
            }
            .in_current_span(),
        );
        Ok((total_file_size, ReceiverStream::new(rx)))
    }
}

pub async fn read_frame(
    reader: &mut (impl AsyncRead + Unpin),
    chunk_size: u64,
) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(chunk_size as usize);
    reader.take(chunk_size).read_to_end(&mut buffer).await?;
    Ok(buffer)
}
