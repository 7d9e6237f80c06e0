use proto::generated::gateway::ChunkMessage;
use tokio::{fs::File, io::AsyncWriteExt};
use utilities::{
    logger::{instrument, trace, tracing, warn},
    result::Result,
};

pub struct ChunkJoiner {
    file_path: String,
    file: File,
    next_chunk_number: u64,
    written: u64,
}

impl ChunkJoiner {
    #[instrument(name = "new_chunk_joiner")]
    pub async fn new(file_path: String) -> Result<Self> {
        trace!("Creating file");
        let file = tokio::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&file_path)
            .await
            .map_err(|e| format!("Error while creating the file {file_path} : {e}"))?;
        Ok(Self {
            file_path,
            file,
            next_chunk_number: 1,
            written: 0,
        })
    }

    #[instrument(skip(self, chunk), fields(chunk_number = chunk.chunk_number))]
    pub async fn join_chunk(&mut self, chunk: &ChunkMessage) -> Result<()> {
        if chunk.chunk_number != self.next_chunk_number {
            return Err(format!(
                "expected chunk {} but received chunk {}",
                self.next_chunk_number, chunk.chunk_number
            )
            .into());
        }
        self.file
            .write_all(&chunk.data)
            .await
            .map_err(|e| format!("Error while writing chunk to file {e:?}"))?;
        self.next_chunk_number += 1;
        self.written += chunk.data.len() as u64;
        Ok(())
    }

    pub async fn finish(&mut self, total_file_size: u64) -> Result<u64> {
        if self.written != total_file_size {
            return Err(format!(
                "wrote {} bytes but the file has {total_file_size}",
                self.written
            )
            .into());
        }
        self.file
            .flush()
            .await
            .map_err(|e| format!("Error while flushing file {e:?}"))?;
        Ok(self.written)
    }

    #[instrument(name = "abort_join_chunk", skip(self), fields(file_path = %self.file_path))]
    pub async fn abort(self) {
        drop(self.file);
        if let Err(e) = tokio::fs::remove_file(&self.file_path).await {
            warn!(error = %e, "Error while removing partial file");
        }
    }
}
