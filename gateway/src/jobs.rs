use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use utilities::{
    chunk::Chunk,
    logger::{Instrument, debug, info_span},
    result::Result,
    worker_pool::Job,
};

use crate::datanode::service::NodeClient;

pub struct SendChunkJob {
    client: Arc<dyn NodeClient>,
    addrs: String,
    chunk: Chunk,
}
impl SendChunkJob {
    pub fn new(client: Arc<dyn NodeClient>, addrs: String, chunk: Chunk) -> Self {
        Self {
            client,
            addrs,
            chunk,
        }
    }
    async fn send(self) -> Result<()> {
        let expected = self.chunk.len();
        let bytes_received = self.client.store_chunk(&self.addrs, self.chunk).await?;
        if bytes_received != expected {
            return Err(format!(
                "datanode {} acknowledged {bytes_received} of {expected} bytes",
                self.addrs
            )
            .into());
        }
        debug!(bytes_received, "chunk stored");
        Ok(())
    }
}

#[async_trait]
impl Job for SendChunkJob {
    fn name(&self) -> String {
        format!(
            "send {}#{} to {}",
            self.chunk.upload_id, self.chunk.chunk_number, self.addrs
        )
    }
    async fn execute(self: Box<Self>) -> Result<()> {
        let span = info_span!(
            "job_send_chunk",
            upload_id = %self.chunk.upload_id,
            chunk_number = self.chunk.chunk_number,
            node = %self.addrs
        );
        self.send().instrument(span).await
    }
}

pub struct FetchChunksJob {
    client: Arc<dyn NodeClient>,
    addrs: String,
    upload_id: String,
    output: mpsc::Sender<Chunk>,
}
impl FetchChunksJob {
    pub fn new(
        client: Arc<dyn NodeClient>,
        addrs: String,
        upload_id: String,
        output: mpsc::Sender<Chunk>,
    ) -> Self {
        Self {
            client,
            addrs,
            upload_id,
            output,
        }
    }
    async fn fetch(self) -> Result<()> {
        let forwarded = self
            .client
            .fetch_chunks(&self.addrs, &self.upload_id, &self.output)
            .await?;
        debug!(forwarded, "fetch finished");
        Ok(())
    }
}

#[async_trait]
impl Job for FetchChunksJob {
    fn name(&self) -> String {
        format!("fetch {} from {}", self.upload_id, self.addrs)
    }
    async fn execute(self: Box<Self>) -> Result<()> {
        let span = info_span!("job_fetch_chunks", upload_id = %self.upload_id, node = %self.addrs);
        self.fetch().instrument(span).await
    }
}
