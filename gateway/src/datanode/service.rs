use async_trait::async_trait;
use proto::{
    NODE_STATE_HEADER,
    generated::datanode::{
        ChunkMessage, FetchChunksRequest, StateRequest, datanode_client::DatanodeClient,
    },
};
use tokio::sync::mpsc;
use tonic::transport::Channel;
use utilities::{
    chunk::Chunk,
    grpc_channel_pool::GRPC_CHANNEL_POOL,
    logger::{instrument, trace, tracing},
    result::Result,
};

/// Remote operations the gateway runs against a datanode.
#[async_trait]
pub trait NodeClient: Send + Sync + 'static {
    async fn node_state(&self, addrs: &str) -> Result<u64>;
    async fn store_chunk(&self, addrs: &str, chunk: Chunk) -> Result<u64>;
    /// Forwards every chunk the node holds for `upload_id` into `output` and returns how many
    /// were forwarded. Stops early once `output` is closed.
    async fn fetch_chunks(
        &self,
        addrs: &str,
        upload_id: &str,
        output: &mpsc::Sender<Chunk>,
    ) -> Result<u64>;
}

#[derive(Clone, Copy, Default)]
pub struct DatanodeService {}

impl DatanodeService {
    pub fn new() -> Self {
        Self {}
    }
    async fn get_connection(addrs: &str) -> Result<DatanodeClient<Channel>> {
        let channel = GRPC_CHANNEL_POOL.get_channel(addrs).await?;
        Ok(DatanodeClient::new(channel))
    }
}

#[async_trait]
impl NodeClient for DatanodeService {
    #[instrument(name = "service_datanode_state", skip(self))]
    async fn node_state(&self, addrs: &str) -> Result<u64> {
        let response = Self::get_connection(addrs)
            .await?
            .state(tonic::Request::new(StateRequest {}))
            .await
            .map_err(|e| format!("Error while fetching state from datanode : {addrs}, error : {e}"))?;
        let header = response
            .metadata()
            .get(NODE_STATE_HEADER)
            .ok_or_else(|| format!("datanode {addrs} replied without the {NODE_STATE_HEADER} header"))?;
        let used_bytes: u64 = header.to_str()?.parse()?;
        trace!(used_bytes, "Got datanode state");
        Ok(used_bytes)
    }

    #[instrument(name = "service_datanode_store_chunk", skip(self, chunk), fields(upload_id = %chunk.upload_id, chunk_number = chunk.chunk_number))]
    async fn store_chunk(&self, addrs: &str, chunk: Chunk) -> Result<u64> {
        let chunk_number = chunk.chunk_number;
        let response = Self::get_connection(addrs)
            .await?
            .store_chunk(tonic::Request::new(ChunkMessage::from(chunk)))
            .await
            .map_err(|e| {
                format!("Error while storing chunk {chunk_number} on datanode : {addrs}, error : {e}")
            })?;
        Ok(response.get_ref().bytes_received)
    }

    #[instrument(name = "service_datanode_fetch_chunks", skip(self, output))]
    async fn fetch_chunks(
        &self,
        addrs: &str,
        upload_id: &str,
        output: &mpsc::Sender<Chunk>,
    ) -> Result<u64> {
        let request = FetchChunksRequest {
            upload_id: upload_id.to_owned(),
        };
        let mut stream = Self::get_connection(addrs)
            .await?
            .fetch_chunks(tonic::Request::new(request))
            .await
            .map_err(|e| format!("Error while fetching chunks from datanode : {addrs}, error : {e}"))?
            .into_inner();
        let mut forwarded = 0;
        while let Some(message) = stream
            .message()
            .await
            .map_err(|e| format!("Error while reading chunk stream from datanode : {addrs}, error : {e}"))?
        {
            if output.send(Chunk::from(message)).await.is_err() {
                trace!("download receiver closed, stopping fetch");
                break;
            }
            forwarded += 1;
        }
        Ok(forwarded)
    }
}
