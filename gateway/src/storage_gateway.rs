use std::sync::Arc;

use tokio::{sync::mpsc, task::JoinHandle};
use utilities::{
    chunk::Chunk,
    logger::{Instrument, debug, info, instrument, tracing, warn},
    worker_pool::WorkerPool,
};

use crate::{
    datanode::service::NodeClient,
    error::GatewayError,
    jobs::{FetchChunksJob, SendChunkJob},
    node_registry::{NodeId, NodeRegistry, NodeState},
};

// chunks buffered between the fetch jobs and the aggregator
const DOWNLOAD_BUFFER: usize = 16;

/// Places chunks on the least loaded datanode and fans downloads out to every node.
///
/// Occupancy is charged when a chunk is assigned, before the datanode confirms
/// the write. A dispatch that is confirmed failed gives the bytes back, so a
/// node's occupancy is its probed bytes plus every byte assigned to it whose
/// dispatch has not been confirmed failed.
pub struct StorageGateway {
    registry: Arc<NodeRegistry>,
    pool: Arc<WorkerPool>,
    client: Arc<dyn NodeClient>,
}

/// Handle on one dispatched chunk. Dropping it leaves the dispatch running.
#[derive(Debug)]
pub struct Dispatch {
    pub node: NodeId,
    pub addrs: String,
    settled: JoinHandle<bool>,
}
impl Dispatch {
    pub async fn confirmed(self) -> bool {
        self.settled.await.unwrap_or(false)
    }
}

impl StorageGateway {
    #[instrument(name = "gateway_initialize", skip(client, pool))]
    pub async fn initialize(
        node_addresses: &[String],
        client: Arc<dyn NodeClient>,
        pool: Arc<WorkerPool>,
    ) -> Result<Self, GatewayError> {
        if node_addresses.is_empty() {
            return Err(GatewayError::NoNodes);
        }
        let mut nodes = Vec::with_capacity(node_addresses.len());
        for addrs in node_addresses {
            let occupied_bytes =
                client
                    .node_state(addrs)
                    .await
                    .map_err(|e| GatewayError::Probe {
                        addrs: addrs.clone(),
                        reason: e.to_string(),
                    })?;
            info!(%addrs, occupied_bytes, "datanode registered");
            nodes.push(NodeState {
                addrs: addrs.clone(),
                occupied_bytes,
            });
        }
        Ok(Self {
            registry: Arc::new(NodeRegistry::new(nodes)),
            pool,
            client,
        })
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn select_least_loaded(&self) -> Option<(NodeId, String)> {
        self.registry.select_least_loaded()
    }

    #[instrument(name = "gateway_dispatch_send", skip(self, chunk), fields(upload_id = %chunk.upload_id, chunk_number = chunk.chunk_number))]
    pub async fn dispatch_send(&self, chunk: Chunk) -> Result<Dispatch, GatewayError> {
        let bytes = chunk.len();
        let (node, addrs) = self.registry.assign(bytes).ok_or(GatewayError::NoNodes)?;
        debug!(node = %addrs, bytes, "chunk assigned");
        let job = SendChunkJob::new(self.client.clone(), addrs.clone(), chunk);
        let outcome = match self.pool.submit_with_outcome(Box::new(job)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.registry.record_usage(node, -signed(bytes));
                return Err(e.into());
            }
        };

        let registry = self.registry.clone();
        let settled = tokio::spawn(
            async move {
                let stored = match outcome.await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        debug!(error = %e, "dispatch failed");
                        false
                    }
                    Err(_) => {
                        debug!("send job discarded before it ran");
                        false
                    }
                };
                if !stored {
                    let occupied_bytes = registry.record_usage(node, -signed(bytes));
                    debug!(?occupied_bytes, bytes, "occupancy compensated");
                }
                stored
            }
            .in_current_span(),
        );
        Ok(Dispatch {
            node,
            addrs,
            settled,
        })
    }

    // the returned channel closes once every fetch job is done
    #[instrument(name = "gateway_dispatch_download", skip(self))]
    pub fn dispatch_download(&self, upload_id: &str) -> mpsc::Receiver<Chunk> {
        let (output, chunks) = mpsc::channel(DOWNLOAD_BUFFER);
        let addresses = self.registry.addresses();
        let pool = self.pool.clone();
        let client = self.client.clone();
        let upload_id = upload_id.to_owned();
        // submitting from a separate task, the pool may wait for the consumer of `chunks`
        tokio::spawn(
            async move {
                for addrs in addresses {
                    let job =
                        FetchChunksJob::new(client.clone(), addrs.clone(), upload_id.clone(), output.clone());
                    if let Err(e) = pool.submit(Box::new(job)).await {
                        warn!(node = %addrs, error = %e, "fetch job rejected");
                    }
                }
            }
            .in_current_span(),
        );
        chunks
    }
}

fn signed(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}
