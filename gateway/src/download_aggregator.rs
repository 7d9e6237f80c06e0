use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use utilities::{
    chunk::{Chunk, total_chunks},
    logger::{debug, instrument, trace, tracing, warn},
};

use crate::{error::DownloadError, storage_gateway::StorageGateway};

/// Ordered slots for the chunks of one upload, sized from the first well formed chunk.
///
/// The first copy of a chunk number wins, later copies are dropped.
#[derive(Debug)]
pub struct ChunkAssembly {
    upload_id: String,
    total_file_size: u64,
    slots: Vec<Option<Chunk>>,
    filled: usize,
}

impl ChunkAssembly {
    // the count comes from a datanode, only trust it to size the slots
    pub fn new(first: &Chunk, chunk_size: u64) -> Option<Self> {
        if first.total_chunks != total_chunks(first.total_file_size, chunk_size) {
            return None;
        }
        let slots = usize::try_from(first.total_chunks).ok()?;
        Some(Self {
            upload_id: first.upload_id.clone(),
            total_file_size: first.total_file_size,
            slots: vec![None; slots],
            filled: 0,
        })
    }

    pub fn insert(&mut self, chunk: Chunk) -> bool {
        if chunk.upload_id != self.upload_id
            || chunk.total_chunks != self.slots.len() as u64
            || chunk.total_file_size != self.total_file_size
        {
            warn!(chunk_number = chunk.chunk_number, total_chunks = chunk.total_chunks, "chunk does not match its upload, ignoring");
            return false;
        }
        let Some(slot) = chunk
            .chunk_number
            .checked_sub(1)
            .and_then(|index| self.slots.get_mut(index as usize))
        else {
            warn!(chunk_number = chunk.chunk_number, "chunk number out of range, ignoring");
            return false;
        };
        if slot.is_some() {
            trace!(chunk_number = chunk.chunk_number, "duplicate chunk dropped");
            return false;
        }
        *slot = Some(chunk);
        self.filled += 1;
        true
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.slots.len()
    }

    pub fn missing(&self) -> Vec<u64> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index as u64 + 1)
            .collect()
    }

    pub fn into_chunks(self) -> Result<Vec<Chunk>, DownloadError> {
        if !self.is_complete() {
            return Err(DownloadError::MissingChunks {
                missing: self.missing(),
                upload_id: self.upload_id,
            });
        }
        let chunks: Vec<Chunk> = self.slots.into_iter().flatten().collect();
        let actual: u64 = chunks.iter().map(Chunk::len).sum();
        if actual != self.total_file_size {
            return Err(DownloadError::SizeMismatch {
                expected: self.total_file_size,
                actual,
            });
        }
        Ok(chunks)
    }
}

pub async fn assemble(
    upload_id: &str,
    chunk_size: u64,
    chunks: &mut mpsc::Receiver<Chunk>,
) -> Result<Vec<Chunk>, DownloadError> {
    let mut assembly: Option<ChunkAssembly> = None;
    while let Some(chunk) = chunks.recv().await {
        if chunk.upload_id != upload_id {
            warn!(got = %chunk.upload_id, "chunk of another upload, ignoring");
            continue;
        }
        if assembly.is_none() {
            assembly = ChunkAssembly::new(&chunk, chunk_size);
        }
        let Some(assembly) = assembly.as_mut() else {
            warn!(
                total_chunks = chunk.total_chunks,
                total_file_size = chunk.total_file_size,
                "chunk count does not match the file size, ignoring"
            );
            continue;
        };
        assembly.insert(chunk);
        if assembly.is_complete() {
            debug!("every chunk arrived");
            break;
        }
    }
    match assembly {
        Some(assembly) => assembly.into_chunks(),
        None => Err(DownloadError::NotFound(upload_id.to_owned())),
    }
}

pub struct DownloadAggregator {
    gateway: Arc<StorageGateway>,
    chunk_size: u64,
    timeout: Duration,
    cancel: CancellationToken,
}

impl DownloadAggregator {
    pub fn new(
        gateway: Arc<StorageGateway>,
        chunk_size: u64,
        timeout: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            gateway,
            chunk_size,
            timeout,
            cancel,
        }
    }

    #[instrument(name = "download_collect", skip(self))]
    pub async fn collect(&self, upload_id: &str) -> Result<Vec<Chunk>, DownloadError> {
        // dropping the receiver on return stops the remaining fetch jobs
        let mut chunks = self.gateway.dispatch_download(upload_id);
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(DownloadError::Cancelled),
            assembled = tokio::time::timeout(self.timeout, assemble(upload_id, self.chunk_size, &mut chunks)) => {
                assembled.map_err(|_| DownloadError::TimedOut(self.timeout))?
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_gateway::tests::{FakeNodes, started_pool};
    use async_trait::async_trait;
    use crate::datanode::service::NodeClient;

    // three chunks of three bytes
    const CHUNK_SIZE: u64 = 3;

    fn chunk(chunk_number: u64, data: &[u8]) -> Chunk {
        Chunk {
            upload_id: "u1".to_owned(),
            chunk_number,
            total_chunks: 3,
            total_file_size: 9,
            filename: "abc.txt".to_owned(),
            data: data.to_vec(),
        }
    }

    async fn feed(chunks: Vec<Chunk>) -> mpsc::Receiver<Chunk> {
        let (tx, rx) = mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            tx.send(chunk).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn orders_chunks_by_number() {
        let mut rx = feed(vec![chunk(3, b"ghi"), chunk(1, b"abc"), chunk(2, b"def")]).await;
        let chunks = assemble("u1", CHUNK_SIZE, &mut rx).await.unwrap();
        let data: Vec<u8> = chunks.into_iter().flat_map(|c| c.data).collect();
        assert_eq!(data, b"abcdefghi");
    }

    #[tokio::test]
    async fn first_copy_wins() {
        let mut rx = feed(vec![
            chunk(1, b"abc"),
            chunk(1, b"xyz"),
            chunk(2, b"def"),
            chunk(3, b"ghi"),
        ])
        .await;
        let chunks = assemble("u1", CHUNK_SIZE, &mut rx).await.unwrap();
        assert_eq!(chunks[0].data, b"abc");
    }

    #[tokio::test]
    async fn closed_channel_with_gaps_reports_missing_chunks() {
        let mut rx = feed(vec![chunk(2, b"def")]).await;
        assert_eq!(
            assemble("u1", CHUNK_SIZE, &mut rx).await,
            Err(DownloadError::MissingChunks {
                upload_id: "u1".to_owned(),
                missing: vec![1, 3]
            })
        );
    }

    #[tokio::test]
    async fn nothing_received_is_not_found() {
        let mut rx = feed(vec![]).await;
        assert_eq!(
            assemble("u1", CHUNK_SIZE, &mut rx).await,
            Err(DownloadError::NotFound("u1".to_owned()))
        );
    }

    #[tokio::test]
    async fn size_disagreement_is_reported() {
        let mut rx = feed(vec![chunk(1, b"abc"), chunk(2, b"def"), chunk(3, b"g")]).await;
        assert_eq!(
            assemble("u1", CHUNK_SIZE, &mut rx).await,
            Err(DownloadError::SizeMismatch {
                expected: 9,
                actual: 7
            })
        );
    }

    #[tokio::test]
    async fn oversized_chunk_count_is_not_trusted() {
        let mut forged = chunk(1, b"abc");
        forged.total_chunks = u64::MAX;
        let mut huge = chunk(2, b"def");
        huge.total_chunks = 1 << 34;
        assert!(ChunkAssembly::new(&forged, CHUNK_SIZE).is_none());

        let mut rx = feed(vec![forged, huge]).await;
        assert_eq!(
            assemble("u1", CHUNK_SIZE, &mut rx).await,
            Err(DownloadError::NotFound("u1".to_owned()))
        );
        // well formed chunks after a forged one still assemble
        let mut forged = chunk(1, b"xyz");
        forged.total_chunks = u64::MAX;
        let mut rx = feed(vec![forged, chunk(3, b"ghi"), chunk(1, b"abc"), chunk(2, b"def")]).await;
        let chunks = assemble("u1", CHUNK_SIZE, &mut rx).await.unwrap();
        assert_eq!(chunks[0].data, b"abc");
    }

    #[test]
    fn assembly_ignores_out_of_range_and_foreign_chunks() {
        let mut assembly = ChunkAssembly::new(&chunk(1, b"abc"), CHUNK_SIZE).unwrap();
        assert!(!assembly.insert(chunk(0, b"abc")));
        assert!(!assembly.insert(chunk(4, b"abc")));
        let mut other = chunk(2, b"def");
        other.total_chunks = 5;
        assert!(!assembly.insert(other));
        assert!(assembly.insert(chunk(2, b"def")));
        assert_eq!(assembly.missing(), vec![1, 3]);
    }

    #[tokio::test]
    async fn collects_from_every_node() {
        let nodes = Arc::new(FakeNodes::new(&[("a", 0), ("b", 0)]));
        {
            let mut stored = nodes.stored.lock().unwrap();
            stored.push(("b".to_owned(), chunk(2, b"def")));
            stored.push(("a".to_owned(), chunk(1, b"abc")));
            stored.push(("b".to_owned(), chunk(3, b"ghi")));
            // replica of chunk 1 on another node is deduplicated
            stored.push(("b".to_owned(), chunk(1, b"abc")));
        }
        let gateway = Arc::new(
            StorageGateway::initialize(&nodes.addresses(), nodes.clone(), started_pool(2))
                .await
                .unwrap(),
        );
        let aggregator =
            DownloadAggregator::new(gateway, CHUNK_SIZE, Duration::from_secs(5), CancellationToken::new());
        let chunks = aggregator.collect("u1").await.unwrap();
        let numbers: Vec<u64> = chunks.iter().map(|c| c.chunk_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(
            aggregator.collect("unknown").await,
            Err(DownloadError::NotFound("unknown".to_owned()))
        );
    }

    struct StalledNode;

    #[async_trait]
    impl NodeClient for StalledNode {
        async fn node_state(&self, _addrs: &str) -> utilities::result::Result<u64> {
            Ok(0)
        }
        async fn store_chunk(&self, _addrs: &str, chunk: Chunk) -> utilities::result::Result<u64> {
            Ok(chunk.len())
        }
        async fn fetch_chunks(
            &self,
            _addrs: &str,
            _upload_id: &str,
            output: &mpsc::Sender<Chunk>,
        ) -> utilities::result::Result<u64> {
            output.send(chunk(1, b"abc")).await?;
            std::future::pending::<()>().await;
            Ok(1)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_node_times_out() {
        let gateway = Arc::new(
            StorageGateway::initialize(&["a".to_owned()], Arc::new(StalledNode), started_pool(1))
                .await
                .unwrap(),
        );
        let aggregator =
            DownloadAggregator::new(gateway, CHUNK_SIZE, Duration::from_secs(2), CancellationToken::new());
        assert_eq!(
            aggregator.collect("u1").await,
            Err(DownloadError::TimedOut(Duration::from_secs(2)))
        );
    }

    #[tokio::test]
    async fn cancelled_download_stops() {
        let gateway = Arc::new(
            StorageGateway::initialize(&["a".to_owned()], Arc::new(StalledNode), started_pool(1))
                .await
                .unwrap(),
        );
        let cancel = CancellationToken::new();
        let aggregator = DownloadAggregator::new(gateway, CHUNK_SIZE, Duration::from_secs(60), cancel.clone());
        cancel.cancel();
        assert_eq!(aggregator.collect("u1").await, Err(DownloadError::Cancelled));
    }
}
