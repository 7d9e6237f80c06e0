//! Upload protocol: one metadata frame, then data frames that become numbered chunks.

use std::sync::Arc;

use proto::generated::gateway::{UploadFrame, UploadMetadata, UploadSummary, upload_frame};
use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tonic::Status;
use utilities::{
    chunk::{Chunk, total_chunks},
    logger::{Instrument, debug, info, instrument, tracing, warn},
};
use uuid::Uuid;

use crate::{
    error::SessionError,
    storage_gateway::{Dispatch, StorageGateway},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Metadata {
        total_file_size: u64,
        filename: String,
    },
    Data(Vec<u8>),
}

impl TryFrom<UploadFrame> for Frame {
    type Error = SessionError;
    fn try_from(frame: UploadFrame) -> Result<Self, Self::Error> {
        match frame.frame {
            Some(upload_frame::Frame::Metadata(UploadMetadata {
                total_file_size,
                filename,
            })) => {
                if filename.trim().is_empty() {
                    return Err(SessionError::InvalidMetadata("filename is empty".to_owned()));
                }
                Ok(Frame::Metadata {
                    total_file_size,
                    filename,
                })
            }
            Some(upload_frame::Frame::Data(data)) => Ok(Frame::Data(data)),
            None => Err(SessionError::EmptyFrame),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    AwaitingMetadata,
    Receiving { upload_id: String, total_chunks: u64 },
    Completed(UploadSummary),
    Aborted(SessionError),
}

/// Numbers the data frames of one upload and enforces the declared size.
///
/// Every frame but the last has to be exactly `chunk_size` bytes, which keeps
/// the produced chunk count equal to `ceil(total_file_size / chunk_size)`.
#[derive(Debug)]
pub struct ChunkSequencer {
    upload_id: String,
    filename: String,
    total_file_size: u64,
    total_chunks: u64,
    chunk_size: u64,
    produced: u64,
    received: u64,
}

impl ChunkSequencer {
    pub fn new(upload_id: String, filename: String, total_file_size: u64, chunk_size: u64) -> Self {
        Self {
            total_chunks: total_chunks(total_file_size, chunk_size),
            upload_id,
            filename,
            total_file_size,
            chunk_size,
            produced: 0,
            received: 0,
        }
    }
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
    pub fn total_chunks(&self) -> u64 {
        self.total_chunks
    }
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn next_chunk(&mut self, data: Vec<u8>) -> Result<Chunk, SessionError> {
        let len = data.len() as u64;
        if len == 0 {
            return Err(SessionError::EmptyFrame);
        }
        let received = self.received + len;
        if received > self.total_file_size {
            return Err(SessionError::Overflow {
                expected: self.total_file_size,
                received,
            });
        }
        if len > self.chunk_size {
            return Err(SessionError::FrameTooLarge {
                len,
                chunk_size: self.chunk_size,
            });
        }
        let chunk_number = self.produced + 1;
        if len < self.chunk_size && received < self.total_file_size {
            return Err(SessionError::Misaligned {
                chunk_number,
                len,
                chunk_size: self.chunk_size,
            });
        }
        self.received = received;
        self.produced = chunk_number;
        Ok(Chunk {
            upload_id: self.upload_id.clone(),
            chunk_number,
            total_chunks: self.total_chunks,
            total_file_size: self.total_file_size,
            filename: self.filename.clone(),
            data,
        })
    }

    pub fn finish(&self) -> Result<UploadSummary, SessionError> {
        if self.received < self.total_file_size || self.produced != self.total_chunks {
            return Err(SessionError::Truncated {
                expected: self.total_file_size,
                received: self.received,
            });
        }
        Ok(UploadSummary {
            upload_id: self.upload_id.clone(),
            total_chunks: self.total_chunks,
            bytes_received: self.received,
            failed_chunks: 0,
        })
    }
}

struct ForwardReport {
    dispatched: u64,
    failed: u64,
}

/// One client upload. Frames are read on the caller's task while a forwarder
/// task hands the resulting chunks to the gateway, at most one chunk waits
/// between the two.
pub struct IngestSession {
    gateway: Arc<StorageGateway>,
    chunk_size: u64,
    cancel: CancellationToken,
    state: SessionState,
}

impl IngestSession {
    pub fn new(gateway: Arc<StorageGateway>, chunk_size: u64, cancel: CancellationToken) -> Self {
        Self {
            gateway,
            chunk_size,
            cancel,
            state: SessionState::AwaitingMetadata,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drives the session to `Completed` or `Aborted`.
    ///
    /// Returns once every accepted chunk has been dispatched and its send job
    /// has settled. Chunks that were already dispatched are kept when the
    /// session aborts.
    #[instrument(name = "ingest_session", skip_all)]
    pub async fn run<S>(&mut self, mut frames: S) -> Result<UploadSummary, SessionError>
    where
        S: Stream<Item = Result<UploadFrame, Status>> + Unpin,
    {
        let result = self.ingest(&mut frames).await;
        match &result {
            Ok(summary) => {
                info!(upload_id = %summary.upload_id, total_chunks = summary.total_chunks, failed_chunks = summary.failed_chunks, "upload completed");
                self.state = SessionState::Completed(summary.clone());
            }
            Err(e) => {
                warn!(error = %e, "upload aborted");
                self.state = SessionState::Aborted(e.clone());
            }
        }
        result
    }

    async fn ingest<S>(&mut self, frames: &mut S) -> Result<UploadSummary, SessionError>
    where
        S: Stream<Item = Result<UploadFrame, Status>> + Unpin,
    {
        let (total_file_size, filename) = match self.next_frame(frames).await? {
            Some(Frame::Metadata {
                total_file_size,
                filename,
            }) => (total_file_size, filename),
            Some(Frame::Data(_)) | None => return Err(SessionError::MissingMetadata),
        };
        let upload_id = Uuid::new_v4().to_string();
        let mut sequencer =
            ChunkSequencer::new(upload_id.clone(), filename, total_file_size, self.chunk_size);
        info!(%upload_id, total_file_size, total_chunks = sequencer.total_chunks(), "upload started");
        self.state = SessionState::Receiving {
            upload_id,
            total_chunks: sequencer.total_chunks(),
        };

        let (chunks, pending) = mpsc::channel(1);
        let forwarder = tokio::spawn(forward(self.gateway.clone(), pending).in_current_span());
        let received = self.receive(frames, &mut sequencer, chunks).await;
        let forwarded = match forwarder.await {
            Ok(report) => report,
            Err(e) => Err(SessionError::Forwarder(e.to_string())),
        };

        // a dispatch error stops the forwarder first and is the cause of a failed hand-off
        let report = match (received, forwarded) {
            (Err(SessionError::Forwarder(_)), Err(e)) => return Err(e),
            (Err(e), _) => return Err(e),
            (Ok(()), report) => report?,
        };
        let mut summary = sequencer.finish()?;
        debug_assert_eq!(report.dispatched, summary.total_chunks);
        summary.failed_chunks = report.failed;
        Ok(summary)
    }

    async fn next_frame<S>(&self, frames: &mut S) -> Result<Option<Frame>, SessionError>
    where
        S: Stream<Item = Result<UploadFrame, Status>> + Unpin,
    {
        let frame = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled),
            frame = frames.next() => frame,
        };
        match frame {
            None => Ok(None),
            Some(Err(status)) => Err(SessionError::Transport(status.message().to_owned())),
            Some(Ok(frame)) => Frame::try_from(frame).map(Some),
        }
    }

    async fn receive<S>(
        &self,
        frames: &mut S,
        sequencer: &mut ChunkSequencer,
        chunks: mpsc::Sender<Chunk>,
    ) -> Result<(), SessionError>
    where
        S: Stream<Item = Result<UploadFrame, Status>> + Unpin,
    {
        while let Some(frame) = self.next_frame(frames).await? {
            let data = match frame {
                Frame::Data(data) => data,
                Frame::Metadata { .. } => return Err(SessionError::UnexpectedMetadata),
            };
            let chunk = sequencer.next_chunk(data)?;
            debug!(chunk_number = chunk.chunk_number, bytes = chunk.len(), "frame accepted");
            if chunks.send(chunk).await.is_err() {
                return Err(SessionError::Forwarder("stopped before the upload ended".to_owned()));
            }
        }
        debug!(received = sequencer.received(), "upload stream closed");
        Ok(())
    }
}

async fn forward(
    gateway: Arc<StorageGateway>,
    mut pending: mpsc::Receiver<Chunk>,
) -> Result<ForwardReport, SessionError> {
    let mut dispatches: Vec<Dispatch> = vec![];
    while let Some(chunk) = pending.recv().await {
        dispatches.push(gateway.dispatch_send(chunk).await?);
    }
    let dispatched = dispatches.len() as u64;
    let mut failed = 0;
    for dispatch in dispatches {
        if !dispatch.confirmed().await {
            failed += 1;
        }
    }
    Ok(ForwardReport { dispatched, failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::GatewayError,
        storage_gateway::tests::{FakeNodes, started_pool},
    };
    use utilities::worker_pool::PoolError;

    const KIB: usize = 1024;

    fn metadata(total_file_size: u64, filename: &str) -> Result<UploadFrame, Status> {
        Ok(UploadFrame {
            frame: Some(upload_frame::Frame::Metadata(UploadMetadata {
                total_file_size,
                filename: filename.to_owned(),
            })),
        })
    }
    fn data(len: usize) -> Result<UploadFrame, Status> {
        Ok(UploadFrame {
            frame: Some(upload_frame::Frame::Data(vec![7; len])),
        })
    }

    async fn gateway(nodes: Arc<FakeNodes>) -> Arc<StorageGateway> {
        Arc::new(
            StorageGateway::initialize(&nodes.addresses(), nodes.clone(), started_pool(2))
                .await
                .unwrap(),
        )
    }

    fn session(gateway: &Arc<StorageGateway>, chunk_size: usize) -> IngestSession {
        IngestSession::new(gateway.clone(), chunk_size as u64, CancellationToken::new())
    }

    #[test]
    fn sequencer_numbers_chunks_from_one() {
        let mut sequencer = ChunkSequencer::new("u".into(), "f".into(), 25, 10);
        assert_eq!(sequencer.total_chunks(), 3);
        let numbers: Vec<u64> = [10, 10, 5]
            .into_iter()
            .map(|len| sequencer.next_chunk(vec![0; len]).unwrap().chunk_number)
            .collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        let summary = sequencer.finish().unwrap();
        assert_eq!(summary.total_chunks, 3);
        assert_eq!(summary.bytes_received, 25);
    }

    #[test]
    fn sequencer_rejects_bad_frames() {
        let mut sequencer = ChunkSequencer::new("u".into(), "f".into(), 25, 10);
        assert_eq!(sequencer.next_chunk(vec![]), Err(SessionError::EmptyFrame));
        assert_eq!(
            sequencer.next_chunk(vec![0; 11]),
            Err(SessionError::FrameTooLarge {
                len: 11,
                chunk_size: 10
            })
        );
        assert_eq!(
            sequencer.next_chunk(vec![0; 4]),
            Err(SessionError::Misaligned {
                chunk_number: 1,
                len: 4,
                chunk_size: 10
            })
        );
        // rejected frames do not advance the sequence
        assert_eq!(sequencer.next_chunk(vec![0; 10]).unwrap().chunk_number, 1);
        assert_eq!(
            sequencer.finish(),
            Err(SessionError::Truncated {
                expected: 25,
                received: 10
            })
        );
    }

    #[test]
    fn frames_convert_from_the_wire() {
        assert_eq!(
            Frame::try_from(UploadFrame { frame: None }),
            Err(SessionError::EmptyFrame)
        );
        assert!(matches!(
            Frame::try_from(metadata(10, " ").unwrap()),
            Err(SessionError::InvalidMetadata(_))
        ));
        assert_eq!(
            Frame::try_from(data(3).unwrap()),
            Ok(Frame::Data(vec![7; 3]))
        );
    }

    #[tokio::test]
    async fn splits_upload_across_least_loaded_nodes() {
        let nodes = Arc::new(FakeNodes::new(&[("a", 0), ("b", 10_000), ("c", 5_000)]));
        let gateway = gateway(nodes.clone()).await;
        let mut session = session(&gateway, 50 * KIB);
        let frames = tokio_stream::iter(vec![
            metadata(120 * 1024, "dataset.bin"),
            data(50 * KIB),
            data(50 * KIB),
            data(20 * KIB),
        ]);

        let summary = session.run(frames).await.unwrap();
        assert_eq!(summary.total_chunks, 3);
        assert_eq!(summary.bytes_received, 120 * 1024);
        assert_eq!(summary.failed_chunks, 0);
        assert!(matches!(session.state(), SessionState::Completed(_)));

        let stored = nodes.stored();
        let mut placement: Vec<(&str, u64, usize)> = stored
            .iter()
            .map(|(node, c)| (node.as_str(), c.chunk_number, c.data.len()))
            .collect();
        placement.sort_by_key(|(_, chunk_number, _)| *chunk_number);
        assert_eq!(
            placement,
            vec![("a", 1, 50 * KIB), ("c", 2, 50 * KIB), ("b", 3, 20 * KIB)]
        );
        assert!(stored.iter().all(|(_, c)| c.upload_id == summary.upload_id
            && c.total_chunks == 3
            && c.filename == "dataset.bin"));
        let occupancy: Vec<u64> = gateway
            .registry()
            .snapshot()
            .iter()
            .map(|n| n.occupied_bytes)
            .collect();
        assert_eq!(occupancy, vec![51_200, 30_480, 56_200]);
    }

    #[tokio::test]
    async fn overflow_aborts_and_stops_dispatching() {
        let nodes = Arc::new(FakeNodes::new(&[("a", 0)]));
        let gateway = gateway(nodes.clone()).await;
        let mut session = session(&gateway, 50 * KIB);
        let frames = tokio_stream::iter(vec![metadata(100, "small.txt"), data(100), data(50), data(10)]);

        let result = session.run(frames).await;
        assert_eq!(
            result,
            Err(SessionError::Overflow {
                expected: 100,
                received: 150
            })
        );
        assert!(matches!(session.state(), SessionState::Aborted(_)));
        // the frame within budget was still dispatched
        assert_eq!(nodes.stored().len(), 1);
    }

    #[tokio::test]
    async fn data_before_metadata_is_rejected() {
        let nodes = Arc::new(FakeNodes::new(&[("a", 0)]));
        let gateway = gateway(nodes.clone()).await;
        let result = session(&gateway, 10)
            .run(tokio_stream::iter(vec![data(10)]))
            .await;
        assert_eq!(result, Err(SessionError::MissingMetadata));
        let result = session(&gateway, 10).run(tokio_stream::iter(vec![])).await;
        assert_eq!(result, Err(SessionError::MissingMetadata));
        assert!(nodes.stored().is_empty());
    }

    #[tokio::test]
    async fn second_metadata_frame_aborts() {
        let nodes = Arc::new(FakeNodes::new(&[("a", 0)]));
        let gateway = gateway(nodes.clone()).await;
        let frames = tokio_stream::iter(vec![metadata(20, "f"), data(10), metadata(20, "g")]);
        let result = session(&gateway, 10).run(frames).await;
        assert_eq!(result, Err(SessionError::UnexpectedMetadata));
    }

    #[tokio::test]
    async fn short_stream_is_truncated() {
        let nodes = Arc::new(FakeNodes::new(&[("a", 0)]));
        let gateway = gateway(nodes.clone()).await;
        let frames = tokio_stream::iter(vec![metadata(30, "f"), data(10)]);
        let result = session(&gateway, 10).run(frames).await;
        assert_eq!(
            result,
            Err(SessionError::Truncated {
                expected: 30,
                received: 10
            })
        );
        assert_eq!(nodes.stored().len(), 1);
    }

    #[tokio::test]
    async fn transport_error_aborts() {
        let nodes = Arc::new(FakeNodes::new(&[("a", 0)]));
        let gateway = gateway(nodes).await;
        let frames = tokio_stream::iter(vec![
            metadata(30, "f"),
            data(10),
            Err(Status::cancelled("client went away")),
        ]);
        let result = session(&gateway, 10).run(frames).await;
        assert_eq!(result, Err(SessionError::Transport("client went away".to_owned())));
    }

    #[tokio::test]
    async fn empty_file_completes_without_chunks() {
        let nodes = Arc::new(FakeNodes::new(&[("a", 0)]));
        let gateway = gateway(nodes.clone()).await;
        let summary = session(&gateway, 10)
            .run(tokio_stream::iter(vec![metadata(0, "empty.txt")]))
            .await
            .unwrap();
        assert_eq!(summary.total_chunks, 0);
        assert!(nodes.stored().is_empty());
    }

    #[tokio::test]
    async fn failing_node_does_not_abort_the_session() {
        let mut fake = FakeNodes::new(&[("a", 0), ("b", 15)]);
        fake.failing.insert("b".to_owned());
        let nodes = Arc::new(fake);
        let gateway = gateway(nodes.clone()).await;
        let frames = tokio_stream::iter(vec![metadata(30, "f"), data(10), data(10), data(10)]);

        let summary = session(&gateway, 10).run(frames).await.unwrap();
        assert_eq!(summary.total_chunks, 3);
        // chunk 3 goes to b once a holds 20 bytes, and fails there
        assert_eq!(summary.failed_chunks, 1);
        let mut stored: Vec<u64> = nodes.stored().iter().map(|(_, c)| c.chunk_number).collect();
        stored.sort_unstable();
        assert_eq!(stored, vec![1, 2]);
        assert_eq!(gateway.registry().occupancy(1), Some(15));
    }

    #[tokio::test]
    async fn cancelled_session_aborts() {
        let nodes = Arc::new(FakeNodes::new(&[("a", 0)]));
        let gateway = gateway(nodes).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut session = IngestSession::new(gateway, 10, cancel);
        let result = session
            .run(tokio_stream::iter(vec![metadata(10, "f"), data(10)]))
            .await;
        assert_eq!(result, Err(SessionError::Cancelled));
    }

    #[tokio::test]
    async fn closed_pool_surfaces_as_dispatch_error() {
        let nodes = Arc::new(FakeNodes::new(&[("a", 0)]));
        let pool = started_pool(1);
        let gateway = Arc::new(
            StorageGateway::initialize(&nodes.addresses(), nodes, pool.clone())
                .await
                .unwrap(),
        );
        pool.drain().await;
        let result = session(&gateway, 10)
            .run(tokio_stream::iter(vec![metadata(20, "f"), data(10), data(10)]))
            .await;
        assert_eq!(
            result,
            Err(SessionError::Dispatch(GatewayError::Pool(PoolError::Closed)))
        );
    }
}
