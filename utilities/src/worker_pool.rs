//! Fixed size executor for remote dispatch jobs.
//!
//! `W` workers pull from one shared queue. A submission holds one of `W`
//! slots from the moment it is accepted until its job finishes, so at most
//! `W` jobs are queued or running at any time and `submit` waits while every
//! slot is taken.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{
    sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, oneshot},
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info_span, trace, warn};

use crate::result::Result;

/// A unit of remote work. Jobs carry everything they need and are never retried.
#[async_trait]
pub trait Job: Send + 'static {
    fn name(&self) -> String;
    async fn execute(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("job timed out after {0:?}")]
    TimedOut(Duration),
    #[error("job failed: {0}")]
    Failed(Box<dyn std::error::Error + Send + Sync>),
    #[error("job panicked: {0}")]
    Panicked(String),
}

pub type JobOutcome = std::result::Result<(), JobError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("worker pool is closed")]
    Closed,
    #[error("worker pool was cancelled")]
    Cancelled,
}

struct Task {
    job: Box<dyn Job>,
    outcome: Option<oneshot::Sender<JobOutcome>>,
    slot: OwnedSemaphorePermit,
}

pub struct WorkerPool {
    worker_count: usize,
    job_timeout: Duration,
    cancel: CancellationToken,
    slots: Arc<Semaphore>,
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(worker_count: usize, job_timeout: Duration, cancel: CancellationToken) -> Self {
        let worker_count = worker_count.max(1);
        let (sender, receiver) = mpsc::channel(worker_count);
        Self {
            worker_count,
            job_timeout,
            cancel,
            slots: Arc::new(Semaphore::new(worker_count)),
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(Mutex::new(receiver)),
            workers: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn start(&self) {
        let mut workers = self
            .workers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !workers.is_empty() {
            return;
        }
        for id in 0..self.worker_count {
            let receiver = self.receiver.clone();
            let cancel = self.cancel.clone();
            let job_timeout = self.job_timeout;
            workers.push(tokio::spawn(
                run_worker(id, receiver, cancel, job_timeout)
                    .instrument(info_span!("pool_worker", worker = id)),
            ));
        }
        debug!(workers = self.worker_count, "worker pool started");
    }

    /// Fire and forget: failures are logged by the worker and otherwise dropped.
    pub async fn submit(&self, job: Box<dyn Job>) -> std::result::Result<(), PoolError> {
        self.enqueue(job, None).await
    }

    /// Like [`WorkerPool::submit`] but hands back a sink that resolves with the job outcome.
    /// The sender side is dropped without a value if the job is discarded on cancellation.
    pub async fn submit_with_outcome(
        &self,
        job: Box<dyn Job>,
    ) -> std::result::Result<oneshot::Receiver<JobOutcome>, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(job, Some(tx)).await?;
        Ok(rx)
    }

    async fn enqueue(
        &self,
        job: Box<dyn Job>,
        outcome: Option<oneshot::Sender<JobOutcome>>,
    ) -> std::result::Result<(), PoolError> {
        if self.cancel.is_cancelled() {
            return Err(PoolError::Cancelled);
        }
        let sender = self.sender.lock().await.clone().ok_or(PoolError::Closed)?;
        let slot = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(PoolError::Cancelled),
            slot = self.slots.clone().acquire_owned() => slot.map_err(|_| PoolError::Closed)?,
        };
        trace!(job = %job.name(), "job accepted");
        sender
            .send(Task { job, outcome, slot })
            .await
            .map_err(|_| PoolError::Closed)
    }

    pub async fn drain(&self) {
        self.sender.lock().await.take();
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "worker task panicked");
            }
        }
        debug!("worker pool drained");
    }
}

async fn run_worker(
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    cancel: CancellationToken,
    job_timeout: Duration,
) {
    loop {
        let task = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                task = receiver.recv() => task,
            }
        };
        let Some(Task { job, outcome, slot }) = task else {
            break;
        };
        if cancel.is_cancelled() {
            debug!(job = %job.name(), "cancelled, dropping job");
            break;
        }
        let name = job.name();
        // a panicking job takes down its own task, not the worker
        let mut handle = tokio::spawn(job.execute().in_current_span());
        let result = match timeout(job_timeout, &mut handle).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(JobError::Failed(e)),
            Ok(Err(e)) => Err(JobError::Panicked(e.to_string())),
            Err(_) => {
                handle.abort();
                Err(JobError::TimedOut(job_timeout))
            }
        };
        match &result {
            Ok(()) => trace!(job = %name, "job finished"),
            Err(e) => warn!(job = %name, error = %e, "job failed"),
        }
        if let Some(outcome) = outcome {
            let _ = outcome.send(result);
        }
        drop(slot);
    }
    if cancel.is_cancelled() {
        // queued jobs never run, dropping them resolves their outcome sinks
        let mut receiver = receiver.lock().await;
        receiver.close();
        while let Ok(task) = receiver.try_recv() {
            debug!(job = %task.job.name(), "cancelled, discarding queued job");
        }
    }
    debug!(worker = id, "worker stopped");
}
