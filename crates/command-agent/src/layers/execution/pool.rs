use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agent_protocol::DocumentState;
use anyhow::bail;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    SendCommand,
    CancelCommand,
}

/// One document handed to a pool. `key` is the message id and identifies
/// the job for duplicate detection and cancellation.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub key: String,
    pub kind: WorkKind,
    pub document: DocumentState,
}

#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn handle(&self, item: WorkItem, cancel: CancellationToken);
}

type JobTable = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Submission side of a bounded pool. A job is known to the pool from
/// `submit` until its handler returns.
#[derive(Clone)]
pub struct WorkerPool {
    name: &'static str,
    sender: mpsc::Sender<WorkItem>,
    jobs: JobTable,
    shutdown: CancellationToken,
}

/// Consumer side, turned into workers by [`WorkQueue::spawn`].
pub struct WorkQueue {
    name: &'static str,
    receiver: mpsc::Receiver<WorkItem>,
    jobs: JobTable,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(name: &'static str, capacity: usize) -> (Self, WorkQueue) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let jobs: JobTable = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = CancellationToken::new();
        let pool = Self {
            name,
            sender,
            jobs: Arc::clone(&jobs),
            shutdown: shutdown.clone(),
        };
        let queue = WorkQueue {
            name,
            receiver,
            jobs,
            shutdown,
        };
        (pool, queue)
    }

    pub fn submit(&self, item: WorkItem) -> anyhow::Result<()> {
        let key = item.key.clone();
        let mut jobs = self.jobs.lock().expect("pool jobs lock");
        if jobs.contains_key(&key) {
            bail!("job {key} is already queued in the {} pool", self.name);
        }
        jobs.insert(key.clone(), CancellationToken::new());
        if let Err(err) = self.sender.try_send(item) {
            jobs.remove(&key);
            match err {
                mpsc::error::TrySendError::Full(_) => {
                    bail!("{} pool queue is full, rejected job {key}", self.name)
                }
                mpsc::error::TrySendError::Closed(_) => {
                    bail!("{} pool is shut down, rejected job {key}", self.name)
                }
            }
        }
        tracing::debug!(event = "pool.submitted", pool = self.name, id = %key);
        Ok(())
    }

    /// Signals the job's token. Returns whether a queued or running job
    /// with this key was found.
    pub fn cancel(&self, key: &str) -> bool {
        let jobs = self.jobs.lock().expect("pool jobs lock");
        match jobs.get(key) {
            Some(token) => {
                token.cancel();
                tracing::info!(event = "pool.cancelled", pool = self.name, id = %key);
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub fn has_job(&self, key: &str) -> bool {
        self.jobs.lock().expect("pool jobs lock").contains_key(key)
    }

    /// Stops the workers and cancels every known job.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let jobs = self.jobs.lock().expect("pool jobs lock");
        for token in jobs.values() {
            token.cancel();
        }
    }
}

impl WorkQueue {
    pub fn spawn(self, workers: usize, handler: Arc<dyn WorkHandler>) -> Vec<JoinHandle<()>> {
        let name = self.name;
        let receiver = Arc::new(tokio::sync::Mutex::new(self.receiver));
        (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let jobs = Arc::clone(&self.jobs);
                let shutdown = self.shutdown.clone();
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    run_worker(name, worker, receiver, jobs, shutdown, handler).await;
                })
            })
            .collect()
    }
}

async fn run_worker(
    name: &'static str,
    worker: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<WorkItem>>>,
    jobs: JobTable,
    shutdown: CancellationToken,
    handler: Arc<dyn WorkHandler>,
) {
    loop {
        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                _ = shutdown.cancelled() => None,
                item = receiver.recv() => item,
            }
        };
        let Some(item) = next else {
            break;
        };
        let key = item.key.clone();
        let token = jobs
            .lock()
            .expect("pool jobs lock")
            .get(&key)
            .cloned()
            .unwrap_or_default();

        tracing::debug!(event = "pool.started", pool = name, worker, id = %key);
        let handler = Arc::clone(&handler);
        let job = tokio::spawn(async move { handler.handle(item, token).await });
        if let Err(err) = job.await {
            tracing::error!(
                event = "pool.job_failed",
                pool = name,
                worker,
                id = %key,
                error = %err,
            );
        }
        jobs.lock().expect("pool jobs lock").remove(&key);
        tracing::debug!(event = "pool.finished", pool = name, worker, id = %key);
    }
}
