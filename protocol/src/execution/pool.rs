//! Worker pool that runs transactions off the consensus path.
//!
//! Each worker owns one queue. A transaction goes to the worker picked by
//! its sender address, so two transactions from the same sender always run
//! in submission order while different senders proceed in parallel.
//!
//! The submitter gets a oneshot receiver back and can await the outcome
//! without blocking message handling.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::engine::{ExecError, ExecutionEngine, Outcome};
use crate::crypto::keys::Address;
use crate::transaction::Transaction;

/// Result delivered to the submitter.
pub type ExecResult = Result<Outcome, ExecError>;

/// Queue depth per worker.
pub const WORKER_QUEUE_CAPACITY: usize = 256;

struct Job {
    tx: Transaction,
    done: oneshot::Sender<ExecResult>,
}

/// A fixed set of execution workers sharded by sender.
pub struct ExecutionPool {
    shards: RwLock<Vec<mpsc::Sender<Job>>>,
    workers: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for ExecutionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPool")
            .field("workers", &self.workers)
            .finish()
    }
}

impl ExecutionPool {
    /// Spawns `workers` tasks on the current runtime. Zero is treated as one.
    pub fn spawn(engine: Arc<ExecutionEngine>, workers: usize) -> Self {
        let workers = workers.max(1);
        let mut shards = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_CAPACITY);
            shards.push(tx);
            handles.push(tokio::spawn(run_worker(id, Arc::clone(&engine), rx)));
        }

        info!(workers, "execution pool started");
        Self {
            shards: RwLock::new(shards),
            workers,
            handles: Mutex::new(handles),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Queues `tx` and returns the receiver for its outcome.
    pub async fn submit(&self, tx: Transaction) -> Result<oneshot::Receiver<ExecResult>, ExecError> {
        let queue = self
            .shards
            .read()
            .get(self.shard_for(&tx.from))
            .cloned()
            .ok_or(ExecError::PoolClosed)?;
        let (done, rx) = oneshot::channel();
        queue
            .send(Job { tx, done })
            .await
            .map_err(|_| ExecError::PoolClosed)?;
        Ok(rx)
    }

    /// Submits `tx` and waits for its outcome.
    pub async fn execute(&self, tx: Transaction) -> ExecResult {
        let rx = self.submit(tx).await?;
        rx.await.map_err(|_| ExecError::PoolClosed)?
    }

    /// Closes every queue and waits for workers to finish what they hold.
    /// Later submissions fail with [`ExecError::PoolClosed`].
    pub async fn shutdown(&self) {
        self.shards.write().clear();
        let handles = std::mem::take(&mut *self.handles.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "execution worker ended abnormally");
            }
        }
        info!("execution pool stopped");
    }

    fn shard_for(&self, sender: &Address) -> usize {
        let bytes = sender.as_bytes();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&bytes[..8]);
        (u64::from_le_bytes(prefix) % self.workers as u64) as usize
    }
}

async fn run_worker(id: usize, engine: Arc<ExecutionEngine>, mut rx: mpsc::Receiver<Job>) {
    debug!(worker = id, "execution worker started");
    while let Some(Job { tx, done }) = rx.recv().await {
        let result = engine.apply(&tx);
        if let Err(e) = &result {
            debug!(worker = id, error = %e, "transaction not applied");
        }
        // The submitter may have stopped waiting.
        let _ = done.send(result);
    }
    debug!(worker = id, "execution worker stopped");
}
