//! Flush Coordinator
//!
//! Ships committed store mutations to the persistence backend on a single
//! background writer task and provides a durability barrier over them.
//!
//! # Design
//!
//! - Every submitted op gets a sequence number under a short submit lock, so
//!   channel order equals sequence order.
//! - The writer applies ops strictly in order and publishes the committed
//!   watermark through a `watch` channel.
//! - `flush` snapshots the last assigned sequence number and waits for the
//!   watermark to reach it. Ops submitted after that snapshot are not part of
//!   the barrier, and no global lock is held while waiting.
//! - Backend failures are recorded with their sequence number and returned by
//!   the first flush whose barrier covers them.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::key::CacheKey;
use super::metrics::{CacheMetrics, LatencyTracker};
use crate::domain::ports::{EntryRecord, PersistenceBackend};
use crate::error::{Error, Result};

/// Flush coordinator configuration
#[derive(Debug, Clone)]
pub struct FlushConfig {
    /// Give up waiting on a barrier after this long
    pub timeout: Option<Duration>,
    /// Warn when more than this many ops are waiting to be persisted
    pub queue_warn: u64,
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            queue_warn: 1024,
        }
    }
}

/// Persistence operation produced by a committed store mutation
#[derive(Debug, Clone)]
pub enum PersistOp {
    /// Write the current snapshot of an entry
    Store(EntryRecord),
    /// Remove an evicted entry
    Remove(CacheKey),
}

impl PersistOp {
    fn key(&self) -> &CacheKey {
        match self {
            PersistOp::Store(record) => &record.key,
            PersistOp::Remove(key) => key,
        }
    }
}

struct Sequenced {
    seq: u64,
    op: PersistOp,
}

#[derive(Debug, Clone)]
struct PersistFailure {
    seq: u64,
    message: String,
}

struct SubmitState {
    last_seq: u64,
    tx: Option<mpsc::UnboundedSender<Sequenced>>,
}

/// State shared with the writer task
struct Shared {
    committed: watch::Sender<u64>,
    failures: Mutex<Vec<PersistFailure>>,
    metrics: Arc<CacheMetrics>,
}

/// Durability barrier over store mutations
pub struct FlushCoordinator {
    submit: Mutex<SubmitState>,
    shared: Arc<Shared>,
    config: FlushConfig,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FlushCoordinator {
    /// Start the writer task. Must be called from within a Tokio runtime.
    pub fn start(
        backend: Arc<dyn PersistenceBackend>,
        config: FlushConfig,
        metrics: Arc<CacheMetrics>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (committed, _) = watch::channel(0u64);
        let shared = Arc::new(Shared {
            committed,
            failures: Mutex::new(Vec::new()),
            metrics,
        });
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_writer(backend, rx, shared.clone(), cancel.clone()));

        Self {
            submit: Mutex::new(SubmitState {
                last_seq: 0,
                tx: Some(tx),
            }),
            shared,
            config,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Queue an op, returning its sequence number
    pub fn submit(&self, op: PersistOp) -> Result<u64> {
        let mut state = self.submit.lock();
        let tx = state
            .tx
            .as_ref()
            .ok_or_else(|| Error::Persistence("flush coordinator is shut down".to_string()))?;

        let seq = state.last_seq + 1;
        tx.send(Sequenced { seq, op })
            .map_err(|_| Error::Persistence("persistence writer stopped".to_string()))?;
        state.last_seq = seq;

        let pending = seq.saturating_sub(*self.shared.committed.borrow());
        if pending > self.config.queue_warn {
            warn!(pending, "Persistence backlog above warning threshold");
        }
        Ok(seq)
    }

    /// Highest sequence number durably applied
    pub fn committed(&self) -> u64 {
        *self.shared.committed.borrow()
    }

    /// Ops submitted but not yet applied
    pub fn pending(&self) -> u64 {
        let last = self.submit.lock().last_seq;
        last.saturating_sub(self.committed())
    }

    /// Wait until every op submitted before this call has been applied.
    pub async fn flush(&self) -> Result<()> {
        let tracker = LatencyTracker::start();
        let target = self.submit.lock().last_seq;

        let mut rx = self.shared.committed.subscribe();
        let wait = async move {
            rx.wait_for(|committed| *committed >= target)
                .await
                .map(|_| ())
                .map_err(|_| Error::Persistence("persistence writer stopped".to_string()))
        };
        match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| Error::FlushTimeout(limit))??,
            None => wait.await?,
        }

        let failed: Vec<PersistFailure> = {
            let mut failures = self.shared.failures.lock();
            let (covered, later): (Vec<_>, Vec<_>) =
                failures.drain(..).partition(|f| f.seq <= target);
            *failures = later;
            covered
        };

        self.shared.metrics.record_flush(tracker.elapsed());

        if let Some(first) = failed.first() {
            return Err(Error::FlushFailed {
                failures: failed.len(),
                first: first.message.clone(),
            });
        }
        debug!(target, "Flush barrier reached");
        Ok(())
    }

    /// Stop accepting ops, persist everything queued, then stop the writer.
    pub async fn shutdown(&self) -> Result<()> {
        self.submit.lock().tx.take();
        self.join_writer().await
    }

    /// Stop the writer without persisting queued ops. Skipped ops are
    /// reported as failures by the next flush.
    pub async fn abort(&self) -> Result<()> {
        self.submit.lock().tx.take();
        self.cancel.cancel();
        self.join_writer().await
    }

    async fn join_writer(&self) -> Result<()> {
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| Error::Internal(format!("persistence writer panicked: {}", e)))?;
        }
        Ok(())
    }
}

impl Drop for FlushCoordinator {
    fn drop(&mut self) {
        // Closing the channel lets the writer drain and exit on its own.
        self.submit.get_mut().tx.take();
    }
}

async fn run_writer(
    backend: Arc<dyn PersistenceBackend>,
    mut rx: mpsc::UnboundedReceiver<Sequenced>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                rx.close();
                while let Ok(item) = rx.try_recv() {
                    shared.record_failure(item.seq, "aborted before persistence".to_string());
                    shared.committed.send_replace(item.seq);
                }
                info!("Persistence writer aborted");
                return;
            }
            item = rx.recv() => {
                let Some(item) = item else {
                    debug!("Persistence writer drained");
                    return;
                };
                apply(backend.as_ref(), &shared, item).await;
            }
        }
    }
}

async fn apply(backend: &dyn PersistenceBackend, shared: &Shared, item: Sequenced) {
    let Sequenced { seq, op } = item;
    let key = op.key().clone();

    let result = match op {
        PersistOp::Store(record) => backend.store(record).await,
        PersistOp::Remove(key) => backend.remove(&key).await.map(|_| ()),
    };

    match result {
        Ok(()) => shared.metrics.record_persisted(),
        Err(e) => {
            error!(key = %key, seq, error = %e, "Persistence operation failed");
            shared.record_failure(seq, format!("{}: {}", key, e));
        }
    }
    shared.committed.send_replace(seq);
}

impl Shared {
    fn record_failure(&self, seq: u64, message: String) {
        self.metrics.record_persistence_failure();
        self.failures.lock().push(PersistFailure { seq, message });
    }
}

// =============================================================================
// Tests
// =============================================================================
