//! Fixed-size worker pool for code-signature extraction.
//!
//! The scan loop must never block on `codesign`, so lookups are queued to a
//! small set of worker tasks that share the signature cache. Workers are not
//! restarted: the pool tracks survivors and fails fast once none remain,
//! letting the orchestrator fall back to in-thread collection. On shutdown,
//! queued and in-flight jobs are failed with a shutdown error rather than
//! left to race the workers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use procscope_core::signature::Signature;

use crate::collectors::codesign;
use crate::sigcache::{file_identity, SignatureCache};

/// Worker-side deadline per signature task.
const TASK_TIMEOUT: Duration = Duration::from_secs(5);
/// Queue depth before senders back off.
const QUEUE_DEPTH: usize = 64;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no live signature workers")]
    NoWorkers,
    #[error("signature pool shutting down")]
    ShuttingDown,
    #[error("signature task canceled")]
    Canceled,
}

/// The single seam the orchestrator depends on: something that can produce a
/// signature for a path. Implemented by the pool and by the inline fallback.
#[async_trait]
pub trait SignatureProvider: Send + Sync {
    async fn signature_of(&self, path: &str) -> Result<Option<Signature>, PoolError>;
}

struct Job {
    path: String,
    reply: oneshot::Sender<Result<Option<Signature>, PoolError>>,
}

type JobQueue = Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>;

/// Decrements the live-worker count even when a worker unwinds.
struct AliveGuard(Arc<AtomicUsize>);

impl Drop for AliveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The codesign worker pool. Owns the signature cache; all cache mutation
/// happens inside worker tasks.
pub struct CodesignPool {
    job_tx: mpsc::Sender<Job>,
    /// Shared with the workers; `shutdown` drains what they never picked up.
    queue: JobQueue,
    alive: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl CodesignPool {
    /// Spawn `workers` tasks sharing one queue and one cache.
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        let (job_tx, job_rx) = mpsc::channel::<Job>(QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let queue: JobQueue = Arc::new(tokio::sync::Mutex::new(job_rx));
        let cache = Arc::new(Mutex::new(SignatureCache::new()));
        let alive = Arc::new(AtomicUsize::new(workers));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let queue = Arc::clone(&queue);
            let cache = Arc::clone(&cache);
            let alive = Arc::clone(&alive);
            let mut shutdown_rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                let _guard = AliveGuard(alive);
                debug!(worker_id, "codesign worker started");
                loop {
                    // Shutdown preference is biased: once signaled, no
                    // further jobs are picked up even if one is ready.
                    let job = tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => break,
                        job = async { queue.lock().await.recv().await } => match job {
                            Some(job) => job,
                            None => break,
                        },
                    };
                    // An in-flight job is abandoned with a shutdown error
                    // rather than run to completion.
                    let result = tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            let _ = job.reply.send(Err(PoolError::ShuttingDown));
                            break;
                        }
                        sig = Self::run_job(&job.path, &cache) => sig,
                    };
                    // Caller may have timed out and gone away; that is fine.
                    let _ = job.reply.send(Ok(result));
                }
                debug!(worker_id, "codesign worker stopped");
            }));
        }

        Self {
            job_tx,
            queue,
            alive,
            closed: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(handles),
        }
    }

    async fn run_job(path: &str, cache: &Mutex<SignatureCache>) -> Option<Signature> {
        if let Some(hit) = cache.lock().unwrap().lookup(path) {
            return Some(hit);
        }

        let result = tokio::time::timeout(TASK_TIMEOUT, codesign::signature_of(path)).await;
        let sig = match result {
            Ok(sig) => sig,
            Err(_) => {
                warn!(path, "signature task timed out");
                None
            }
        };

        if let Some(ref sig) = sig {
            if let Some((mtime, inode)) = file_identity(path) {
                cache.lock().unwrap().insert(path, sig.clone(), mtime, inode);
            }
        }
        sig
    }

    /// Number of workers still alive.
    pub fn alive_workers(&self) -> usize {
        self.alive.load(Ordering::SeqCst)
    }

    /// Stop accepting work, then fail queued and in-flight jobs with a
    /// shutdown error. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }

        // Workers are gone; whatever is still buffered was never picked up.
        // Closing first makes any send that raced past the `closed` check
        // fail at the channel instead of parking a job nobody will answer.
        let mut queue = self.queue.lock().await;
        queue.close();
        while let Ok(job) = queue.try_recv() {
            let _ = job.reply.send(Err(PoolError::ShuttingDown));
        }
    }
}

#[async_trait]
impl SignatureProvider for CodesignPool {
    async fn signature_of(&self, path: &str) -> Result<Option<Signature>, PoolError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        if self.alive_workers() == 0 {
            return Err(PoolError::NoWorkers);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.job_tx
            .send(Job {
                path: path.to_string(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| PoolError::ShuttingDown)?;

        match reply_rx.await {
            Ok(result) => result,
            Err(_) => Err(PoolError::Canceled),
        }
    }
}

/// In-thread fallback used when the pool has no survivors. Uncached; the
/// cache belongs to the pool.
pub struct InlineCodesign;

#[async_trait]
impl SignatureProvider for InlineCodesign {
    async fn signature_of(&self, path: &str) -> Result<Option<Signature>, PoolError> {
        Ok(codesign::signature_of(path).await)
    }
}
