//! Fixed-size pool of OCR engines shared by every extraction in the process.
//!
//! Each worker is a task that owns one engine and drains its own bounded job
//! queue, so a worker never runs two recognitions at once. `acquire` hands
//! workers out round-robin; `recognize` additionally holds one of `size`
//! semaphore permits so no more than `size` calls are in flight overall.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant as StdInstant};

use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, OnceCell, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::services::ocr_service::{OcrEngine, OcrEngineFactory};

const WORKER_QUEUE_DEPTH: usize = 2;

/// A point in time after which OCR work is abandoned.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

struct OcrJob {
    image: Vec<u8>,
    reply: oneshot::Sender<AppResult<String>>,
}

/// Handle to one pool worker. Cheap to clone; not exclusive.
#[derive(Clone)]
pub struct OcrWorker {
    id: usize,
    jobs: mpsc::Sender<OcrJob>,
    completed: Arc<AtomicU64>,
}

impl OcrWorker {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Jobs this worker has finished since the pool started.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Queues an image on this worker and waits for its text.
    pub async fn recognize(&self, image: Vec<u8>) -> AppResult<String> {
        let (reply, rx) = oneshot::channel();
        self.jobs
            .send(OcrJob { image, reply })
            .await
            .map_err(|_| AppError::service_unavailable(format!("OCR worker {}", self.id)))?;
        rx.await
            .map_err(|_| AppError::ocr(format!("OCR worker {} dropped the job", self.id)))?
    }
}

struct PoolState {
    workers: Vec<OcrWorker>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

pub struct OcrWorkerPool {
    factory: Arc<dyn OcrEngineFactory>,
    size: usize,
    call_timeout: Duration,
    state: OnceCell<PoolState>,
    /// Serializes start-up attempts and remembers the last failure.
    init_attempt: AsyncMutex<Option<String>>,
    init_failures: AtomicU64,
    cursor: AtomicUsize,
    permits: Semaphore,
    calls: AtomicU64,
    shutdown: CancellationToken,
}

impl OcrWorkerPool {
    pub fn new(factory: Arc<dyn OcrEngineFactory>, size: usize, call_timeout: Duration) -> Self {
        let size = size.max(1);
        Self {
            factory,
            size,
            call_timeout,
            state: OnceCell::new(),
            init_attempt: AsyncMutex::new(None),
            init_failures: AtomicU64::new(0),
            cursor: AtomicUsize::new(0),
            permits: Semaphore::new(size),
            calls: AtomicU64::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    /// Recognitions requested since start.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Completed jobs per worker, in worker order. Empty before init.
    pub fn worker_loads(&self) -> Vec<u64> {
        self.state
            .get()
            .map(|s| s.workers.iter().map(OcrWorker::completed).collect())
            .unwrap_or_default()
    }

    /// Starts every worker. Idempotent: concurrent callers share one
    /// initialization attempt, and its failure reaches all of them.
    ///
    /// A caller that arrives after a failed attempt has settled starts a
    /// fresh one.
    pub async fn init(&self) -> AppResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(AppError::service_unavailable("OCR worker pool (shut down)"));
        }
        if self.state.initialized() {
            return Ok(());
        }

        let failures_seen = self.init_failures.load(Ordering::Acquire);
        let mut last_failure = self.init_attempt.lock().await;
        if self.state.initialized() {
            return Ok(());
        }
        if self.init_failures.load(Ordering::Acquire) != failures_seen {
            let message = last_failure.clone().unwrap_or_default();
            return Err(AppError::pool_init(message));
        }

        match self.start_workers().await {
            Ok(state) => {
                if self.state.set(state).is_err() {
                    return Err(AppError::internal("OCR pool initialized twice"));
                }
                *last_failure = None;
                Ok(())
            }
            Err(e) => {
                *last_failure = Some(match &e {
                    AppError::WorkerPoolInit { message } => message.clone(),
                    other => other.to_string(),
                });
                self.init_failures.fetch_add(1, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Starts initialization in the background so the first scanned PDF
    /// does not pay for engine start-up.
    pub fn prewarm(self: &Arc<Self>) {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = pool.init().await {
                warn!(error = %e, "OCR pool pre-warm failed; OCR will retry on first use");
            }
        });
    }

    async fn start_workers(&self) -> AppResult<PoolState> {
        let start = StdInstant::now();
        info!(size = self.size, "initializing OCR worker pool");

        let engines = futures::future::try_join_all(
            (0..self.size).map(|id| self.factory.create(id)),
        )
        .await
        .map_err(|e| match e {
            AppError::WorkerPoolInit { .. } => e,
            other => AppError::pool_init(other.to_string()),
        })
        .inspect_err(|e| error!(error = %e, "OCR worker pool initialization failed"))?;

        let mut workers = Vec::with_capacity(self.size);
        let mut handles = Vec::with_capacity(self.size);
        for (id, engine) in engines.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(WORKER_QUEUE_DEPTH);
            let completed = Arc::new(AtomicU64::new(0));
            handles.push(tokio::spawn(run_worker(
                id,
                engine,
                rx,
                self.shutdown.child_token(),
                Arc::clone(&completed),
            )));
            workers.push(OcrWorker {
                id,
                jobs: tx,
                completed,
            });
        }

        info!(
            size = self.size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "OCR worker pool ready"
        );
        Ok(PoolState {
            workers,
            handles: Mutex::new(handles),
        })
    }

    /// Next worker in round-robin order, initializing the pool if needed.
    pub async fn acquire(&self) -> AppResult<OcrWorker> {
        self.init().await?;
        let state = self
            .state
            .get()
            .ok_or_else(|| AppError::internal("OCR pool state missing after init"))?;
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.size;
        Ok(state.workers[index].clone())
    }

    /// Recognizes one image within the per-call timeout and, if given, the
    /// caller's deadline.
    ///
    /// Running out of time yields empty text rather than an error; the job
    /// is abandoned and its worker stops the engine. Engine failures come
    /// back as `OcrError` and leave the pool usable.
    pub async fn recognize(&self, image: Vec<u8>, deadline: Option<&Deadline>) -> AppResult<String> {
        self.init().await?;
        self.calls.fetch_add(1, Ordering::Relaxed);

        let remaining = deadline.map(Deadline::remaining);
        if remaining == Some(Duration::ZERO) {
            debug!("OCR deadline already passed, skipping page");
            return Ok(String::new());
        }

        let _permit = match remaining {
            Some(limit) => match timeout(limit, self.permits.acquire()).await {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("OCR deadline passed while waiting for a worker");
                    return Ok(String::new());
                }
            },
            None => self.permits.acquire().await,
        }
        .map_err(|_| AppError::service_unavailable("OCR worker pool (shut down)"))?;

        let worker = self.acquire().await?;
        let limit = deadline
            .map(|d| d.remaining().min(self.call_timeout))
            .unwrap_or(self.call_timeout);

        match timeout(limit, worker.recognize(image)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    worker_id = worker.id(),
                    limit_ms = limit.as_millis() as u64,
                    "OCR call timed out, treating page as empty"
                );
                Ok(String::new())
            }
        }
    }

    /// Stops every worker and waits for them. Later calls fail.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.permits.close();
        let handles = self
            .state
            .get()
            .map(|s| match s.handles.lock() {
                Ok(mut h) => std::mem::take(&mut *h),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            })
            .unwrap_or_default();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "OCR worker ended abnormally");
            }
        }
        info!("OCR worker pool shut down");
    }
}

async fn run_worker(
    id: usize,
    engine: Arc<dyn OcrEngine>,
    mut jobs: mpsc::Receiver<OcrJob>,
    shutdown: CancellationToken,
    completed: Arc<AtomicU64>,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let OcrJob { image, mut reply } = job;
        if reply.is_closed() {
            debug!(worker_id = id, "skipping job abandoned while queued");
            continue;
        }

        tokio::select! {
            result = engine.recognize(&image) => {
                completed.fetch_add(1, Ordering::Relaxed);
                if let Err(e) = &result {
                    warn!(worker_id = id, error = %e, "recognition failed");
                }
                let _ = reply.send(result);
            }
            _ = reply.closed() => {
                debug!(worker_id = id, "job abandoned mid-recognition");
            }
            _ = shutdown.cancelled() => break,
        }
    }
    debug!(worker_id = id, "OCR worker stopped");
}
