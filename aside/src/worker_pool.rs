use futures::FutureExt;
use parking_lot::Mutex;
use shared::config::{OverflowPolicy, PoolConfig};
use shared::{Error, Result};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Bounded-concurrency executor for background work.
///
/// `core_workers` workers are spawned up front. Once the queue is full, extra
/// workers are spawned up to `max_workers`; beyond that the configured
/// [`OverflowPolicy`] decides between rejecting and waiting. Cloning the pool
/// yields another handle to the same workers.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<Inner>,
}

struct Inner {
    config: PoolConfig,
    // None once intake is closed
    sender: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Job>>,
    // Jobs sitting in the channel, counted independently of the sender
    queued: AtomicUsize,
    live_workers: AtomicUsize,
    tracker: TaskTracker,
    token: CancellationToken,
}

impl WorkerPool {
    /// Spawns the core workers on the current tokio runtime.
    pub fn start(config: PoolConfig) -> Result<Self> {
        config.validate()?;

        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let pool = Self {
            inner: Arc::new(Inner {
                config,
                sender: Mutex::new(Some(sender)),
                receiver: tokio::sync::Mutex::new(receiver),
                queued: AtomicUsize::new(0),
                live_workers: AtomicUsize::new(0),
                tracker: TaskTracker::new(),
                token: CancellationToken::new(),
            }),
        };

        let config = &pool.inner.config;
        for _ in 0..config.core_workers {
            pool.inner.live_workers.fetch_add(1, Ordering::SeqCst);
            pool.spawn_worker(None, true);
        }

        info!(
            core_workers = config.core_workers,
            max_workers = config.max_workers,
            queue_capacity = config.queue_capacity,
            overflow = ?config.overflow,
            "Worker pool started"
        );
        Ok(pool)
    }

    /// Queues `task` for execution. The task receives a token that is cancelled
    /// when the pool shuts down.
    pub async fn submit<F, Fut>(&self, task: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let sender = self.inner.sender.lock().clone().ok_or(Error::PoolClosed)?;
        let job: Job = Box::pin(task(self.inner.token.child_token()));

        // Counted before sending so a worker never dequeues an uncounted job
        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        match sender.try_send(job) {
            Ok(()) => {
                self.ensure_worker();
                Ok(())
            }
            Err(TrySendError::Closed(_)) => {
                self.inner.queued.fetch_sub(1, Ordering::SeqCst);
                Err(Error::PoolClosed)
            }
            Err(TrySendError::Full(job)) => {
                self.inner.queued.fetch_sub(1, Ordering::SeqCst);
                if self.reserve_extra_worker() {
                    debug!(
                        live_workers = self.live_workers(),
                        "Queue full, spawning extra worker"
                    );
                    self.spawn_worker(Some(job), false);
                    return Ok(());
                }

                match self.inner.config.overflow {
                    OverflowPolicy::Reject => {
                        let err = Error::PoolSaturated {
                            queued: self.queued(),
                            workers: self.live_workers(),
                        };
                        warn!("Rejecting task: {err}");
                        Err(err)
                    }
                    OverflowPolicy::Block => {
                        debug!("Pool saturated, waiting for queue space");
                        self.inner.queued.fetch_add(1, Ordering::SeqCst);
                        if sender.send(job).await.is_err() {
                            self.inner.queued.fetch_sub(1, Ordering::SeqCst);
                            return Err(Error::PoolClosed);
                        }
                        self.ensure_worker();
                        Ok(())
                    }
                }
            }
        }
    }

    /// Stops intake and waits for queued and running tasks to finish.
    pub async fn drain(&self) {
        self.close_intake();
        self.inner.tracker.wait().await;
        info!("Worker pool drained");
    }

    /// Stops intake, cancels every task's token and waits for the workers to exit.
    pub async fn shutdown(&self) {
        self.close_intake();
        self.inner.token.cancel();
        self.inner.tracker.wait().await;
        info!("Worker pool shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    pub fn live_workers(&self) -> usize {
        self.inner.live_workers.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a worker. Still meaningful while draining.
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn close_intake(&self) {
        if self.inner.sender.lock().take().is_some() {
            debug!("Worker pool intake closed");
        }
        self.inner.tracker.close();
    }

    /// With zero core workers a queued task has nobody to run it until the
    /// queue fills, so the first one brings a worker up.
    fn ensure_worker(&self) {
        if self.live_workers() == 0 && self.reserve_extra_worker() {
            debug!("No live workers, spawning one for the queued task");
            self.spawn_worker(None, false);
        }
    }

    fn reserve_extra_worker(&self) -> bool {
        reserve_worker(&self.inner)
    }

    fn spawn_worker(&self, first: Option<Job>, core: bool) {
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(run_worker(inner, first, core));
    }
}

fn reserve_worker(inner: &Inner) -> bool {
    let max = inner.config.max_workers;
    inner
        .live_workers
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            (n < max).then_some(n + 1)
        })
        .is_ok()
}

async fn run_worker(inner: Arc<Inner>, first: Option<Job>, core: bool) {
    if let Some(job) = first {
        run_job(job).await;
    }

    loop {
        if core {
            match next_job(&inner).await {
                Some(job) => run_job(job).await,
                None => break,
            }
            continue;
        }

        // Extra workers retire after sitting idle for keep_alive
        match tokio::time::timeout(inner.config.keep_alive, next_job(&inner)).await {
            Ok(Some(job)) => run_job(job).await,
            Ok(None) => break,
            Err(_) => {
                let remaining = inner.live_workers.fetch_sub(1, Ordering::SeqCst) - 1;
                // A task queued while retiring may have seen this worker as live
                if remaining == 0
                    && inner.queued.load(Ordering::SeqCst) > 0
                    && reserve_worker(&inner)
                {
                    continue;
                }
                debug!(remaining, "Idle worker retired");
                return;
            }
        }
    }

    let remaining = inner.live_workers.fetch_sub(1, Ordering::SeqCst) - 1;
    debug!(core, remaining, "Worker exiting");
}

async fn next_job(inner: &Inner) -> Option<Job> {
    let job = inner.receiver.lock().await.recv().await;
    if job.is_some() {
        inner.queued.fetch_sub(1, Ordering::SeqCst);
    }
    job
}

async fn run_job(job: Job) {
    if let Err(panic) = AssertUnwindSafe(job).catch_unwind().await {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("Worker task panicked: {message}");
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("live_workers", &self.live_workers())
            .field("queued", &self.queued())
            .field("closed", &self.is_closed())
            .finish()
    }
}
