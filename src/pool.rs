//! The elastic worker pool.
//!
//! A bounded set of workers pulls tasks from one shared pending queue,
//! resolves each through the item processor and emits the result on a
//! completion channel. A supervisor adapts the worker count between the
//! configured bounds in proportion to queue depth. Scaling is advisory and
//! asynchronous: the pool functions correctly even if scale requests are slow
//! or only partially honoured.
//!
//! Worker provisioning sits behind the [ScaleProvider] capability trait so
//! the pool does not depend on a specific mechanism; [TokioScaleProvider]
//! runs workers as in-process tokio tasks.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::BatchError;
use crate::metrics;
use crate::models::{FailureReason, ProcessResult, Task};
use crate::processor::Process;

/// Interval between scaling decisions.
const SCALE_INTERVAL: Duration = Duration::from_millis(100);

/// How long an idle worker parks before re-checking the queue.
const IDLE_PARK: Duration = Duration::from_millis(50);

/// Worker count bounds and provisioning hints for one batch.
#[derive(Clone, Debug)]
pub struct PoolSettings {
    /// Lower bound on the worker count.
    pub min_workers: usize,
    /// Upper bound on the worker count.
    pub max_workers: usize,
    /// Opaque provisioning hints passed through to the scale provider.
    pub worker_hints: Option<serde_json::Value>,
}

impl From<&crate::models::BatchConfig> for PoolSettings {
    fn from(config: &crate::models::BatchConfig) -> Self {
        Self {
            min_workers: config.min_workers,
            max_workers: config.max_workers,
            worker_hints: config.worker_hints.clone(),
        }
    }
}

/// Capability interface for worker provisioning.
///
/// Implementations may run workers in-process or on a remote cluster. Scale
/// requests are advisory; the pool keeps functioning when they are honoured
/// late or not at all.
#[async_trait]
pub trait ScaleProvider: Send + Sync {
    /// Advisory request to bring the number of active workers to `target`.
    async fn request_scale(&self, target: usize);

    /// Number of currently active workers.
    fn current_count(&self) -> usize;

    /// Stop all workers, waiting up to `drain` for in-flight items to
    /// finish. Returns false if any worker had to be abandoned.
    async fn stop_all(&self, drain: Duration) -> bool;
}

/// State shared between the pool, its workers and the scale provider.
///
/// The pending queue and the in-flight set are the only mutable structures
/// workers touch; everything else a worker needs is immutable.
pub struct WorkerContext {
    /// Pending tasks, consumed front to back.
    queue: Mutex<VecDeque<Task>>,
    /// Indices of tasks currently being processed.
    in_flight: Mutex<HashSet<usize>>,
    /// Wakes parked workers when tasks arrive.
    notify: Notify,
    /// Set once shutdown starts; workers stop taking new tasks.
    shutting_down: AtomicBool,
    /// Completion channel. Taken and dropped at the end of shutdown so the
    /// completion stream terminates.
    completions: Mutex<Option<mpsc::UnboundedSender<ProcessResult>>>,
    /// Resolves one task to a terminal result.
    processor: Arc<dyn Process>,
}

/// Decrements a worker counter when the worker future is dropped, so the
/// count stays accurate when a worker is aborted mid-task.
struct CountGuard(Arc<AtomicUsize>);

impl Drop for CountGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerContext {
    fn new(processor: Arc<dyn Process>, completions: mpsc::UnboundedSender<ProcessResult>) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            in_flight: Mutex::new(HashSet::new()),
            notify: Notify::new(),
            shutting_down: AtomicBool::new(false),
            completions: Mutex::new(Some(completions)),
            processor,
        }
    }

    /// Number of pending tasks in the queue.
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Wake parked workers.
    pub fn notify_workers(&self) {
        self.notify.notify_waiters();
    }

    /// Emit one result on the completion channel, if still open.
    async fn emit(&self, result: ProcessResult) {
        if let Some(sender) = self.completions.lock().await.as_ref() {
            // The receiver may already be gone if the driver bailed early.
            let _ = sender.send(result);
        }
    }

    /// Run one worker until it is stopped or the pool shuts down.
    ///
    /// The loop: take the next pending task, resolve it through the
    /// processor, emit the result; park briefly when the queue is empty.
    pub async fn run_worker(
        self: Arc<Self>,
        id: usize,
        stop: watch::Receiver<bool>,
        active: Arc<AtomicUsize>,
    ) {
        let _guard = CountGuard(active);
        tracing::debug!(worker = id, "worker started");
        loop {
            if *stop.borrow() || self.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            // The pop and the in-flight insert happen with both locks held,
            // so a taken task is always recorded in exactly one of the two
            // structures, even if this worker is aborted mid-handoff.
            let task = {
                let mut in_flight = self.in_flight.lock().await;
                let mut queue = self.queue.lock().await;
                queue.pop_front().map(|task| {
                    in_flight.insert(task.index);
                    task
                })
            };
            match task {
                Some(task) => {
                    let index = task.index;
                    let result = self.processor.process(&task).await;
                    self.emit(result).await;
                    self.in_flight.lock().await.remove(&index);
                }
                None => {
                    let _ = tokio::time::timeout(IDLE_PARK, self.notify.notified()).await;
                }
            }
        }
        tracing::debug!(worker = id, "worker stopped");
    }
}

/// One provisioned worker task.
struct WorkerHandle {
    stop_tx: watch::Sender<bool>,
    join: JoinHandle<()>,
}

/// [ScaleProvider] running workers as in-process tokio tasks.
pub struct TokioScaleProvider {
    ctx: Arc<WorkerContext>,
    workers: Mutex<Vec<WorkerHandle>>,
    active: Arc<AtomicUsize>,
    next_id: AtomicUsize,
}

impl TokioScaleProvider {
    /// Return a new provider over the given worker context.
    pub fn new(ctx: Arc<WorkerContext>) -> Self {
        Self {
            ctx,
            workers: Mutex::new(Vec::new()),
            active: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ScaleProvider for TokioScaleProvider {
    async fn request_scale(&self, target: usize) {
        let mut workers = self.workers.lock().await;
        let active = self.active.load(Ordering::SeqCst);
        if target > active {
            for _ in active..target {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                let (stop_tx, stop_rx) = watch::channel(false);
                self.active.fetch_add(1, Ordering::SeqCst);
                let ctx = self.ctx.clone();
                let counter = self.active.clone();
                let join = tokio::spawn(ctx.run_worker(id, stop_rx, counter));
                workers.push(WorkerHandle { stop_tx, join });
            }
        } else {
            // Workers already signalled to stop are still retiring and show
            // in the active count; the excess is counted over the workers
            // that have not been signalled yet.
            let remaining: Vec<&WorkerHandle> = workers
                .iter()
                .filter(|handle| !*handle.stop_tx.borrow())
                .collect();
            let excess = remaining.len().saturating_sub(target);
            for handle in remaining.into_iter().take(excess) {
                let _ = handle.stop_tx.send(true);
            }
            // Wake parked workers so retirement is observed promptly.
            self.ctx.notify_workers();
        }
    }

    fn current_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    async fn stop_all(&self, drain: Duration) -> bool {
        let mut workers = self.workers.lock().await;
        for handle in workers.iter() {
            let _ = handle.stop_tx.send(true);
        }
        self.ctx.notify_workers();
        let deadline = Instant::now() + drain;
        let mut drained = true;
        for mut handle in workers.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut handle.join).await.is_err() {
                handle.join.abort();
                // Wait for the abort to land so the in-flight set is final.
                let _ = (&mut handle.join).await;
                drained = false;
            }
        }
        drained
    }
}

/// Worker count wanted for a queue of `pending` tasks, within bounds.
fn desired_workers(pending: usize, min_workers: usize, max_workers: usize) -> usize {
    pending.clamp(min_workers, max_workers)
}

/// The elastic worker pool for one batch.
pub struct WorkerPool {
    ctx: Arc<WorkerContext>,
    provider: Arc<dyn ScaleProvider>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    supervisor_stop: watch::Sender<bool>,
    shutdown_started: AtomicBool,
}

impl WorkerPool {
    /// Start a pool with in-process tokio workers.
    ///
    /// Returns the pool and the completion stream, which yields one result
    /// per resolved task in completion order.
    pub async fn start(
        processor: Arc<dyn Process>,
        settings: PoolSettings,
    ) -> Result<(Self, UnboundedReceiverStream<ProcessResult>), BatchError> {
        Self::start_with(processor, settings, |ctx, _settings| {
            Arc::new(TokioScaleProvider::new(ctx)) as Arc<dyn ScaleProvider>
        })
        .await
    }

    /// Start a pool with a caller-supplied scale provider.
    pub async fn start_with<F>(
        processor: Arc<dyn Process>,
        settings: PoolSettings,
        make_provider: F,
    ) -> Result<(Self, UnboundedReceiverStream<ProcessResult>), BatchError>
    where
        F: FnOnce(Arc<WorkerContext>, &PoolSettings) -> Arc<dyn ScaleProvider>,
    {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let ctx = Arc::new(WorkerContext::new(processor, completions_tx));
        let provider = make_provider(ctx.clone(), &settings);
        provider.request_scale(settings.min_workers).await;
        if provider.current_count() == 0 {
            return Err(BatchError::PoolStart);
        }
        let (supervisor_stop, stop_rx) = watch::channel(false);
        let supervisor = tokio::spawn(supervise(
            ctx.clone(),
            provider.clone(),
            settings,
            stop_rx,
        ));
        let pool = WorkerPool {
            ctx,
            provider,
            supervisor: Mutex::new(Some(supervisor)),
            supervisor_stop,
            shutdown_started: AtomicBool::new(false),
        };
        Ok((pool, UnboundedReceiverStream::new(completions_rx)))
    }

    /// Enqueue all tasks for processing. Returns immediately; completions
    /// arrive on the stream returned by [WorkerPool::start].
    ///
    /// Tasks submitted after shutdown has started are dropped.
    pub async fn submit_batch(&self, tasks: Vec<Task>) {
        if self.ctx.shutting_down.load(Ordering::SeqCst) {
            tracing::warn!(
                dropped = tasks.len(),
                "tasks submitted after shutdown were dropped"
            );
            return;
        }
        let mut queue = self.ctx.queue.lock().await;
        queue.extend(tasks);
        let depth = queue.len();
        drop(queue);
        tracing::debug!(depth, "batch submitted");
        self.ctx.notify_workers();
    }

    /// Shut the pool down.
    ///
    /// Stops issuing new work immediately, waits up to `drain` for in-flight
    /// items, then abandons the rest. Abandoned and never-started tasks are
    /// emitted as cancelled failures so every submitted task has a terminal
    /// result. Idempotent; only the first call does the work.
    pub async fn shutdown(&self, drain: Duration) {
        if self.shutdown_started.swap(true, Ordering::SeqCst) {
            tracing::warn!("pool shutdown requested more than once");
            return;
        }
        tracing::info!("shutting down worker pool");
        self.ctx.shutting_down.store(true, Ordering::SeqCst);
        self.ctx.notify_workers();

        // Stop the scaling supervisor first so it cannot provision workers
        // while they are being torn down.
        let _ = self.supervisor_stop.send(true);
        if let Some(supervisor) = self.supervisor.lock().await.take() {
            let _ = supervisor.await;
        }

        let drained = self.provider.stop_all(drain).await;
        if !drained {
            tracing::warn!("drain timeout expired, abandoning in-flight tasks");
        }

        // Every task that never reached a worker, plus any abandoned
        // mid-flight, still needs a terminal slot.
        let cancelled: Vec<Task> = self.ctx.queue.lock().await.drain(..).collect();
        for task in cancelled {
            self.ctx
                .emit(ProcessResult::Failure {
                    index: task.index,
                    reason: FailureReason::Cancelled,
                })
                .await;
        }
        let abandoned: Vec<usize> = self.ctx.in_flight.lock().await.drain().collect();
        for index in abandoned {
            self.ctx
                .emit(ProcessResult::Failure {
                    index,
                    reason: FailureReason::Cancelled,
                })
                .await;
        }

        // Close the completion channel so the stream terminates.
        self.ctx.completions.lock().await.take();
        metrics::WORKERS_ACTIVE.set(0);
        metrics::QUEUE_DEPTH.set(0);
    }
}

/// Periodically adapt the worker count to the queue depth.
async fn supervise(
    ctx: Arc<WorkerContext>,
    provider: Arc<dyn ScaleProvider>,
    settings: PoolSettings,
    mut stop: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(SCALE_INTERVAL);
    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = stop.changed() => break,
        }
        let pending = ctx.pending().await;
        let active = provider.current_count();
        metrics::QUEUE_DEPTH.set(pending as i64);
        metrics::WORKERS_ACTIVE.set(active as i64);
        let target = desired_workers(pending, settings.min_workers, settings.max_workers);
        if target != active {
            tracing::debug!(pending, active, target, "requesting scale change");
            provider.request_scale(target).await;
        }
    }
}
