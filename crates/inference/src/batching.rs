//! Dynamic batching in front of a single model executor.
//!
//! Callers `submit` one preprocessed image at a time. Pending slots sit in a
//! FIFO queue guarded by one mutex; a worker task closes a batch when it holds
//! `max_batch_size` slots or when `batch_wait_window` has elapsed since the
//! oldest slot arrived, stacks the inputs along a new batch axis, runs the
//! executor on a blocking thread and hands row `i` of the output back to the
//! `i`-th slot. While one batch executes the next one keeps filling.
//!
//! An executor error fails every slot of that batch and nothing else.

use crate::backend::{InferenceBackend, InferenceOutput};
use crate::config::InferenceConfig;
use crate::error::DetectError;
use ndarray::{ArrayD, Axis};
use opentelemetry::{
    KeyValue, global,
    metrics::{Counter, Histogram},
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

type SlotResult = Result<InferenceOutput, DetectError>;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub max_batch_size: usize,
    pub batch_wait_window: Duration,
    /// Shape of one submitted item, without the batch axis
    pub item_shape: Vec<usize>,
}

impl From<&InferenceConfig> for RunnerConfig {
    fn from(config: &InferenceConfig) -> Self {
        Self {
            max_batch_size: config.batch.max_batch_size,
            batch_wait_window: config.batch_wait_window(),
            item_shape: config.item_shape(),
        }
    }
}

/// One pending request.
struct BatchSlot {
    seq: u64,
    input: ArrayD<f32>,
    enqueued_at: Instant,
    tx: oneshot::Sender<SlotResult>,
}

#[derive(Default)]
struct PendingQueue {
    slots: VecDeque<BatchSlot>,
    next_seq: u64,
    closed: bool,
}

#[derive(Default)]
struct Counters {
    batches: AtomicU64,
    items: AtomicU64,
    failed_batches: AtomicU64,
    cancelled: AtomicU64,
    largest_batch: AtomicU64,
}

struct Shared {
    queue: Mutex<PendingQueue>,
    notify: Notify,
    counters: Counters,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PendingQueue> {
        // Queue state stays consistent even if a holder panicked
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of runner activity since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub batches_dispatched: u64,
    pub items_dispatched: u64,
    pub failed_batches: u64,
    pub cancelled_slots: u64,
    pub largest_batch: u64,
}

struct BatchMetrics {
    batch_size: Histogram<u64>,
    dispatch_failures: Counter<u64>,
    cancelled: Counter<u64>,
}

impl BatchMetrics {
    fn init(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);
        Self {
            batch_size: meter
                .u64_histogram("batch_size")
                .with_description("Number of requests per executor call")
                .with_boundaries(vec![1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0])
                .build(),
            dispatch_failures: meter
                .u64_counter("batch_dispatch_failures_total")
                .with_description("Executor calls that failed, failing every slot in the batch")
                .build(),
            cancelled: meter
                .u64_counter("batch_slots_cancelled_total")
                .with_description("Slots abandoned by their caller before dispatch")
                .build(),
        }
    }
}

/// Handle to the batching worker. Cheap to clone; every clone submits into the
/// same queue. Dropping the last clone closes the queue, so the worker drains
/// and releases the backend even without an explicit `shutdown`.
#[derive(Clone)]
pub struct BatchingRunner {
    inner: Arc<RunnerHandle>,
    config: Arc<RunnerConfig>,
}

struct RunnerHandle {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for RunnerHandle {
    fn drop(&mut self) {
        self.shared.lock().closed = true;
        self.shared.notify.notify_one();
    }
}

impl BatchingRunner {
    /// Start the batching worker on the current tokio runtime. The runner owns
    /// the backend until `shutdown` completes.
    pub fn spawn<B>(backend: B, config: RunnerConfig) -> Self
    where
        B: InferenceBackend + Send + 'static,
    {
        let shared = Arc::new(Shared {
            queue: Mutex::new(PendingQueue::default()),
            notify: Notify::new(),
            counters: Counters::default(),
        });
        let config = Arc::new(RunnerConfig {
            max_batch_size: config.max_batch_size.max(1),
            ..config
        });

        tracing::info!(
            max_batch_size = config.max_batch_size,
            batch_wait_window_ms = config.batch_wait_window.as_millis() as u64,
            item_shape = ?config.item_shape,
            "Starting batching runner"
        );

        let handle = tokio::spawn(run_worker(backend, shared.clone(), config.clone()));

        Self {
            inner: Arc::new(RunnerHandle {
                shared,
                worker: Mutex::new(Some(handle)),
            }),
            config,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Queue one item and wait for its slice of the batched output.
    ///
    /// Dropping the returned future before the slot's batch is dispatched
    /// removes the slot from the queue. Once dispatched, the executor call runs
    /// to completion regardless.
    pub async fn submit(&self, input: ArrayD<f32>) -> SlotResult {
        if input.shape() != self.config.item_shape.as_slice() {
            return Err(DetectError::ShapeMismatch(format!(
                "expected item shape {:?}, got {:?}",
                self.config.item_shape,
                input.shape()
            )));
        }

        let (tx, rx) = oneshot::channel();
        let seq = {
            let mut queue = self.inner.shared.lock();
            if queue.closed {
                return Err(DetectError::RunnerClosed);
            }
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.slots.push_back(BatchSlot {
                seq,
                input,
                enqueued_at: Instant::now(),
                tx,
            });
            seq
        };
        self.inner.shared.notify.notify_one();

        let mut guard = CancelGuard {
            shared: &self.inner.shared,
            seq,
            armed: true,
        };
        let result = rx.await;
        guard.armed = false;

        // A dropped sender means the worker died without resolving the slot
        result.unwrap_or(Err(DetectError::RunnerClosed))
    }

    /// Number of slots waiting for a batch.
    pub fn pending(&self) -> usize {
        self.inner.shared.lock().slots.len()
    }

    pub fn stats(&self) -> RunnerStats {
        let c = &self.inner.shared.counters;
        RunnerStats {
            batches_dispatched: c.batches.load(Ordering::Relaxed),
            items_dispatched: c.items.load(Ordering::Relaxed),
            failed_batches: c.failed_batches.load(Ordering::Relaxed),
            cancelled_slots: c.cancelled.load(Ordering::Relaxed),
            largest_batch: c.largest_batch.load(Ordering::Relaxed),
        }
    }

    /// Stop accepting submissions, dispatch everything already queued and wait
    /// for the worker to exit. Later calls return immediately.
    pub async fn shutdown(&self) {
        self.inner.shared.lock().closed = true;
        self.inner.shared.notify.notify_one();

        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Batching worker terminated abnormally");
            }
            tracing::info!(stats = ?self.stats(), "Batching runner stopped");
        }
    }
}

/// Removes a slot from the queue if its caller goes away before dispatch.
struct CancelGuard<'a> {
    shared: &'a Shared,
    seq: u64,
    armed: bool,
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut queue = self.shared.lock();
        let before = queue.slots.len();
        queue.slots.retain(|slot| slot.seq != self.seq);
        if queue.slots.len() < before {
            self.shared.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(seq = self.seq, "Pending slot cancelled");
        }
    }
}

async fn run_worker<B>(mut backend: B, shared: Arc<Shared>, config: Arc<RunnerConfig>)
where
    B: InferenceBackend + Send + 'static,
{
    let metrics = BatchMetrics::init("inference");

    loop {
        let Some(deadline) = wait_for_first_slot(&shared, &config).await else {
            break;
        };
        wait_until_closed(&shared, &config, deadline).await;

        let batch = take_batch(&shared, config.max_batch_size, &metrics);
        if batch.is_empty() {
            continue;
        }

        match dispatch(backend, batch, &shared, &metrics).await {
            Some(returned) => backend = returned,
            None => {
                fail_pending(&shared);
                return;
            }
        }
    }

    tracing::debug!("Batching worker drained and exiting");
}

/// Wait for the oldest slot and return its batch deadline, or `None` once the
/// queue is closed and empty.
async fn wait_for_first_slot(shared: &Shared, config: &RunnerConfig) -> Option<Instant> {
    loop {
        let notified = shared.notify.notified();
        {
            let queue = shared.lock();
            if let Some(first) = queue.slots.front() {
                return Some(first.enqueued_at + config.batch_wait_window);
            }
            if queue.closed {
                return None;
            }
        }
        notified.await;
    }
}

/// Keep the batch open until it is full, the deadline passes, or shutdown asks
/// for an immediate drain.
async fn wait_until_closed(shared: &Shared, config: &RunnerConfig, deadline: Instant) {
    loop {
        let notified = shared.notify.notified();
        {
            let queue = shared.lock();
            if queue.slots.len() >= config.max_batch_size || queue.closed {
                return;
            }
        }
        tokio::select! {
            _ = notified => {}
            _ = tokio::time::sleep_until(deadline) => return,
        }
    }
}

fn take_batch(shared: &Shared, max_batch_size: usize, metrics: &BatchMetrics) -> Vec<BatchSlot> {
    let mut queue = shared.lock();
    let n = queue.slots.len().min(max_batch_size);
    let drained: Vec<BatchSlot> = queue.slots.drain(..n).collect();
    drop(queue);

    // Callers that gave up between the last guard check and the drain
    let (batch, abandoned): (Vec<_>, Vec<_>) =
        drained.into_iter().partition(|slot| !slot.tx.is_closed());
    if !abandoned.is_empty() {
        shared
            .counters
            .cancelled
            .fetch_add(abandoned.len() as u64, Ordering::Relaxed);
        metrics.cancelled.add(abandoned.len() as u64, &[]);
    }
    batch
}

/// Run one batch and resolve its slots. Returns the backend for the next batch,
/// or `None` if the blocking task panicked and took the backend with it.
async fn dispatch<B>(
    mut backend: B,
    batch: Vec<BatchSlot>,
    shared: &Shared,
    metrics: &BatchMetrics,
) -> Option<B>
where
    B: InferenceBackend + Send + 'static,
{
    let size = batch.len();
    let first_seq = batch[0].seq;
    let waited = batch[0].enqueued_at.elapsed();

    let (inputs, senders): (Vec<_>, Vec<_>) =
        batch.into_iter().map(|slot| (slot.input, slot.tx)).unzip();

    tracing::debug!(
        batch_size = size,
        first_seq,
        waited_ms = waited.as_secs_f64() * 1000.0,
        "Dispatching batch"
    );

    let joined = tokio::task::spawn_blocking(move || {
        let result = run_batch(&mut backend, &inputs);
        (backend, result)
    })
    .await;

    let counters = &shared.counters;
    counters.batches.fetch_add(1, Ordering::Relaxed);
    counters.items.fetch_add(size as u64, Ordering::Relaxed);
    counters.largest_batch.fetch_max(size as u64, Ordering::Relaxed);
    metrics.batch_size.record(size as u64, &[]);

    let (backend, result) = match joined {
        Ok(pair) => (Some(pair.0), pair.1),
        Err(e) => (None, Err(anyhow::anyhow!("executor task failed: {}", e))),
    };

    match result {
        Ok(outputs) => {
            for (tx, output) in senders.into_iter().zip(outputs) {
                // Receiver gone means the caller timed out; nothing to do
                let _ = tx.send(Ok(output));
            }
        }
        Err(e) => {
            counters.failed_batches.fetch_add(1, Ordering::Relaxed);
            metrics
                .dispatch_failures
                .add(1, &[KeyValue::new("batch_size", size as i64)]);
            tracing::error!(error = %e, batch_size = size, "Batch dispatch failed");

            let err = DetectError::BatchDispatch(format!("{:#}", e));
            for tx in senders {
                let _ = tx.send(Err(err.clone()));
            }
        }
    }

    backend
}

fn run_batch<B: InferenceBackend>(
    backend: &mut B,
    inputs: &[ArrayD<f32>],
) -> anyhow::Result<Vec<InferenceOutput>> {
    let views: Vec<_> = inputs.iter().map(|input| input.view()).collect();
    let batch = ndarray::stack(Axis(0), &views)?;
    let output = backend.infer(&batch)?;
    output.split(inputs.len())
}

/// Worker cannot continue: reject everything still queued and refuse new work.
fn fail_pending(shared: &Shared) {
    let mut queue = shared.lock();
    queue.closed = true;
    for slot in queue.slots.drain(..) {
        let _ = slot.tx.send(Err(DetectError::RunnerClosed));
    }
    tracing::error!("Executor lost; batching runner closed");
}
