//! Background job queue
//!
//! Four durable, Redis-list-backed queues — `metadata-fetching`,
//! `email-notifications`, `analytics-processing`, `click-tracking` — each
//! drained by its own pool of workers. Workers are plain `tokio::spawn`
//! loops tracked through a `CancellationToken` tree, the same idiom
//! [`BackgroundWorker`](crate::agents::background_worker::BackgroundWorker)
//! uses for ad-hoc tasks, without the actor-message plumbing: job dispatch
//! here is a tight loop over one queue, not a request/reply protocol.
//!
//! Click-tracking jobs are additionally batched before they reach the
//! analytics gateway (B=10, 5s interval or queue-full, whichever first) to
//! keep ClickHouse inserts cheap. Enqueue on a full queue blocks the caller
//! briefly (at most 50ms) rather than dropping the job outright; if the
//! queue is still full after that grace period the caller is expected to
//! fall back to a synchronous direct write.

use std::sync::Arc;
use std::time::Duration;

use deadpool_redis::Pool as RedisPool;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::domain::{Job, JobKind};
use crate::error::{Error, Result};

const ALL_KINDS: [JobKind; 4] = [JobKind::Metadata, JobKind::Email, JobKind::Analytics, JobKind::ClickTracking];

/// `JobKind` doesn't derive `Hash` (its own domain role never needed it);
/// index queue tables by this instead of pulling `Hash` onto the shared
/// domain type just for this module's sake.
fn kind_index(kind: JobKind) -> usize {
    match kind {
        JobKind::Metadata => 0,
        JobKind::Email => 1,
        JobKind::Analytics => 2,
        JobKind::ClickTracking => 3,
    }
}

/// Per-queue tuning. Concurrency and batching vary by [`JobKind`]; retry
/// policy is read off `JobKind::default_max_attempts` at enqueue time.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub concurrency: usize,
    pub base_backoff: Duration,
    /// Soft capacity. Enqueue blocks briefly once the queue reaches this
    /// depth rather than refusing the job outright.
    pub soft_capacity: usize,
    pub batch_size: usize,
    pub batch_interval: Duration,
}

impl QueueConfig {
    #[must_use]
    pub fn for_kind(kind: JobKind) -> Self {
        match kind {
            JobKind::ClickTracking => Self {
                concurrency: 10,
                base_backoff: Duration::from_secs(2),
                soft_capacity: 1000,
                batch_size: 10,
                batch_interval: Duration::from_secs(5),
            },
            _ => Self {
                concurrency: 5,
                base_backoff: Duration::from_secs(2),
                soft_capacity: 1000,
                batch_size: 1,
                batch_interval: Duration::from_secs(5),
            },
        }
    }
}

/// How long [`JobQueue::enqueue`] will block waiting for room in a
/// soft-capacity-limited queue before giving up and returning
/// [`EnqueueOutcome::Rejected`].
const ENQUEUE_BACKPRESSURE_GRACE: Duration = Duration::from_millis(50);

/// A handler processes one job to completion or returns an error, which
/// the queue interprets as a retriable failure (subject to
/// `Job::can_retry`) or, past `max_attempts`, a dead-letter. Handlers
/// interpret `job.payload` themselves — it is opaque JSON scoped to the
/// `JobKind` they were registered for.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> anyhow::Result<()>;

    /// Invoked for a batch of jobs at once. The default fans out to
    /// [`JobHandler::handle`] one at a time; the click-tracking handler
    /// overrides this to make one batched analytics-gateway call.
    async fn handle_batch(&self, jobs: &[Job]) -> anyhow::Result<()> {
        for job in jobs {
            self.handle(job).await?;
        }
        Ok(())
    }
}

/// Outcome of a [`JobQueue::enqueue`] call, distinguishing a normal accept
/// from the back-pressure path so callers can fall back to a synchronous
/// write when the queue never drained in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    /// The queue stayed at soft capacity for the whole grace period; the
    /// caller should perform a direct, synchronous write instead.
    Rejected,
}

/// Snapshot for `getStats()` style dashboards and the live-stats fanout.
#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub queue_name: &'static str,
    pub pending: u64,
    pub processing: bool,
}

struct QueueHandle {
    config: QueueConfig,
    depth_guard: Arc<Semaphore>,
    processing: Arc<std::sync::atomic::AtomicUsize>,
}

/// Redis-list-backed durable job queue with one worker pool per
/// [`JobKind`]. Construct with [`JobQueue::new`], then [`JobQueue::start`]
/// once per kind with the handler for that queue.
pub struct JobQueue {
    pool: RedisPool,
    queues: [QueueHandle; 4],
    cancel: CancellationToken,
}

impl JobQueue {
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        let queues = ALL_KINDS.map(|kind| {
            let config = QueueConfig::for_kind(kind);
            QueueHandle {
                depth_guard: Arc::new(Semaphore::new(config.soft_capacity)),
                processing: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
                config,
            }
        });
        Self {
            pool,
            queues,
            cancel: CancellationToken::new(),
        }
    }

    fn redis_key(kind: JobKind) -> String {
        format!("queue:{}", kind.queue_name())
    }

    fn dead_letter_key(kind: JobKind) -> String {
        format!("queue:{}:dead", kind.queue_name())
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Internal(format!("failed to get Redis connection for job queue: {e}")))
    }

    /// Enqueues `job`, applying the soft back-pressure policy: if the
    /// queue is already at its configured soft capacity, blocks up to
    /// [`ENQUEUE_BACKPRESSURE_GRACE`] for a permit to free up before
    /// giving up and returning `Rejected`. Callers that get `Rejected`
    /// should perform the equivalent work synchronously rather than lose
    /// it — this queue never silently drops a job that was accepted.
    pub async fn enqueue(&self, job: &Job) -> Result<EnqueueOutcome> {
        let handle = &self.queues[kind_index(job.kind)];

        let permit = match tokio::time::timeout(ENQUEUE_BACKPRESSURE_GRACE, handle.depth_guard.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                tracing::warn!(kind = ?job.kind, "job queue at soft capacity, falling back to caller");
                return Ok(EnqueueOutcome::Rejected);
            }
        };
        // The permit represents one queued slot; it is released once the
        // job is popped by a worker (see `add_permits` in the pop loops).
        permit.forget();

        let payload = serde_json::to_string(job).map_err(|e| Error::Internal(format!("failed to encode job: {e}")))?;

        let mut conn = self.connection().await?;
        use deadpool_redis::redis::AsyncCommands;
        conn.lpush::<_, _, ()>(Self::redis_key(job.kind), payload)
            .await
            .map_err(|e| Error::Internal(format!("failed to enqueue job: {e}")))?;

        Ok(EnqueueOutcome::Accepted)
    }

    /// Current pending depth and whether any worker is mid-job, per queue.
    pub async fn stats(&self) -> Result<Vec<QueueStats>> {
        let mut conn = self.connection().await?;
        use deadpool_redis::redis::AsyncCommands;

        let mut out = Vec::with_capacity(ALL_KINDS.len());
        for kind in ALL_KINDS {
            let pending: u64 = conn
                .llen(Self::redis_key(kind))
                .await
                .map_err(|e| Error::Internal(format!("failed to read queue depth: {e}")))?;
            let processing = self.queues[kind_index(kind)].processing.load(std::sync::atomic::Ordering::Relaxed) > 0;
            out.push(QueueStats {
                queue_name: kind.queue_name(),
                pending,
                processing,
            });
        }
        Ok(out)
    }

    /// Spawns the worker pool for `kind`, running until the queue's
    /// cancellation token fires. `handler` is shared across all workers in
    /// the pool.
    pub fn start(&self, kind: JobKind, handler: Arc<dyn JobHandler>) {
        let queue = &self.queues[kind_index(kind)];
        let config = queue.config.clone();
        let depth_guard = queue.depth_guard.clone();
        let processing = queue.processing.clone();
        let pool = self.pool.clone();
        let cancel = self.cancel.child_token();

        if config.batch_size > 1 {
            tokio::spawn(run_batched_worker(kind, pool, handler, config, depth_guard, processing, cancel));
        } else {
            for worker_idx in 0..config.concurrency {
                tokio::spawn(run_worker(
                    kind,
                    pool.clone(),
                    handler.clone(),
                    config.clone(),
                    depth_guard.clone(),
                    processing.clone(),
                    cancel.clone(),
                    worker_idx,
                ));
            }
        }
    }

    /// Cancels every worker pool. Pending jobs remain in their Redis lists
    /// for the next process to resume.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

async fn pop_one(conn: &mut deadpool_redis::Connection, key: &str) -> Option<String> {
    use deadpool_redis::redis::AsyncCommands;
    match conn.brpop::<_, Option<(String, String)>>(key, 1.0).await {
        Ok(Some((_, payload))) => Some(payload),
        Ok(None) => None,
        Err(e) => {
            tracing::warn!(error = %e, "job queue pop failed");
            None
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_worker(
    kind: JobKind,
    pool: RedisPool,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
    depth_guard: Arc<Semaphore>,
    processing: Arc<std::sync::atomic::AtomicUsize>,
    cancel: CancellationToken,
    worker_idx: usize,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let mut conn = match pool.get().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, ?kind, worker_idx, "worker could not get redis connection, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let popped = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            p = pop_one(&mut conn, &JobQueue::redis_key(kind)) => p,
        };
        drop(conn);

        let Some(payload) = popped else { continue };
        depth_guard.add_permits(1);

        let mut job: Job = match serde_json::from_str(&payload) {
            Ok(j) => j,
            Err(e) => {
                tracing::error!(error = %e, ?kind, "dropping undecodable job payload");
                continue;
            }
        };

        processing.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let outcome = run_with_retry(&handler, &job, &config, &pool).await;
        processing.fetch_sub(1, std::sync::atomic::Ordering::Relaxed);

        if let RetryOutcome::Retry = outcome {
            job.attempts += 1;
            requeue(&pool, kind, &job).await;
        }
    }
}

enum RetryOutcome {
    Done,
    Retry,
}

async fn run_with_retry(handler: &Arc<dyn JobHandler>, job: &Job, config: &QueueConfig, pool: &RedisPool) -> RetryOutcome {
    match handler.handle(job).await {
        Ok(()) => RetryOutcome::Done,
        Err(e) => {
            if job.can_retry() {
                let backoff = config.base_backoff * 2u32.saturating_pow(job.attempts.min(6));
                tracing::warn!(error = %e, kind = ?job.kind, attempts = job.attempts, backoff_secs = backoff.as_secs(), "job failed, scheduling retry");
                tokio::time::sleep(backoff).await;
                RetryOutcome::Retry
            } else {
                tracing::error!(error = %e, kind = ?job.kind, attempts = job.attempts, "job exhausted retries, dead-lettering");
                dead_letter(pool, job.kind, job).await;
                RetryOutcome::Done
            }
        }
    }
}

async fn requeue(pool: &RedisPool, kind: JobKind, job: &Job) {
    let Ok(mut conn) = pool.get().await else {
        tracing::error!(?kind, "could not get connection to requeue failed job, job is lost");
        return;
    };
    use deadpool_redis::redis::AsyncCommands;
    if let Ok(payload) = serde_json::to_string(job) {
        let _: Result<(), _> = conn.lpush(JobQueue::redis_key(kind), payload).await;
    }
}

/// Dead-lettering is log-and-drop: the failed job is recorded to a bounded
/// Redis list for operator inspection, never retried again.
async fn dead_letter(pool: &RedisPool, kind: JobKind, job: &Job) {
    let Ok(mut conn) = pool.get().await else { return };
    use deadpool_redis::redis::AsyncCommands;
    if let Ok(payload) = serde_json::to_string(job) {
        let _: Result<(), _> = conn.lpush(JobQueue::dead_letter_key(kind), payload).await;
        let _: Result<(), _> = conn.ltrim(JobQueue::dead_letter_key(kind), 0, 999).await;
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_batched_worker(
    kind: JobKind,
    pool: RedisPool,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
    depth_guard: Arc<Semaphore>,
    processing: Arc<std::sync::atomic::AtomicUsize>,
    cancel: CancellationToken,
) {
    let batch: Arc<Mutex<Vec<Job>>> = Arc::new(Mutex::new(Vec::with_capacity(config.batch_size)));

    loop {
        if cancel.is_cancelled() {
            flush_batch(&handler, &batch, &pool, kind).await;
            return;
        }

        let mut conn = match pool.get().await {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, ?kind, "batched worker could not get redis connection, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let popped = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                flush_batch(&handler, &batch, &pool, kind).await;
                return;
            }
            p = pop_one(&mut conn, &JobQueue::redis_key(kind)) => p,
        };
        drop(conn);

        if let Some(payload) = popped {
            depth_guard.add_permits(1);
            match serde_json::from_str::<Job>(&payload) {
                Ok(job) => {
                    let mut guard = batch.lock().await;
                    guard.push(job);
                    if guard.len() >= config.batch_size {
                        let drained: Vec<_> = guard.drain(..).collect();
                        drop(guard);
                        processing.store(1, std::sync::atomic::Ordering::Relaxed);
                        dispatch_batch(&handler, drained, &pool, kind, &config).await;
                        processing.store(0, std::sync::atomic::Ordering::Relaxed);
                    }
                }
                Err(e) => tracing::error!(error = %e, ?kind, "dropping undecodable batched job payload"),
            }
        } else {
            // No job within the pop timeout: treat it as the batch-interval
            // tick and flush whatever has accumulated so far.
            flush_batch(&handler, &batch, &pool, kind).await;
        }
    }
}

async fn flush_batch(handler: &Arc<dyn JobHandler>, batch: &Arc<Mutex<Vec<Job>>>, pool: &RedisPool, kind: JobKind) {
    let mut guard = batch.lock().await;
    if guard.is_empty() {
        return;
    }
    let drained: Vec<_> = guard.drain(..).collect();
    drop(guard);
    let config = QueueConfig::for_kind(kind);
    dispatch_batch(handler, drained, pool, kind, &config).await;
}

async fn dispatch_batch(handler: &Arc<dyn JobHandler>, jobs: Vec<Job>, pool: &RedisPool, kind: JobKind, config: &QueueConfig) {
    if let Err(e) = handler.handle_batch(&jobs).await {
        tracing::warn!(error = %e, kind = ?kind, batch_size = jobs.len(), "batch job failed, re-queuing retriable jobs individually");
        for mut job in jobs {
            if job.can_retry() {
                job.attempts += 1;
                let backoff = config.base_backoff * 2u32.saturating_pow(job.attempts.min(6));
                tokio::time::sleep(backoff).await;
                requeue(pool, kind, &job).await;
            } else {
                dead_letter(pool, kind, &job).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_tracking_gets_higher_concurrency_and_batching() {
        let ct = QueueConfig::for_kind(JobKind::ClickTracking);
        let metadata = QueueConfig::for_kind(JobKind::Metadata);
        assert_eq!(ct.concurrency, 10);
        assert_eq!(metadata.concurrency, 5);
        assert_eq!(ct.batch_size, 10);
        assert_eq!(metadata.batch_size, 1);
    }

    #[test]
    fn redis_keys_are_namespaced_per_queue() {
        assert_eq!(JobQueue::redis_key(JobKind::Metadata), "queue:metadata-fetching");
        assert_eq!(JobQueue::redis_key(JobKind::ClickTracking), "queue:click-tracking");
        assert_eq!(JobQueue::dead_letter_key(JobKind::Analytics), "queue:analytics-processing:dead");
    }

    #[test]
    fn kind_index_is_stable_and_covers_all_kinds() {
        let mut seen = [false; 4];
        for kind in ALL_KINDS {
            seen[kind_index(kind)] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }
}
