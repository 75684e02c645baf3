//! # Recognition Worker Pool
//!
//! Text recognition is CPU and memory heavy, so this module bounds how many
//! recognition tasks run at once. A small pool of reusable workers admits
//! work; excess tasks queue FIFO within their priority tier and are served
//! strictly by priority when a worker frees up.
//!
//! The pool also acts as a concurrency governor: before a dequeued task
//! runs, resident memory is checked against a threshold and the task is
//! briefly delayed when the process is under pressure. This is admission
//! shaping, not admission control; tasks are delayed, never rejected for
//! memory reasons.
//!
//! On shutdown, pooled workers are discarded and every queued waiter is
//! rejected with a pool error, so no caller is left pending forever.

use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::WorkerPoolConfig;
use crate::errors::{AppError, AppResult};

/// Scheduling priority for recognition tasks
///
/// A newly queued high-priority task is serviced before older normal or low
/// tasks at the next dequeue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    High,
    Normal,
    Low,
}

impl Priority {
    fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

/// A reusable recognition worker
///
/// Workers carry no engine state of their own; they are capacity tokens that
/// survive across tasks so the pool can bound concurrency and account for
/// reuse.
#[derive(Debug)]
pub struct RecognitionWorker {
    id: usize,
    tasks_run: u64,
}

impl RecognitionWorker {
    fn new(id: usize) -> Self {
        Self { id, tasks_run: 0 }
    }

    /// Worker identifier, stable for the worker's lifetime
    pub fn id(&self) -> usize {
        self.id
    }

    /// Number of tasks this worker has executed
    pub fn tasks_run(&self) -> u64 {
        self.tasks_run
    }
}

struct PoolState {
    idle: Vec<RecognitionWorker>,
    spawned: usize,
    next_worker_id: usize,
    queues: [VecDeque<oneshot::Sender<RecognitionWorker>>; 3],
    shutdown: bool,
}

/// Snapshot of pool occupancy for observability
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub max_workers: usize,
    pub spawned: usize,
    pub idle: usize,
    pub queued_high: usize,
    pub queued_normal: usize,
    pub queued_low: usize,
    pub shutdown: bool,
}

/// Bounded pool of reusable recognition workers with priority queueing
pub struct WorkerPool {
    state: Mutex<PoolState>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Create a new worker pool; workers are created lazily on demand
    pub fn new(config: WorkerPoolConfig) -> Self {
        Self {
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                spawned: 0,
                next_worker_id: 0,
                queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                shutdown: false,
            }),
            config,
        }
    }

    /// Run a task on a pooled worker
    ///
    /// Suspends until a worker is available, applies the memory cooldown if
    /// the process is under pressure, then runs the task. The worker is
    /// returned to the pool whether the task succeeds, fails, or panics; a
    /// single recognition failure does not invalidate the worker.
    pub async fn schedule<F, Fut, T>(&self, priority: Priority, task: F) -> AppResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AppResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let mut worker = self.acquire(priority).await?;
        self.throttle_if_memory_pressure().await;

        debug!(worker_id = worker.id(), ?priority, "task admitted to worker");
        let outcome = tokio::spawn(task()).await;
        worker.tasks_run += 1;
        self.release(worker);

        match outcome {
            Ok(result) => result,
            Err(join_error) => Err(AppError::Recognition(format!(
                "scheduled task aborted: {}",
                join_error
            ))),
        }
    }

    /// Terminate pooled workers and reject every queued waiter
    ///
    /// Queued callers receive a pool error instead of waiting forever.
    /// Workers currently executing finish their task and are discarded on
    /// release.
    pub fn shutdown(&self) {
        let (rejected, discarded) = {
            let mut state = self.state.lock();
            state.shutdown = true;
            let rejected: usize = state.queues.iter().map(VecDeque::len).sum();
            for queue in state.queues.iter_mut() {
                // Dropping the sender wakes the waiter with a closed-channel
                // error, which acquire() surfaces as a pool shutdown error.
                queue.clear();
            }
            let discarded = state.idle.len();
            state.idle.clear();
            state.spawned -= discarded;
            (rejected, discarded)
        };
        metrics::counter!("worker_pool_shutdowns_total").increment(1);
        info!(
            rejected_waiters = rejected,
            discarded_workers = discarded,
            "worker pool shut down"
        );
    }

    /// Snapshot the pool's occupancy
    pub fn stats(&self) -> PoolStats {
        let state = self.state.lock();
        PoolStats {
            max_workers: self.config.max_workers,
            spawned: state.spawned,
            idle: state.idle.len(),
            queued_high: state.queues[0].len(),
            queued_normal: state.queues[1].len(),
            queued_low: state.queues[2].len(),
            shutdown: state.shutdown,
        }
    }

    async fn acquire(&self, priority: Priority) -> AppResult<RecognitionWorker> {
        let receiver = {
            let mut state = self.state.lock();
            if state.shutdown {
                return Err(AppError::Pool(
                    "worker pool is shut down, task rejected".to_string(),
                ));
            }
            if let Some(worker) = state.idle.pop() {
                return Ok(worker);
            }
            if state.spawned < self.config.max_workers {
                state.spawned += 1;
                let id = state.next_worker_id;
                state.next_worker_id += 1;
                info!(worker_id = id, "created recognition worker");
                return Ok(RecognitionWorker::new(id));
            }
            let (sender, receiver) = oneshot::channel();
            state.queues[priority.index()].push_back(sender);
            metrics::gauge!("worker_pool_queue_depth")
                .set(state.queues.iter().map(VecDeque::len).sum::<usize>() as f64);
            receiver
        };

        receiver.await.map_err(|_| {
            AppError::Pool("worker pool shut down while waiting for a worker".to_string())
        })
    }

    fn release(&self, worker: RecognitionWorker) {
        let mut state = self.state.lock();
        if state.shutdown {
            state.spawned = state.spawned.saturating_sub(1);
            debug!(worker_id = worker.id(), "worker discarded on shutdown");
            return;
        }

        let mut worker = Some(worker);
        // Hand the worker straight to the next waiter, highest priority
        // first. A waiter may have given up (dropped receiver), in which
        // case the send fails and the next waiter is tried.
        for queue in state.queues.iter_mut() {
            while let Some(waiter) = queue.pop_front() {
                match waiter.send(worker.take().expect("worker present until handed off")) {
                    Ok(()) => return,
                    Err(returned) => worker = Some(returned),
                }
            }
        }
        state
            .idle
            .push(worker.take().expect("worker present when no waiter accepted"));
    }

    /// Delay the next task briefly when resident memory is over the
    /// threshold. There is no collector to invoke here; the cooldown gives
    /// the allocator and OS time to reclaim before more recognition work
    /// piles on.
    async fn throttle_if_memory_pressure(&self) {
        let Some(resident) = resident_memory_bytes() else {
            return;
        };
        if resident < self.config.memory_threshold_bytes {
            return;
        }
        metrics::counter!("worker_pool_memory_throttle_total").increment(1);
        warn!(
            resident_bytes = resident,
            threshold_bytes = self.config.memory_threshold_bytes,
            "memory pressure detected, cooling down before recognition"
        );
        let jitter = rand::rng().random_range(0..=250u64);
        tokio::time::sleep(Duration::from_millis(self.config.cooldown_ms + jitter)).await;
    }
}

/// Resident memory of the current process in bytes
///
/// Reads `/proc/self/statm` on Linux (resident pages, 4KB page size).
/// Returns `None` on platforms without a cheap way to ask, which disables
/// throttling rather than guessing.
pub fn resident_memory_bytes() -> Option<u64> {
    #[cfg(target_os = "linux")]
    {
        let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
        let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
        return Some(resident_pages * 4096);
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn small_pool(max_workers: usize) -> Arc<WorkerPool> {
        let config = WorkerPoolConfig {
            max_workers,
            ..WorkerPoolConfig::default()
        };
        Arc::new(WorkerPool::new(config))
    }

    #[tokio::test]
    async fn test_schedule_runs_task() {
        let pool = small_pool(2);
        let result = pool
            .schedule(Priority::Normal, || async { Ok::<_, AppError>(41 + 1) })
            .await;
        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_task_error_propagates_and_worker_survives() {
        let pool = small_pool(1);

        let failed: AppResult<()> = pool
            .schedule(Priority::Normal, || async {
                Err(AppError::Recognition("engine exploded".to_string()))
            })
            .await;
        assert!(matches!(failed, Err(AppError::Recognition(_))));

        // The worker went back to the pool and can run the next task
        let ok = pool
            .schedule(Priority::Normal, || async { Ok::<_, AppError>("fine") })
            .await;
        assert_eq!(ok, Ok("fine"));
        assert_eq!(pool.stats().spawned, 1);
    }

    #[tokio::test]
    async fn test_concurrency_never_exceeds_max_workers() {
        let pool = small_pool(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..7 {
            let pool = Arc::clone(&pool);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                pool.schedule(Priority::Normal, move || async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, AppError>(())
                })
                .await
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.stats().spawned, 2);
    }

    #[tokio::test]
    async fn test_priority_ordering_on_dequeue() {
        let pool = small_pool(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        // Occupy the single worker so subsequent tasks queue
        let gate = Arc::new(tokio::sync::Notify::new());
        let blocker = {
            let pool = Arc::clone(&pool);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                pool.schedule(Priority::Normal, move || async move {
                    gate.notified().await;
                    Ok::<_, AppError>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut handles = Vec::new();
        for (priority, label) in [
            (Priority::Low, "low"),
            (Priority::Normal, "normal"),
            (Priority::High, "high"),
        ] {
            let pool = Arc::clone(&pool);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                pool.schedule(priority, move || async move {
                    order.lock().push(label);
                    Ok::<_, AppError>(())
                })
                .await
            }));
            // Make queue arrival order deterministic
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        gate.notify_one();
        blocker.await.unwrap().unwrap();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock(), vec!["high", "normal", "low"]);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_tasks() {
        let pool = small_pool(2);
        pool.shutdown();

        let result = pool
            .schedule(Priority::High, || async { Ok::<_, AppError>(()) })
            .await;
        assert!(matches!(result, Err(AppError::Pool(_))));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_queued_waiters() {
        let pool = small_pool(1);
        let gate = Arc::new(tokio::sync::Notify::new());

        let blocker = {
            let pool = Arc::clone(&pool);
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                pool.schedule(Priority::Normal, move || async move {
                    gate.notified().await;
                    Ok::<_, AppError>(())
                })
                .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiter = {
            let pool = Arc::clone(&pool);
            tokio::spawn(async move {
                pool.schedule(Priority::Normal, || async { Ok::<_, AppError>(()) })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.shutdown();
        let rejected = waiter.await.unwrap();
        assert!(matches!(rejected, Err(AppError::Pool(_))));

        gate.notify_one();
        blocker.await.unwrap().unwrap();
    }

    #[test]
    fn test_resident_memory_readable_on_linux() {
        if cfg!(target_os = "linux") {
            let resident = resident_memory_bytes();
            assert!(resident.is_some());
            assert!(resident.unwrap() > 0);
        }
    }
}
