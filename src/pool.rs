//! Fixed-size pool of worker threads executing [`Task`]s.
//!
//! Workers pull from a shared [`TaskQueue`] and run every task inside a
//! failure boundary: a task that returns a failure or panics is logged and
//! recorded, and the worker moves on to the next one.

use crate::error::{Error, Result};
use crate::logger::Logger;
use crate::models::{BatchReport, DownloadResult, TaskReport};
use crate::queue::TaskQueue;
use crate::task::Task;
use indicatif::ProgressBar;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

pub const MIN_WORKERS: usize = 1;
pub const MAX_WORKERS: usize = 999;

/// Checks a user-supplied worker count against `[MIN_WORKERS, MAX_WORKERS]`.
pub fn validate_worker_count(count: i64) -> Result<usize> {
    match usize::try_from(count) {
        Ok(n) if (MIN_WORKERS..=MAX_WORKERS).contains(&n) => Ok(n),
        _ => Err(Error::InvalidConfiguration(format!(
            "thread count must be between {MIN_WORKERS} and {MAX_WORKERS}, got {count}"
        ))),
    }
}

/// A bounded queue must hold at least one task.
pub fn validate_queue_capacity(capacity: Option<usize>) -> Result<Option<usize>> {
    match capacity {
        Some(0) => Err(Error::InvalidConfiguration(
            "queue capacity must be at least 1, got 0".to_owned(),
        )),
        other => Ok(other),
    }
}

#[derive(Clone)]
pub struct PoolConfig {
    pub workers: usize,
    /// Bound on queued tasks; `None` means unbounded.
    pub queue_capacity: Option<usize>,
    /// Advanced once per finished task.
    pub progress: Option<ProgressBar>,
}

impl PoolConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: None,
            progress: None,
        }
    }
}

/// A task tagged with the sequence number the queue assigned on push.
type Queued = (u64, Box<dyn Task>);

struct Shared {
    queue: TaskQueue<Queued>,
    reports: Mutex<Vec<TaskReport>>,
    logger: Arc<Logger>,
    progress: Option<ProgressBar>,
}

/// Releases one in-flight slot when dropped, whatever path the worker takes.
struct InFlight<'a>(&'a TaskQueue<Queued>);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.done();
    }
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(workers: usize, logger: Arc<Logger>) -> Result<Self> {
        Self::with_config(PoolConfig::new(workers), logger)
    }

    pub fn with_config(config: PoolConfig, logger: Arc<Logger>) -> Result<Self> {
        let count = validate_worker_count(i64::try_from(config.workers).unwrap_or(i64::MAX))?;

        let queue = match validate_queue_capacity(config.queue_capacity)? {
            Some(cap) => TaskQueue::bounded(cap),
            None => TaskQueue::unbounded(),
        };
        let shared = Arc::new(Shared {
            queue,
            reports: Mutex::new(Vec::new()),
            logger,
            progress: config.progress,
        });

        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(count),
        };

        for id in 0..count {
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("bulk-dl-worker-{id}"))
                .spawn(move || worker_loop(id, &shared));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    // Dropping the pool joins the workers already started.
                    drop(pool);
                    return Err(Error::WorkerSpawn(e));
                }
            }
        }

        Ok(pool)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Tasks enqueued but not yet finished.
    pub fn outstanding(&self) -> usize {
        self.shared.queue.outstanding()
    }

    /// Submits `task` for execution.
    ///
    /// With an unbounded queue this never blocks. With a bounded queue it waits
    /// for space. Fails only once the pool has been shut down.
    pub fn enqueue<T: Task + 'static>(&self, task: T) -> Result<()> {
        self.enqueue_boxed(Box::new(task))
    }

    pub fn enqueue_boxed(&self, task: Box<dyn Task>) -> Result<()> {
        self.shared
            .queue
            .push_with(|seq| (seq, task))
            .map(|_| ())
            .map_err(|_| Error::PoolShutDown)
    }

    /// Blocks until every enqueued task has finished, then returns the reports
    /// collected since the previous call, in the order the queue accepted them.
    pub fn wait_all(&self) -> BatchReport {
        self.shared.queue.wait_idle();
        let mut tasks = std::mem::take(
            &mut *self
                .shared
                .reports
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        tasks.sort_by_key(|t| t.seq);
        BatchReport { tasks }
    }

    /// Lets workers drain the queue, then joins them. Safe to call repeatedly.
    pub fn shutdown(&mut self) {
        self.shared.queue.close();
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("worker").to_owned();
            if handle.join().is_err() {
                error!(worker = %name, "worker thread panicked outside the task boundary");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(id: usize, shared: &Shared) {
    debug!(worker = id, "worker started");

    while let Some((seq, task)) = shared.queue.pop_blocking() {
        let _in_flight = InFlight(&shared.queue);

        let label = task.label().to_owned();
        let started = Instant::now();
        let outcome = run_isolated(task);
        let elapsed_ms = elapsed_millis(started.elapsed());

        match &outcome {
            DownloadResult::Success {
                bytes_written,
                path,
            } => shared.logger.log(format!(
                "Downloaded: {} -> {} ({} bytes)",
                label,
                path.display(),
                bytes_written
            )),
            DownloadResult::Failure { reason } => shared
                .logger
                .log(format!("Failed to download {}: {}", label, reason)),
        }

        shared
            .reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(TaskReport {
                seq,
                label,
                outcome,
                elapsed_ms,
            });

        if let Some(pb) = &shared.progress {
            pb.inc(1);
        }
    }

    debug!(worker = id, "worker exiting");
}

fn elapsed_millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Runs `task`, turning a panic into a failure outcome.
fn run_isolated(task: Box<dyn Task>) -> DownloadResult {
    match panic::catch_unwind(AssertUnwindSafe(move || task.execute())) {
        Ok(outcome) => outcome,
        Err(payload) => {
            DownloadResult::failure(format!("task panicked: {}", panic_message(&*payload)))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::MemorySink;
    use crate::task;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn ok() -> DownloadResult {
        DownloadResult::success(0, "")
    }

    fn pool(workers: usize) -> (WorkerPool, MemorySink) {
        let (logger, sink) = Logger::capture();
        (WorkerPool::new(workers, logger.into_shared()).unwrap(), sink)
    }

    #[test]
    fn rejects_out_of_range_worker_counts() {
        for bad in [0usize, 1000, 5000] {
            let (logger, _) = Logger::capture();
            let err = WorkerPool::new(bad, logger.into_shared()).err().unwrap();
            assert!(matches!(err, Error::InvalidConfiguration(_)), "{bad}: {err}");
        }
        assert!(validate_worker_count(-3).is_err());
        assert!(validate_worker_count(0).is_err());
        assert_eq!(validate_worker_count(1).unwrap(), 1);
        assert_eq!(validate_worker_count(999).unwrap(), 999);
    }

    #[test]
    fn rejects_zero_queue_capacity() {
        let (logger, _) = Logger::capture();
        let config = PoolConfig {
            queue_capacity: Some(0),
            ..PoolConfig::new(2)
        };
        let err = WorkerPool::with_config(config, logger.into_shared()).err().unwrap();
        assert!(matches!(err, Error::InvalidConfiguration(_)), "{err}");
        assert_eq!(validate_queue_capacity(None).unwrap(), None);
        assert_eq!(validate_queue_capacity(Some(1)).unwrap(), Some(1));
    }

    #[test]
    fn elapsed_millis_saturates() {
        assert_eq!(elapsed_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(elapsed_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn spawns_requested_number_of_workers() {
        let (pool, _) = pool(7);
        assert_eq!(pool.worker_count(), 7);
    }

    #[test]
    fn wait_all_without_tasks_returns_immediately() {
        let (pool, _) = pool(3);
        let report = pool.wait_all();
        assert!(report.is_empty());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn every_task_runs_exactly_once() {
        for workers in [1, 2, 8, 32] {
            let (pool, _) = pool(workers);
            let hits: Arc<Vec<AtomicUsize>> = Arc::new((0..200).map(|_| AtomicUsize::new(0)).collect());

            for i in 0..200 {
                let hits = Arc::clone(&hits);
                pool.enqueue(task::from_fn(format!("t{i}"), move || {
                    hits[i].fetch_add(1, Ordering::SeqCst);
                    ok()
                }))
                .unwrap();
            }

            let report = pool.wait_all();
            assert_eq!(report.len(), 200);
            assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
            let seqs: Vec<u64> = report.tasks.iter().map(|t| t.seq).collect();
            assert_eq!(seqs, (0..200).collect::<Vec<_>>());
        }
    }

    #[test]
    fn single_worker_runs_tasks_in_fifo_order() {
        let (pool, _) = pool(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let order = Arc::clone(&order);
            pool.enqueue(task::from_fn(format!("t{i}"), move || {
                order.lock().unwrap().push(i);
                ok()
            }))
            .unwrap();
        }
        pool.wait_all();

        assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn failures_and_panics_do_not_stop_the_pool() {
        let (pool, sink) = pool(2);
        let completed = Arc::new(AtomicUsize::new(0));

        for i in 0..30 {
            let completed = Arc::clone(&completed);
            pool.enqueue(task::from_fn(format!("t{i}"), move || {
                completed.fetch_add(1, Ordering::SeqCst);
                match i % 3 {
                    0 => DownloadResult::failure("simulated network error"),
                    1 => panic!("simulated crash in t{i}"),
                    _ => ok(),
                }
            }))
            .unwrap();
        }

        let report = pool.wait_all();
        assert_eq!(completed.load(Ordering::SeqCst), 30);
        assert_eq!(report.len(), 30);
        assert_eq!(report.succeeded(), 10);
        assert_eq!(report.failed(), 20);
        assert_eq!(pool.worker_count(), 2);

        let panicked = report
            .failures()
            .filter(|t| matches!(&t.outcome, DownloadResult::Failure { reason } if reason.starts_with("task panicked: simulated crash")))
            .count();
        assert_eq!(panicked, 10);
        assert!(sink.contents().contains("Failed to download t0: simulated network error"));

        // The pool keeps serving work after the failures.
        pool.enqueue(task::from_fn("after", ok)).unwrap();
        assert_eq!(pool.wait_all().succeeded(), 1);
    }

    #[test]
    fn wait_all_does_not_return_before_slowest_task() {
        let (pool, _) = pool(4);
        let flag = Arc::new(AtomicBool::new(false));

        for i in 0..12u64 {
            pool.enqueue(task::from_fn(format!("t{i}"), move || {
                thread::sleep(Duration::from_millis((i * 7) % 30));
                ok()
            }))
            .unwrap();
        }
        {
            let flag = Arc::clone(&flag);
            pool.enqueue(task::from_fn("slowest", move || {
                thread::sleep(Duration::from_millis(150));
                flag.store(true, Ordering::SeqCst);
                ok()
            }))
            .unwrap();
        }

        let report = pool.wait_all();
        assert!(flag.load(Ordering::SeqCst));
        assert_eq!(report.len(), 13);
    }

    #[test]
    fn concurrency_never_exceeds_worker_count() {
        let (pool, _) = pool(3);
        let current = Arc::new(AtomicUsize::new(0));
        let max = Arc::new(AtomicUsize::new(0));

        for i in 0..24 {
            let current = Arc::clone(&current);
            let max = Arc::clone(&max);
            pool.enqueue(task::from_fn(format!("t{i}"), move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                max.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(10));
                current.fetch_sub(1, Ordering::SeqCst);
                ok()
            }))
            .unwrap();
        }
        pool.wait_all();

        let observed = max.load(Ordering::SeqCst);
        assert!(observed <= 3, "observed {observed} concurrent tasks");
        assert!(observed > 0);
    }

    #[test]
    fn concurrent_producers_lose_nothing() {
        let (pool, _) = pool(4);
        let pool = Arc::new(pool);
        let ran = Arc::new(AtomicUsize::new(0));

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let pool = Arc::clone(&pool);
                let ran = Arc::clone(&ran);
                thread::spawn(move || {
                    for i in 0..100 {
                        let ran = Arc::clone(&ran);
                        pool.enqueue(task::from_fn(format!("p{p}-{i}"), move || {
                            ran.fetch_add(1, Ordering::SeqCst);
                            ok()
                        }))
                        .unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(pool.wait_all().len(), 400);
        assert_eq!(ran.load(Ordering::SeqCst), 400);
    }

    #[test]
    fn report_order_matches_queue_order_across_producers() {
        let (pool, _) = pool(1);
        let pool = Arc::new(pool);
        let executed = Arc::new(Mutex::new(Vec::new()));

        let producers: Vec<_> = (0..6)
            .map(|p| {
                let pool = Arc::clone(&pool);
                let executed = Arc::clone(&executed);
                thread::spawn(move || {
                    for i in 0..50 {
                        let label = format!("p{p}-{i}");
                        let executed = Arc::clone(&executed);
                        let name = label.clone();
                        pool.enqueue(task::from_fn(label, move || {
                            executed.lock().unwrap().push(name);
                            ok()
                        }))
                        .unwrap();
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let report = pool.wait_all();
        let reported: Vec<String> = report.tasks.iter().map(|t| t.label.clone()).collect();
        // One worker pops in queue order, so execution order is queue order.
        assert_eq!(reported, *executed.lock().unwrap());
        let seqs: Vec<u64> = report.tasks.iter().map(|t| t.seq).collect();
        assert_eq!(seqs, (0..300).collect::<Vec<_>>());
    }

    #[test]
    fn shutdown_is_idempotent_and_rejects_new_tasks() {
        let (mut pool, _) = pool(2);
        pool.enqueue(task::from_fn("t", ok)).unwrap();
        assert_eq!(pool.wait_all().len(), 1);

        pool.shutdown();
        pool.shutdown();
        assert_eq!(pool.worker_count(), 0);

        let err = pool.enqueue(task::from_fn("late", ok)).unwrap_err();
        assert!(matches!(err, Error::PoolShutDown));
        assert!(pool.wait_all().is_empty());
    }

    #[test]
    fn shutdown_drains_queued_tasks_first() {
        let (mut pool, _) = pool(1);
        let ran = Arc::new(AtomicUsize::new(0));
        for i in 0..10 {
            let ran = Arc::clone(&ran);
            pool.enqueue(task::from_fn(format!("t{i}"), move || {
                thread::sleep(Duration::from_millis(2));
                ran.fetch_add(1, Ordering::SeqCst);
                ok()
            }))
            .unwrap();
        }

        pool.shutdown();
        assert_eq!(ran.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn bounded_queue_still_completes_every_task() {
        let (logger, _) = Logger::capture();
        let config = PoolConfig {
            workers: 2,
            queue_capacity: Some(2),
            progress: Some(ProgressBar::hidden()),
        };
        let progress = config.progress.clone().unwrap();
        let pool = WorkerPool::with_config(config, logger.into_shared()).unwrap();

        for i in 0..20 {
            pool.enqueue(task::from_fn(format!("t{i}"), move || {
                thread::sleep(Duration::from_millis(1));
                ok()
            }))
            .unwrap();
        }

        assert_eq!(pool.wait_all().len(), 20);
        assert_eq!(progress.position(), 20);
    }

    #[test]
    fn success_lines_name_the_destination() {
        let (pool, sink) = pool(1);
        pool.enqueue(task::from_fn("http://h/a.bin", || {
            DownloadResult::success(12, "/out/a.bin")
        }))
        .unwrap();
        pool.wait_all();

        assert_eq!(
            sink.lines(),
            vec!["Downloaded: http://h/a.bin -> /out/a.bin (12 bytes)"]
        );
    }
}
