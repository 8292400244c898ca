// pool.rs - Persistent worker pool over per-thread lanes
//
// Each worker thread owns one lane value (usually a `Procedure` duplicate)
// for its whole life. A run hands every worker the same task closure; the
// workers then pull indices from a shared atomic counter until it passes
// `count` or the run is cancelled. The coordinating thread blocks in `run`
// until every worker has checked back in.
//
// Coordination: one mutex-protected `PoolState` with two condvars,
// `work_ready` (coordinator -> workers) and `run_done` (workers ->
// coordinator). The index counter and the cancel flag are atomics so the
// hot loop never takes the lock.

use crate::error::{PoolError, TaskError};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cmp;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

type Task<L> = Arc<dyn Fn(&mut L, usize) -> Result<(), TaskError> + Send + Sync>;

// ── Configuration ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Worker count. Defaults to the available parallelism.
    pub threads: Option<usize>,
    /// Upper bound applied after `threads` is resolved.
    pub max_threads: Option<usize>,
}

impl PoolConfig {
    pub fn thread_count(&self) -> usize {
        let wanted = self.threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let capped = match self.max_threads {
            Some(max) => cmp::min(wanted, max),
            None => wanted,
        };
        cmp::max(1, capped)
    }
}

// ── Cancellation ───────────────────────────────────────────────────

/// Cancels the pool's current run. Cheap to clone; usable from inside a
/// task or from any other thread.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Indices not yet started will not start. In-flight ones complete.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Outcome of a run that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunReport {
    /// Indices whose task was entered.
    pub started: usize,
    /// Indices whose task returned `Ok`.
    pub completed: usize,
    pub cancelled: bool,
}

// ── Shared state ───────────────────────────────────────────────────

struct PoolState<L> {
    /// Bumped once per run; workers wake when it differs from the last
    /// generation they served.
    generation: u64,
    task: Option<Task<L>>,
    count: usize,
    /// Workers that have not yet finished the current generation.
    active: usize,
    started: usize,
    completed: usize,
    failure: Option<(usize, String)>,
    /// Replacement lanes, one slot per worker, taken at the next run.
    pending_lanes: Vec<Option<L>>,
    shutdown: bool,
}

struct Shared<L> {
    state: Mutex<PoolState<L>>,
    work_ready: Condvar,
    run_done: Condvar,
    next_index: AtomicUsize,
    cancelled: Arc<AtomicBool>,
}

impl<L> Shared<L> {
    fn lock(&self) -> MutexGuard<'_, PoolState<L>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "task panicked".to_string()
    }
}

fn worker_loop<L: Send + 'static>(shared: Arc<Shared<L>>, worker: usize, mut lane: L) {
    let mut served = 0u64;
    loop {
        let (task, count) = {
            let mut state = shared.lock();
            while !state.shutdown && state.generation == served {
                state = shared
                    .work_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if state.shutdown {
                debug!("worker {worker} exiting");
                return;
            }
            served = state.generation;
            if let Some(replacement) = state.pending_lanes.get_mut(worker).and_then(Option::take) {
                lane = replacement;
            }
            (state.task.clone(), state.count)
        };

        let mut started = 0;
        let mut completed = 0;
        let mut failure = None;
        if let Some(task) = task {
            loop {
                if shared.cancelled.load(Ordering::Acquire) {
                    break;
                }
                let index = shared.next_index.fetch_add(1, Ordering::AcqRel);
                if index >= count || shared.cancelled.load(Ordering::Acquire) {
                    break;
                }
                started += 1;
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| task(&mut lane, index)));
                let message = match outcome {
                    Ok(Ok(())) => {
                        completed += 1;
                        continue;
                    }
                    Ok(Err(e)) => e.to_string(),
                    Err(payload) => format!("panic: {}", panic_message(payload.as_ref())),
                };
                error!("worker {worker}: task {index} failed: {message}");
                shared.cancelled.store(true, Ordering::Release);
                failure = Some((index, message));
                break;
            }
        }

        let mut state = shared.lock();
        state.started += started;
        state.completed += completed;
        if state.failure.is_none() {
            state.failure = failure;
        }
        state.active -= 1;
        if state.active == 0 {
            shared.run_done.notify_all();
        }
    }
}

// ── WorkerPool ─────────────────────────────────────────────────────

/// Fixed set of persistent threads, each owning one lane `L`.
pub struct WorkerPool<L: Send + 'static> {
    shared: Arc<Shared<L>>,
    workers: Vec<JoinHandle<()>>,
    threads: usize,
    finished: bool,
}

impl<L: Send + 'static> WorkerPool<L> {
    /// One worker per lane.
    pub fn new(lanes: Vec<L>) -> Result<Self, PoolError> {
        if lanes.is_empty() {
            return Err(PoolError::NoLanes);
        }
        let threads = lanes.len();
        let shared = Arc::new(Shared {
            state: Mutex::new(PoolState {
                generation: 0,
                task: None,
                count: 0,
                active: 0,
                started: 0,
                completed: 0,
                failure: None,
                pending_lanes: (0..threads).map(|_| None).collect(),
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            run_done: Condvar::new(),
            next_index: AtomicUsize::new(0),
            cancelled: Arc::new(AtomicBool::new(false)),
        });

        let mut pool = WorkerPool {
            shared,
            workers: Vec::with_capacity(threads),
            threads,
            finished: false,
        };
        for (worker, lane) in lanes.into_iter().enumerate() {
            let shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("texgraph-worker-{worker}"))
                .spawn(move || worker_loop(shared, worker, lane));
            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    error!("failed to spawn worker {worker}: {e}");
                    // Dropping the pool joins whatever did start.
                    return Err(PoolError::Spawn(e));
                }
            }
        }
        info!("worker pool started with {threads} threads");
        Ok(pool)
    }

    /// Size the pool from `config`, building one lane per worker.
    pub fn with_config(config: &PoolConfig, make_lane: impl FnMut(usize) -> L) -> Result<Self, PoolError> {
        let lanes = (0..config.thread_count()).map(make_lane).collect();
        WorkerPool::new(lanes)
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.shared.cancelled),
        }
    }

    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
    }

    /// Replace worker lanes, in worker order. Takes effect at the start of
    /// the next run; workers beyond `lanes.len()` keep their current lane.
    pub fn replace_lanes(&mut self, lanes: Vec<L>) -> Result<(), PoolError> {
        if self.finished {
            return Err(PoolError::Finished);
        }
        let mut state = self.shared.lock();
        for (slot, lane) in state.pending_lanes.iter_mut().zip(lanes) {
            *slot = Some(lane);
        }
        Ok(())
    }

    /// Process every index in `[0, count)` exactly once across the workers,
    /// blocking until done or cancelled.
    pub fn run<F>(&mut self, count: usize, task: F) -> Result<RunReport, PoolError>
    where
        F: Fn(&mut L, usize) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        if self.finished {
            return Err(PoolError::Finished);
        }
        self.shared.cancelled.store(false, Ordering::Release);
        self.shared.next_index.store(0, Ordering::Release);

        let mut state = self.shared.lock();
        state.task = Some(Arc::new(task));
        state.count = count;
        state.active = self.threads;
        state.started = 0;
        state.completed = 0;
        state.failure = None;
        state.generation += 1;
        self.shared.work_ready.notify_all();

        while state.active > 0 {
            state = self
                .shared
                .run_done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
        state.task = None;
        let report = RunReport {
            started: state.started,
            completed: state.completed,
            cancelled: self.shared.cancelled.load(Ordering::Acquire),
        };
        let failure = state.failure.take();
        drop(state);

        debug!(
            "run of {count}: {} started, {} completed",
            report.started, report.completed
        );
        match failure {
            Some((index, message)) => Err(PoolError::TaskFailed { index, message }),
            None => Ok(report),
        }
    }

    /// Stop and join every worker. Later runs return `PoolError::Finished`.
    pub fn finish(&mut self) -> Result<(), PoolError> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        self.shared.lock().shutdown = true;
        self.shared.work_ready.notify_all();

        let mut panicked = false;
        for handle in self.workers.drain(..) {
            panicked |= handle.join().is_err();
        }
        info!("worker pool finished");
        if panicked {
            return Err(PoolError::WorkerPanicked);
        }
        Ok(())
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl<L: Send + 'static> Drop for WorkerPool<L> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            error!("worker pool teardown: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn counters(n: usize) -> Arc<Vec<AtomicUsize>> {
        Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect())
    }

    #[test]
    fn every_index_runs_exactly_once() {
        for threads in [1, 2, 5] {
            let mut pool = WorkerPool::new(vec![(); threads]).unwrap();
            for n in [0, 1, 7, 100, 1000] {
                for _ in 0..3 {
                    let hits = counters(n);
                    let seen = Arc::clone(&hits);
                    let report = pool
                        .run(n, move |_, i| {
                            seen[i].fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        })
                        .unwrap();
                    assert_eq!(report.started, n);
                    assert_eq!(report.completed, n);
                    assert!(!report.cancelled);
                    assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
                }
            }
        }
    }

    #[test]
    fn cancel_bounds_started_indices() {
        let threads = 4;
        let k = 10;
        let mut pool = WorkerPool::new(vec![(); threads]).unwrap();
        let handle = pool.cancel_handle();
        let report = pool
            .run(1000, move |_, i| {
                if i == k {
                    handle.cancel();
                } else {
                    thread::sleep(Duration::from_millis(2));
                }
                Ok(())
            })
            .unwrap();
        assert!(report.cancelled);
        assert!(report.started <= k + threads, "{report:?}");
        assert_eq!(report.started, report.completed);

        // The next run starts uncancelled.
        let report = pool.run(50, |_, _| Ok(())).unwrap();
        assert_eq!(report.completed, 50);
    }

    #[test]
    fn task_error_is_surfaced_and_pool_recovers() {
        let mut pool = WorkerPool::new(vec![(); 3]).unwrap();
        let err = pool
            .run(100, |_, i| {
                if i == 42 {
                    Err(TaskError::from("bad row"))
                } else {
                    Ok(())
                }
            })
            .unwrap_err();
        assert!(matches!(err, PoolError::TaskFailed { index: 42, ref message } if message == "bad row"));

        let hits = counters(64);
        let seen = Arc::clone(&hits);
        pool.run(64, move |_, i| {
            seen[i].fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
        assert!(hits.iter().all(|h| h.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn panicking_task_is_caught() {
        let mut pool = WorkerPool::new(vec![(); 2]).unwrap();
        let err = pool
            .run(10, |_, i| {
                if i == 3 {
                    panic!("row 3 exploded");
                }
                Ok(())
            })
            .unwrap_err();
        match err {
            PoolError::TaskFailed { index, message } => {
                assert_eq!(index, 3);
                assert!(message.contains("row 3 exploded"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(pool.run(5, |_, _| Ok(())).unwrap().completed, 5);
    }

    #[test]
    fn lanes_belong_to_their_worker() {
        let mut pool = WorkerPool::new(vec![0u32, 1, 2]).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        pool.run(30, move |lane, _| {
            *lane += 10;
            sink.lock().unwrap().push(*lane % 10);
            Ok(())
        })
        .unwrap();
        // Each worker only ever saw its own lane.
        assert!(seen.lock().unwrap().iter().all(|&tag| tag < 3));

        pool.replace_lanes(vec![7, 8, 9]).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        pool.run(30, move |lane, _| {
            sink.lock().unwrap().push(*lane);
            Ok(())
        })
        .unwrap();
        assert!(seen.lock().unwrap().iter().all(|&tag| (7..=9).contains(&tag)));
    }

    #[test]
    fn finished_pool_refuses_work() {
        let mut pool = WorkerPool::new(vec![(); 2]).unwrap();
        pool.finish().unwrap();
        pool.finish().unwrap();
        assert!(pool.is_finished());
        assert!(matches!(pool.run(1, |_, _| Ok(())), Err(PoolError::Finished)));
        assert!(matches!(pool.replace_lanes(vec![]), Err(PoolError::Finished)));
    }

    #[test]
    fn empty_lane_list_is_rejected() {
        assert!(matches!(
            WorkerPool::<()>::new(Vec::new()),
            Err(PoolError::NoLanes)
        ));
    }

    #[test]
    fn config_resolves_thread_count() {
        let cfg: PoolConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.thread_count() >= 1);
        let cfg = PoolConfig {
            threads: Some(8),
            max_threads: Some(3),
        };
        assert_eq!(cfg.thread_count(), 3);
        let cfg = PoolConfig {
            threads: Some(0),
            max_threads: None,
        };
        assert_eq!(cfg.thread_count(), 1);

        let pool = WorkerPool::with_config(&cfg, |lane| lane).unwrap();
        assert_eq!(pool.threads(), 1);
    }
}
