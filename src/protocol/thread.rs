use std::{
    io,
    num::NonZeroUsize,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicIsize, AtomicUsize, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread,
    time::Duration,
};

use log::debug;
use thiserror::Error;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("thread pool is shut down")]
    ShutDown,
    #[error("failed to spawn worker: {0}")]
    Spawn(#[from] io::Error),
}

/// A queued job. `claimed` jobs were sent after reserving a parked worker.
struct Task {
    job: Job,
    claimed: bool,
}

/// Pool bookkeeping shared with the workers.
///
/// `idle` counts parked workers that no submitted job has claimed yet. It can dip
/// below zero for a moment when a worker takes an unclaimed job that was queued while
/// the pool was at its cap.
#[derive(Debug, Default)]
struct Counters {
    idle: AtomicIsize,
    live: AtomicUsize,
    next_id: AtomicUsize,
}

impl Counters {
    fn try_take_idle(&self) -> bool {
        self.idle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |idle| {
                (idle > 0).then(|| idle - 1)
            })
            .is_ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Worker pool that grows to demand and retires workers left idle for too long.
///
/// A submitted job goes to a parked worker when one is free; otherwise a new worker is
/// spawned for it, unless the optional `max_workers` cap is reached, in which case the
/// job waits in the queue for the next worker to free up.
pub struct ThreadPool {
    sender: Mutex<Option<mpsc::Sender<Task>>>,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    counters: Arc<Counters>,
    max_workers: Option<NonZeroUsize>,
    idle_timeout: Duration,
}

impl ThreadPool {
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    pub fn new(max_workers: Option<NonZeroUsize>, idle_timeout: Duration) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(Mutex::new(receiver)),
            counters: Arc::new(Counters::default()),
            max_workers,
            idle_timeout,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None, Self::DEFAULT_IDLE_TIMEOUT)
    }

    pub fn bounded(max_workers: NonZeroUsize) -> Self {
        Self::new(Some(max_workers), Self::DEFAULT_IDLE_TIMEOUT)
    }

    pub fn execute<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let job: Job = Box::new(f);
        let sender = lock(&self.sender);
        let sender = sender.as_ref().ok_or(PoolError::ShutDown)?;

        if self.counters.try_take_idle() {
            return sender
                .send(Task { job, claimed: true })
                .map_err(|_| PoolError::ShutDown);
        }

        if self.reserve_worker() {
            return self.spawn_worker(job);
        }

        sender
            .send(Task {
                job,
                claimed: false,
            })
            .map_err(|_| PoolError::ShutDown)
    }

    /// Stop accepting jobs. Queued jobs still run; running jobs are not interrupted and
    /// nothing waits for them.
    pub fn shutdown(&self) {
        if lock(&self.sender).take().is_some() {
            debug!("thread pool shutting down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        lock(&self.sender).is_none()
    }

    pub fn live_workers(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    pub fn idle_workers(&self) -> usize {
        self.counters.idle.load(Ordering::SeqCst).max(0) as usize
    }

    fn reserve_worker(&self) -> bool {
        self.counters
            .live
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| {
                match self.max_workers {
                    Some(max) if live >= max.get() => None,
                    _ => Some(live + 1),
                }
            })
            .is_ok()
    }

    fn spawn_worker(&self, first: Job) -> Result<(), PoolError> {
        let id = self.counters.next_id.fetch_add(1, Ordering::SeqCst);
        let worker = Worker {
            id,
            receiver: Arc::clone(&self.receiver),
            counters: Arc::clone(&self.counters),
            idle_timeout: self.idle_timeout,
        };

        thread::Builder::new()
            .name(format!("courier-worker-{id}"))
            .spawn(move || worker.run(first))
            .map(|_| ())
            .map_err(|e| {
                self.counters.live.fetch_sub(1, Ordering::SeqCst);
                PoolError::Spawn(e)
            })
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker {
    id: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    counters: Arc<Counters>,
    idle_timeout: Duration,
}

/// Releases the worker's slot even if a job panics.
struct Retire<'a> {
    id: usize,
    counters: &'a Counters,
}

impl Drop for Retire<'_> {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        debug!("worker {} retired", self.id);
    }
}

impl Worker {
    fn run(self, first: Job) {
        let _retire = Retire {
            id: self.id,
            counters: &self.counters,
        };
        debug!("worker {} started", self.id);
        first();

        while let Some(task) = self.park() {
            if !task.claimed {
                self.counters.idle.fetch_sub(1, Ordering::SeqCst);
            }
            debug!("worker {} handling a connection", self.id);
            (task.job)();
        }
    }

    /// Wait for the next task. `None` once the pool is shut down and drained, or after
    /// sitting idle for the timeout without anyone counting on this worker.
    fn park(&self) -> Option<Task> {
        self.counters.idle.fetch_add(1, Ordering::SeqCst);
        loop {
            let msg = lock(&self.receiver).recv_timeout(self.idle_timeout);
            match msg {
                Ok(task) => return Some(task),
                Err(RecvTimeoutError::Timeout) => {
                    if self.counters.try_take_idle() {
                        return None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.counters.idle.fetch_sub(1, Ordering::SeqCst);
                    return None;
                }
            }
        }
    }
}
