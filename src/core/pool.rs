//! Bounded pool of reusable worker threads
//!
//! Pipelines borrow one worker each for their whole lifetime, so the pool
//! refuses work instead of queueing it once every worker is taken: a queued
//! pipeline worker would never start while its owner waits on it.

use crate::config::PoolConfig;
use crate::error::{EngineError, Result};
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Pool of worker threads with a hard limit on concurrent tasks.
///
/// Cloning yields another handle to the same threads. They exit once every
/// handle is gone, including the ones held by live pipelines, so a pipeline
/// may outlive the handle it was created from.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    busy: Arc<AtomicUsize>,
    limit: usize,
}

impl WorkerPool {
    /// Start the pool's threads
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let limit = config.effective_threads().max(1);
        let (sender, receiver) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(limit);
        for worker_id in 0..limit {
            let jobs = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("pool-worker-{}", worker_id))
                .spawn(move || worker_loop(worker_id, jobs))?;
            workers.push(handle);
        }

        tracing::debug!("Worker pool started with {} threads", limit);
        Ok(Self {
            inner: Arc::new(PoolInner {
                sender: Some(sender),
                workers,
                busy: Arc::new(AtomicUsize::new(0)),
                limit,
            }),
        })
    }

    /// Maximum number of concurrently running tasks
    pub fn limit(&self) -> usize {
        self.inner.limit
    }

    /// Tasks currently running or about to start
    pub fn busy(&self) -> usize {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// Run `task` on a free worker.
    ///
    /// Fails with [`EngineError::PoolExhausted`] when every worker is taken.
    pub fn spawn<F, T>(&self, task: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let inner = &self.inner;
        let sender = inner.sender.as_ref().ok_or(EngineError::Cancelled)?;

        inner
            .busy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |busy| {
                (busy < inner.limit).then_some(busy + 1)
            })
            .map_err(|_| EngineError::PoolExhausted { limit: inner.limit })?;

        let (result_tx, result_rx) = bounded(1);
        // Jobs only hold the counter: the last pool handle must never be
        // dropped on one of the pool's own threads
        let busy = Arc::clone(&inner.busy);
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(task));
            // Free the slot before the joiner can observe the result
            busy.fetch_sub(1, Ordering::AcqRel);
            let _ = result_tx.send(result);
        });

        if sender.send(job).is_err() {
            inner.busy.fetch_sub(1, Ordering::AcqRel);
            return Err(EngineError::Cancelled);
        }

        Ok(TaskHandle { result: result_rx })
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        // Closing the channel lets idle workers exit; running tasks finish first
        self.sender.take();
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::error!("Pool worker thread panicked");
            }
        }
    }
}

fn worker_loop(worker_id: usize, jobs: Receiver<Job>) {
    while let Ok(job) = jobs.recv() {
        job();
    }
    tracing::debug!("Pool worker {} shutting down", worker_id);
}

/// Joinable result of a pooled task
pub struct TaskHandle<T> {
    result: Receiver<thread::Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task and return its value
    pub fn join(self) -> Result<T> {
        match self.result.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => {
                let message = panic_message(payload.as_ref());
                tracing::error!("Pooled task panicked: {}", message);
                Err(EngineError::TaskPanicked(message))
            }
            Err(_) => Err(EngineError::Cancelled),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::unbounded;
    use std::time::Duration;

    fn pool(threads: usize) -> WorkerPool {
        WorkerPool::new(&PoolConfig {
            max_threads: threads,
        })
        .unwrap()
    }

    #[test]
    fn test_spawn_and_join() {
        let pool = pool(2);
        let handle = pool.spawn(|| 6 * 7).unwrap();
        assert_eq!(handle.join().unwrap(), 42);
        assert_eq!(pool.busy(), 0);
    }

    #[test]
    fn test_exhausted_when_all_workers_busy() {
        let pool = pool(2);
        let (release_tx, release_rx) = unbounded::<()>();

        let first = {
            let release = release_rx.clone();
            pool.spawn(move || release.recv_timeout(Duration::from_secs(5)).is_ok())
                .unwrap()
        };
        let second = pool
            .spawn(move || release_rx.recv_timeout(Duration::from_secs(5)).is_ok())
            .unwrap();

        match pool.spawn(|| ()) {
            Err(EngineError::PoolExhausted { limit }) => assert_eq!(limit, 2),
            other => panic!("expected exhaustion, got {:?}", other.map(|_| ())),
        }

        release_tx.send(()).unwrap();
        release_tx.send(()).unwrap();
        assert!(first.join().unwrap());
        assert!(second.join().unwrap());

        // Workers are reused once free
        assert_eq!(pool.spawn(|| "again").unwrap().join().unwrap(), "again");
    }

    #[test]
    fn test_panic_becomes_error() {
        let pool = pool(1);
        let handle = pool.spawn(|| -> u32 { panic!("worker bug") }).unwrap();

        match handle.join() {
            Err(EngineError::TaskPanicked(message)) => assert!(message.contains("worker bug")),
            other => panic!("expected panic error, got {:?}", other),
        }

        // The worker thread survives the panic
        assert_eq!(pool.spawn(|| 1).unwrap().join().unwrap(), 1);
    }

    #[test]
    fn test_clone_keeps_threads_alive() {
        let pool = pool(1);
        let handle = pool.clone();
        drop(pool);

        assert_eq!(handle.limit(), 1);
        assert_eq!(handle.spawn(|| "still here").unwrap().join().unwrap(), "still here");
    }

    #[test]
    fn test_auto_thread_count() {
        let pool = WorkerPool::new(&PoolConfig::default()).unwrap();
        assert!(pool.limit() >= 1);
    }
}
