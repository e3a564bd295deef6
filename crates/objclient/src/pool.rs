//! A bounded worker pool used to parallelize independent batch work.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{Error, Result};

/// A task to be executed by the worker pool; where possible tasks should honor cancellation and
/// return as quickly/cleanly as possible.
pub type Task = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Returns the number of workers to use for the given amount of work; the available CPU
/// parallelism, capped by the amount of work.
pub fn num_workers(limit: usize) -> usize {
    let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

    if cpus > 1 && limit > 0 {
        return cpus.min(limit);
    }

    cpus
}

/// A worker pool which executes the queued tasks concurrently using a fixed number of workers.
///
/// NOTE: Fails fast in the event of an error; subsequent attempts to use the pool return the
/// error which caused it to stop processing tasks.
pub struct Pool {
    tx: mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
    shared: Arc<Shared>,
}

struct Shared {
    first_err: parking_lot::Mutex<Option<Arc<Error>>>,
    cancel: CancellationToken,
}

impl Shared {
    /// Stores the given error and begins teardown, returning whether this was the first error;
    /// secondary errors are logged so they're not missed whilst debugging.
    fn set_err(&self, err: Error) -> bool {
        let mut slot = self.first_err.lock();

        if slot.is_some() {
            warn!(error = %err, "worker pool task failed during teardown");
            return false;
        }

        *slot = Some(Arc::new(err));
        self.cancel.cancel();

        true
    }

    fn get_err(&self) -> Option<Error> {
        self.first_err.lock().as_ref().map(|err| Error::TaskFailed(Arc::clone(err)))
    }
}

impl Pool {
    /// Creates a new worker pool with the given number of workers; the task queue is bounded to
    /// the same size.
    pub fn new(size: usize) -> Self {
        let size = size.max(1);

        let (tx, rx) = mpsc::channel::<Task>(size);

        let shared = Arc::new(Shared {
            first_err: parking_lot::Mutex::new(None),
            cancel: CancellationToken::new(),
        });

        let rx = Arc::new(Mutex::new(rx));

        let workers = (0..size)
            .map(|_| tokio::spawn(Self::work(Arc::clone(&rx), Arc::clone(&shared))))
            .collect();

        Pool { tx, workers, shared }
    }

    /// Processes tasks until the queue is closed, or until the first error at which point the
    /// pool begins teardown.
    async fn work(rx: Arc<Mutex<mpsc::Receiver<Task>>>, shared: Arc<Shared>) {
        loop {
            let task = tokio::select! {
                _ = shared.cancel.cancelled() => return,
                task = async { rx.lock().await.recv().await } => match task {
                    Some(task) => task,
                    None => return,
                },
            };

            let result = tokio::select! {
                _ = shared.cancel.cancelled() => return,
                result = task => result,
            };

            if let Err(err) = result {
                shared.set_err(err);
                return;
            }
        }
    }

    /// Queues a task for execution, returning an error if the pool has already failed and is
    /// tearing down; use the return value to stop queuing work early.
    pub async fn queue<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if let Some(err) = self.shared.get_err() {
            return Err(err);
        }

        // The send only fails once all workers have exited, which given the pool hasn't been
        // stopped, means a task has failed.
        tokio::select! {
            _ = self.shared.cancel.cancelled() => {}
            _ = self.tx.send(Box::pin(task)) => {}
        }

        match self.shared.get_err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stops the pool gracefully, executing any remaining tasks and returning the error which
    /// caused the pool to tear down, if there was one.
    pub async fn stop(self) -> Result<()> {
        let Pool { tx, workers, shared } = self;

        // Closing the queue causes the workers to exit once it's drained
        drop(tx);

        for worker in workers {
            // Workers don't panic, and aborting is only possible via our own token
            let _ = worker.await;
        }

        match shared.get_err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn runs_all_tasks() {
        let pool = Pool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..64 {
            let counter = Arc::clone(&counter);

            let queued = pool
                .queue(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;

            assert!(queued.is_ok());
        }

        pool.stop().await.unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[tokio::test]
    async fn stop_returns_first_error() {
        let pool = Pool::new(1);

        pool.queue(async { Err(Error::Unauthenticated) }).await.unwrap();

        let err = pool.stop().await.unwrap_err();
        assert!(matches!(err, Error::TaskFailed(inner) if matches!(inner.as_ref(), Error::Unauthenticated)));
    }

    #[tokio::test]
    async fn queue_after_failure_returns_stored_error() {
        let pool = Pool::new(1);

        pool.queue(async { Err(Error::Unauthorized) }).await.unwrap();

        // Give the worker a chance to pick the task up and fail
        let mut queued = Ok(());

        for _ in 0..100 {
            queued = pool.queue(async { Ok(()) }).await;
            if queued.is_err() {
                break;
            }

            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }

        assert!(matches!(queued, Err(Error::TaskFailed(_))));

        let err = pool.stop().await.unwrap_err();
        assert!(matches!(err, Error::TaskFailed(inner) if matches!(inner.as_ref(), Error::Unauthorized)));
    }

    #[tokio::test]
    async fn failure_cancels_pending_work() {
        let pool = Pool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));

        pool.queue(async { Err(Error::Unauthenticated) }).await.unwrap();

        for _ in 0..8 {
            let counter = Arc::clone(&counter);

            let queued = pool
                .queue(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;

            if queued.is_err() {
                break;
            }
        }

        assert!(pool.stop().await.is_err());

        // Anything queued after the failure was observed must not have run
        assert!(counter.load(Ordering::SeqCst) <= 8);
    }

    #[test]
    fn num_workers_capped_by_work() {
        assert_eq!(num_workers(1), 1);
        assert!(num_workers(0) >= 1);
        assert!(num_workers(1024) >= 1);
    }
}
