use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A unit of work; its result travels over the channel `submit` returned
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

type Inbox = mpsc::Sender<Job>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,
}

/// WorkerPool runs submitted futures on a fixed set of workers
///
/// Architecture:
/// 1. `submit` pushes a job onto the work channel (capacity `2 * workers`)
/// 2. Each idle worker announces its inbox on the idle channel
/// 3. The dispatcher pairs the next job with the next idle inbox (FIFO)
/// 4. The worker runs the job in its own task, so a panic only loses that job
///
/// Backpressure: `submit` waits while the work channel is full.
pub struct WorkerPool {
    work_tx: mpsc::Sender<Job>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    workers: usize,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Self {
        let workers = workers.max(1);
        info!(workers, queue = 2 * workers, "Starting worker pool");

        let (work_tx, work_rx) = mpsc::channel::<Job>(2 * workers);
        let (idle_tx, idle_rx) = mpsc::channel::<Inbox>(workers);
        let shutdown = CancellationToken::new();

        let mut handles = Vec::with_capacity(workers + 1);
        for worker_id in 0..workers {
            handles.push(tokio::spawn(run_worker(
                worker_id,
                idle_tx.clone(),
                shutdown.clone(),
            )));
        }
        handles.push(tokio::spawn(dispatch(work_rx, idle_rx, shutdown.clone())));

        Self {
            work_tx,
            shutdown,
            handles: Mutex::new(handles),
            workers,
        }
    }

    /// Queue a future; the receiver yields its output exactly once.
    ///
    /// If the job is lost (panic, shutdown) the sender is dropped and the
    /// receiver reports `RecvError`.
    pub async fn submit<F, T>(&self, task: F) -> Result<oneshot::Receiver<T>, PoolError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::Closed);
        }

        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            // The receiver may already have given up on this result
            let _ = tx.send(task.await);
        });

        self.work_tx.send(job).await.map_err(|_| PoolError::Closed)?;
        Ok(rx)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Ask the dispatcher and every worker to stop
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Block until the dispatcher and all workers have exited
    pub async fn wait(&self) {
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker pool task ended abnormally");
            }
        }
        info!("Worker pool stopped");
    }
}

async fn dispatch(
    mut work: mpsc::Receiver<Job>,
    mut idle: mpsc::Receiver<Inbox>,
    shutdown: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = work.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let inbox = tokio::select! {
            _ = shutdown.cancelled() => break,
            inbox = idle.recv() => match inbox {
                Some(inbox) => inbox,
                None => break,
            },
        };

        if inbox.send(job).await.is_err() {
            warn!("Worker inbox closed, job dropped");
        }
    }
    debug!("Dispatcher stopped");
}

async fn run_worker(worker_id: usize, idle: mpsc::Sender<Inbox>, shutdown: CancellationToken) {
    let (inbox_tx, mut inbox) = mpsc::channel::<Job>(1);

    loop {
        if idle.send(inbox_tx.clone()).await.is_err() {
            break;
        }

        let job = tokio::select! {
            _ = shutdown.cancelled() => break,
            job = inbox.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        if let Err(e) = tokio::spawn(job).await {
            warn!(worker_id, error = %e, "Job failed");
        }
    }
    debug!(worker_id, "Worker stopped");
}
