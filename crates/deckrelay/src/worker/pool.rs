use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::job::progress::{JobProgressBroadcaster, JobProgressEvent};
use crate::job::JobKind;
use crate::store::WorkStore;
use crate::worker::{JobExecutor, ProgressHandle};

const IDLE_POLL: Duration = Duration::from_millis(100);
const ERROR_POLL: Duration = Duration::from_secs(1);

/// A pool of workers draining one job kind from the work store.
///
/// Each worker leases a job, executes it, then acks or nacks the lease.
/// The store's lease claim is atomic, so pool size is the hard ceiling
/// on concurrent jobs of that kind.
pub struct WorkerPool {
    kind: JobKind,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `worker_count` workers for `kind`.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn start(
        kind: JobKind,
        worker_count: usize,
        store: WorkStore,
        executor: Arc<dyn JobExecutor>,
        broadcaster: JobProgressBroadcaster,
    ) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let store = store.clone();
            let executor = Arc::clone(&executor);
            let broadcaster = broadcaster.clone();
            let shutdown_flag = Arc::clone(&shutdown);

            workers.push(tokio::spawn(async move {
                run_worker(worker_id, kind, store, executor, broadcaster, shutdown_flag).await;
            }));
        }

        info!("Started {} {} workers", worker_count, kind);

        Self {
            kind,
            workers,
            shutdown,
        }
    }

    pub fn shutdown(&self) {
        info!("Shutting down {} worker pool...", self.kind);
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub async fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("{} worker {} panicked: {:?}", self.kind, i, e);
            } else {
                debug!("{} worker {} finished", self.kind, i);
            }
        }
        info!("All {} workers have stopped", self.kind);
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

async fn run_worker(
    worker_id: usize,
    kind: JobKind,
    store: WorkStore,
    executor: Arc<dyn JobExecutor>,
    broadcaster: JobProgressBroadcaster,
    shutdown: Arc<AtomicBool>,
) {
    debug!("{} worker {} started", kind, worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("{} worker {} received shutdown signal", kind, worker_id);
            break;
        }

        match store.lease(kind) {
            Ok(Some(job)) => {
                debug!(
                    "{} worker {} processing job {} (attempt {}/{})",
                    kind, worker_id, job.id, job.attempts, job.max_attempts
                );

                let progress = ProgressHandle::for_store(
                    job.id.clone(),
                    kind,
                    store.clone(),
                    broadcaster.clone(),
                );

                let span = tracing::info_span!(
                    "job",
                    id = %job.id,
                    kind = %kind,
                    attempt = job.attempts,
                );
                match executor.execute(&job, &progress).instrument(span).await {
                    Ok(result) => {
                        if let Err(e) = store.ack(&job.id, &result) {
                            error!("Failed to ack job {}: {}", job.id, e);
                        }
                        broadcaster.send(JobProgressEvent::completed(&job.id, kind));
                    }
                    Err(exec_err) => {
                        let message = exec_err.to_string();
                        match store.nack(&job.id, &message, exec_err.retryable()) {
                            Ok(crate::store::NackOutcome::Requeued) => {}
                            Ok(crate::store::NackOutcome::Failed) => {
                                broadcaster.send(JobProgressEvent::failed(
                                    &job.id,
                                    kind,
                                    job.progress,
                                    &message,
                                ));
                            }
                            Err(e) => error!("Failed to nack job {}: {}", job.id, e),
                        }
                    }
                }
            }
            Ok(None) => {
                tokio::time::sleep(IDLE_POLL).await;
            }
            Err(e) => {
                error!("{} worker {} lease failed: {}", kind, worker_id, e);
                tokio::time::sleep(ERROR_POLL).await;
            }
        }
    }

    debug!("{} worker {} stopped", kind, worker_id);
}
