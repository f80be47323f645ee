//! Engine facade.
//!
//! Wires the work store, worker pools, registry, upload manager, and
//! sweeper together behind one handle. When the persistent store cannot
//! be opened the engine falls back to direct execution: jobs run
//! immediately in-process with their status tracked by the in-memory
//! registry. Degraded mode is single-instance only; the store-backed
//! mode is the supported multi-instance deployment.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::db::Database;
use crate::error::{DeckrelayError, QueueError, Result};
use crate::job::progress::{JobProgressBroadcaster, JobProgressEvent};
use crate::job::{JobKind, JobRecord, JobRequest, JobState, JobStatusView};
use crate::registry::{InMemoryRegistry, JobPatch, JobStatusStore};
use crate::store::{TranslationCache, WorkStore};
use crate::sweep::Sweeper;
use crate::transform::worker::TransformExecutor;
use crate::transform::TransformRunner;
use crate::translate::worker::TranslateExecutor;
use crate::translate::Translator;
use crate::upload::UploadManager;
use crate::worker::pool::WorkerPool;
use crate::worker::retry::{retry_with_backoff, RetryPolicy};
use crate::worker::{JobExecutor, ProgressHandle};

/// Job intake and status surface, independent of backing mode.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    async fn submit(&self, request: JobRequest) -> Result<String>;
    async fn status(&self, id: &str) -> Result<Option<JobStatusView>>;
    /// Returns true if the job was cancelled, false if it had already
    /// been picked up.
    async fn cancel(&self, id: &str) -> Result<bool>;
}

/// Store-backed intake: jobs go onto the persistent queue and the
/// worker pools drain them.
struct QueuedBackend {
    store: WorkStore,
}

#[async_trait]
impl QueueBackend for QueuedBackend {
    async fn submit(&self, request: JobRequest) -> Result<String> {
        Ok(self.store.enqueue(&request)?)
    }

    async fn status(&self, id: &str) -> Result<Option<JobStatusView>> {
        Ok(self.store.get_status(id)?)
    }

    async fn cancel(&self, id: &str) -> Result<bool> {
        Ok(self.store.cancel(id)?)
    }
}

/// Degraded intake: jobs execute immediately in-process, with in-memory
/// status tracking and in-process retry.
struct DirectBackend {
    registry: Arc<InMemoryRegistry>,
    translate: Arc<TranslateExecutor>,
    transform: Arc<TransformExecutor>,
    broadcaster: JobProgressBroadcaster,
    retry: RetryPolicy,
    shutdown: Arc<AtomicBool>,
    max_attempts: u32,
}

impl DirectBackend {
    fn executor_for(&self, kind: JobKind) -> Arc<dyn JobExecutor> {
        match kind {
            JobKind::Translate => Arc::clone(&self.translate) as Arc<dyn JobExecutor>,
            JobKind::Transform => Arc::clone(&self.transform) as Arc<dyn JobExecutor>,
        }
    }
}

#[async_trait]
impl QueueBackend for DirectBackend {
    async fn submit(&self, request: JobRequest) -> Result<String> {
        let record = JobRecord::from_request(&request, self.max_attempts);
        let id = record.id.clone();
        let kind = record.kind;
        self.registry.create(record.clone())?;

        let registry = Arc::clone(&self.registry);
        let executor = self.executor_for(kind);
        let broadcaster = self.broadcaster.clone();
        let retry = self.retry.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let job_id = id.clone();

        tokio::spawn(async move {
            // The job may have been cancelled between submit and here.
            match registry.get(&job_id) {
                Some(job) if job.state == JobState::Pending => {}
                _ => return,
            }
            registry.update(
                &job_id,
                JobPatch {
                    state: Some(JobState::Active),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            );

            let progress = ProgressHandle::for_registry(
                job_id.clone(),
                kind,
                Arc::clone(&registry),
                broadcaster.clone(),
            );

            let outcome = retry_with_backoff(&retry, &shutdown, |attempt| {
                registry.update(&job_id, JobPatch {
                    attempts: Some(attempt),
                    ..Default::default()
                });
                let executor = Arc::clone(&executor);
                let record = record.clone();
                let progress = progress.clone();
                async move { executor.execute(&record, &progress).await }
            })
            .await;

            match outcome {
                Ok(result) => {
                    registry.update(
                        &job_id,
                        JobPatch {
                            state: Some(JobState::Completed),
                            progress: Some(100),
                            result: Some(result),
                            completed_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    );
                    broadcaster.send(JobProgressEvent::completed(&job_id, kind));
                }
                Err(e) => {
                    let message = e.to_string();
                    let progress = registry.get(&job_id).map(|j| j.progress).unwrap_or(0);
                    registry.update(
                        &job_id,
                        JobPatch {
                            state: Some(JobState::Failed),
                            error: Some(message.clone()),
                            completed_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    );
                    broadcaster.send(JobProgressEvent::failed(&job_id, kind, progress, &message));
                }
            }
        });

        Ok(id)
    }

    async fn status(&self, id: &str) -> Result<Option<JobStatusView>> {
        Ok(self.registry.get(id).map(|record| JobStatusView::from(&record)))
    }

    async fn cancel(&self, id: &str) -> Result<bool> {
        let record = self
            .registry
            .get(id)
            .ok_or(DeckrelayError::Queue(QueueError::NotFound(id.to_string())))?;
        if record.state != JobState::Pending {
            return Ok(false);
        }
        self.registry.update(
            id,
            JobPatch {
                state: Some(JobState::Cancelled),
                completed_at: Some(Utc::now()),
                ..Default::default()
            },
        );
        Ok(true)
    }
}

/// The assembled engine.
pub struct Engine {
    backend: Arc<dyn QueueBackend>,
    uploads: Arc<UploadManager>,
    broadcaster: JobProgressBroadcaster,
    pools: Vec<WorkerPool>,
    sweeper: Sweeper,
    sweep_handle: JoinHandle<()>,
    sweep_trigger: broadcast::Sender<()>,
    direct_shutdown: Option<Arc<AtomicBool>>,
    degraded: bool,
}

impl Engine {
    /// Builds the engine. Must run inside a tokio runtime; worker pools
    /// and the sweeper spawn onto it.
    pub fn new(
        config: EngineConfig,
        translator: Arc<dyn Translator>,
        runner: Arc<dyn TransformRunner>,
    ) -> Result<Self> {
        let broadcaster = JobProgressBroadcaster::default();
        let registry = Arc::new(InMemoryRegistry::new(
            config.registry.job_expiry(),
            config.registry.max_jobs,
        ));
        let uploads = Arc::new(UploadManager::new(config.upload.clone()));
        let retry_base = Duration::from_secs(config.retry_base_secs);

        let database = match Database::open(&config.database_path()) {
            Ok(db) => Some(db),
            Err(e) => {
                log::error!(
                    "Work store unavailable ({}); running in degraded direct-execution mode",
                    e
                );
                None
            }
        };

        let cache = Arc::new(TranslationCache::new(
            database.clone(),
            config.translation.cache_ttl(),
            config.translation.cache_max_entries,
        ));
        let translate = Arc::new(TranslateExecutor::new(
            translator,
            Arc::clone(&cache),
            config.translation.clone(),
        ));
        let transform = Arc::new(TransformExecutor::new(runner));

        let mut pools = Vec::new();
        let mut direct_shutdown = None;
        let store = database.map(|db| WorkStore::new(db, config.max_attempts, retry_base));

        let backend: Arc<dyn QueueBackend> = match store.clone() {
            Some(store) => {
                pools.push(WorkerPool::start(
                    JobKind::Translate,
                    config.translate_workers,
                    store.clone(),
                    Arc::clone(&translate) as Arc<dyn JobExecutor>,
                    broadcaster.clone(),
                ));
                pools.push(WorkerPool::start(
                    JobKind::Transform,
                    config.transform_workers,
                    store.clone(),
                    Arc::clone(&transform) as Arc<dyn JobExecutor>,
                    broadcaster.clone(),
                ));
                Arc::new(QueuedBackend { store })
            }
            None => {
                let shutdown = Arc::new(AtomicBool::new(false));
                direct_shutdown = Some(Arc::clone(&shutdown));
                Arc::new(DirectBackend {
                    registry: Arc::clone(&registry),
                    translate,
                    transform,
                    broadcaster: broadcaster.clone(),
                    retry: RetryPolicy::new(retry_base, config.max_attempts),
                    shutdown,
                    max_attempts: config.max_attempts,
                })
            }
        };
        let degraded = direct_shutdown.is_some();

        let sweeper = Sweeper::new(
            registry,
            Arc::clone(&uploads),
            cache,
            store,
            config.sweep_interval(),
        );
        let (sweep_trigger, trigger_rx) = broadcast::channel(16);
        let sweep_handle = sweeper.start(trigger_rx);

        Ok(Self {
            backend,
            uploads,
            broadcaster,
            pools,
            sweeper,
            sweep_handle,
            sweep_trigger,
            direct_shutdown,
            degraded,
        })
    }

    /// True when running without the persistent store.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub async fn submit(&self, request: JobRequest) -> Result<String> {
        self.backend.submit(request).await
    }

    pub async fn status(&self, id: &str) -> Result<Option<JobStatusView>> {
        self.backend.status(id).await
    }

    pub async fn cancel(&self, id: &str) -> Result<bool> {
        self.backend.cancel(id).await
    }

    pub fn uploads(&self) -> &Arc<UploadManager> {
        &self.uploads
    }

    pub fn subscribe_progress(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    /// Requests an immediate cleanup pass.
    pub fn trigger_sweep(&self) {
        // Ignore errors - no active receivers is fine
        let _ = self.sweep_trigger.send(());
    }

    /// Stops workers and the sweeper, waiting for in-flight jobs to
    /// settle.
    pub async fn shutdown(self) {
        log::info!("Engine shutting down");
        if let Some(flag) = &self.direct_shutdown {
            flag.store(true, Ordering::Relaxed);
        }
        for pool in &self.pools {
            pool.shutdown();
        }
        for pool in self.pools {
            pool.wait().await;
        }

        self.sweeper.stop();
        let _ = self.sweep_trigger.send(());
        if let Err(e) = self.sweep_handle.await {
            log::error!("Sweeper task panicked: {:?}", e);
        }
        log::info!("Engine stopped");
    }
}
