//! Job execution: the executor trait, progress reporting, retry
//! helpers, and the worker pools that drain the queue.

pub mod pool;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;

use crate::job::progress::{JobProgressBroadcaster, JobProgressEvent};
use crate::job::{JobKind, JobRecord};
use crate::registry::{InMemoryRegistry, JobPatch, JobStatusStore};
use crate::store::WorkStore;

/// Failure of a single execution attempt.
#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// The attempt can be retried (network, process, I/O trouble).
    #[error("{0}")]
    Transient(String),
    /// The job itself is bad; retrying cannot help.
    #[error("{0}")]
    Validation(String),
}

impl ExecuteError {
    pub fn retryable(&self) -> bool {
        matches!(self, ExecuteError::Transient(_))
    }
}

/// Executes jobs of one kind.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    fn kind(&self) -> JobKind;

    async fn execute(
        &self,
        job: &JobRecord,
        progress: &ProgressHandle,
    ) -> Result<serde_json::Value, ExecuteError>;
}

/// Reports a running job's progress to whichever status store backs it
/// and broadcasts the update to subscribers.
#[derive(Clone)]
pub struct ProgressHandle {
    job_id: String,
    kind: JobKind,
    store: Option<WorkStore>,
    registry: Option<Arc<InMemoryRegistry>>,
    broadcaster: JobProgressBroadcaster,
}

impl ProgressHandle {
    pub fn for_store(
        job_id: impl Into<String>,
        kind: JobKind,
        store: WorkStore,
        broadcaster: JobProgressBroadcaster,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            store: Some(store),
            registry: None,
            broadcaster,
        }
    }

    pub fn for_registry(
        job_id: impl Into<String>,
        kind: JobKind,
        registry: Arc<InMemoryRegistry>,
        broadcaster: JobProgressBroadcaster,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            store: None,
            registry: Some(registry),
            broadcaster,
        }
    }

    /// Detached handle for tests and callers that only want broadcasts.
    pub fn detached(job_id: impl Into<String>, kind: JobKind) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            store: None,
            registry: None,
            broadcaster: JobProgressBroadcaster::default(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Records a progress milestone. Progress only ever moves forward;
    /// stale reports are absorbed by the stores.
    pub fn report(&self, progress: u8, message: impl Into<String>) {
        let progress = progress.min(100);

        if let Some(store) = &self.store {
            if let Err(e) = store.update_progress(&self.job_id, progress) {
                log::warn!("Progress update for job {} failed: {}", self.job_id, e);
            }
        }
        if let Some(registry) = &self.registry {
            if registry
                .update(&self.job_id, JobPatch::progress(progress))
                .is_none()
            {
                log::warn!(
                    "Progress update for job {} dropped: not in registry",
                    self.job_id
                );
            }
        }

        self.broadcaster
            .send(JobProgressEvent::new(&self.job_id, self.kind, progress, &message.into()));
    }
}
