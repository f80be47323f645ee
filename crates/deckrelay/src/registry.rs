//! In-memory fallback job status registry.
//!
//! Used when the persistent work store is unavailable. Process-local by
//! design: with multiple service instances each has its own view, so the
//! fallback path is documented single-instance-only and the store-backed
//! path is the supported multi-instance mode.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

use crate::error::RegistryError;
use crate::job::{JobRecord, JobState};

/// A partial update applied to a tracked job.
#[derive(Debug, Default, Clone)]
pub struct JobPatch {
    pub state: Option<JobState>,
    pub progress: Option<u8>,
    pub attempts: Option<u32>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn state(state: JobState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }
}

/// Injectable job-status storage seam.
///
/// The in-memory registry below is the fallback implementation; the
/// persistent work store covers the same queries in queued mode.
pub trait JobStatusStore: Send + Sync {
    fn create(&self, record: JobRecord) -> Result<(), RegistryError>;
    fn update(&self, id: &str, patch: JobPatch) -> Option<JobRecord>;
    fn get(&self, id: &str) -> Option<JobRecord>;
    fn delete(&self, id: &str) -> bool;
    /// Removes every tracked job. For deterministic tests.
    fn clear(&self);
}

/// Process-local registry of job records.
pub struct InMemoryRegistry {
    jobs: RwLock<HashMap<String, JobRecord>>,
    /// Jobs older than this are swept regardless of state.
    expiry: Duration,
    max_jobs: usize,
}

impl InMemoryRegistry {
    pub fn new(expiry: Duration, max_jobs: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            expiry,
            max_jobs,
        }
    }

    fn read_jobs(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, JobRecord>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_jobs(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, JobRecord>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Registry lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Removes jobs older than the configured expiry. Returns the number
    /// evicted.
    pub fn sweep(&self) -> usize {
        let cutoff = Utc::now() - self.expiry;
        let mut jobs = self.write_jobs();
        let before = jobs.len();
        jobs.retain(|_, job| job.created_at >= cutoff);
        let removed = before - jobs.len();
        if removed > 0 {
            log::info!("Registry sweep evicted {} expired jobs", removed);
        }
        removed
    }

    /// Returns counts of (pending, active, terminal) jobs.
    pub fn counts(&self) -> (usize, usize, usize) {
        let jobs = self.read_jobs();
        let mut pending = 0;
        let mut active = 0;
        let mut terminal = 0;
        for job in jobs.values() {
            match job.state {
                JobState::Pending => pending += 1,
                JobState::Active => active += 1,
                _ => terminal += 1,
            }
        }
        (pending, active, terminal)
    }

    pub fn len(&self) -> usize {
        self.read_jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_jobs().is_empty()
    }
}

impl JobStatusStore for InMemoryRegistry {
    fn create(&self, record: JobRecord) -> Result<(), RegistryError> {
        // Capacity pressure forces a sweep first, never a hard failure
        // unless the registry is still full of fresh jobs afterwards.
        if self.len() >= self.max_jobs {
            self.sweep();
        }

        let mut jobs = self.write_jobs();
        if jobs.len() >= self.max_jobs {
            return Err(RegistryError::Full {
                capacity: self.max_jobs,
            });
        }
        if jobs.contains_key(&record.id) {
            return Err(RegistryError::DuplicateId(record.id));
        }
        jobs.insert(record.id.clone(), record);
        Ok(())
    }

    fn update(&self, id: &str, patch: JobPatch) -> Option<JobRecord> {
        let mut jobs = self.write_jobs();
        let job = jobs.get_mut(id)?;

        if let Some(state) = patch.state {
            job.state = state;
        }
        if let Some(progress) = patch.progress {
            // Progress never moves backwards.
            job.progress = job.progress.max(progress);
        }
        if let Some(attempts) = patch.attempts {
            job.attempts = attempts;
        }
        if patch.result.is_some() {
            job.result = patch.result;
        }
        if patch.error.is_some() {
            job.error = patch.error;
        }
        if patch.started_at.is_some() {
            job.started_at = patch.started_at;
        }
        if patch.completed_at.is_some() {
            job.completed_at = patch.completed_at;
        }

        Some(job.clone())
    }

    fn get(&self, id: &str) -> Option<JobRecord> {
        self.read_jobs().get(id).cloned()
    }

    fn delete(&self, id: &str) -> bool {
        self.write_jobs().remove(id).is_some()
    }

    fn clear(&self) {
        self.write_jobs().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobKind, JobRequest};

    fn registry() -> InMemoryRegistry {
        InMemoryRegistry::new(Duration::hours(24), 100)
    }

    fn sample_record() -> JobRecord {
        let request = JobRequest::new(JobKind::Translate, serde_json::json!({}));
        JobRecord::from_request(&request, 3)
    }

    #[test]
    fn test_create_and_get() {
        let registry = registry();
        let record = sample_record();
        let id = record.id.clone();

        registry.create(record).unwrap();

        let found = registry.get(&id).unwrap();
        assert_eq!(found.state, JobState::Pending);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let registry = registry();
        let record = sample_record();
        let dup = record.clone();

        registry.create(record).unwrap();
        assert!(matches!(
            registry.create(dup),
            Err(RegistryError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_update_patch() {
        let registry = registry();
        let record = sample_record();
        let id = record.id.clone();
        registry.create(record).unwrap();

        let updated = registry
            .update(&id, JobPatch::state(JobState::Active))
            .unwrap();
        assert_eq!(updated.state, JobState::Active);

        registry.update(&id, JobPatch::progress(50)).unwrap();
        // A lower progress value is ignored.
        let after = registry.update(&id, JobPatch::progress(30)).unwrap();
        assert_eq!(after.progress, 50);
    }

    #[test]
    fn test_update_missing_returns_none() {
        let registry = registry();
        assert!(registry.update("nope", JobPatch::default()).is_none());
    }

    #[test]
    fn test_delete() {
        let registry = registry();
        let record = sample_record();
        let id = record.id.clone();
        registry.create(record).unwrap();

        assert!(registry.delete(&id));
        assert!(!registry.delete(&id));
        assert!(registry.get(&id).is_none());
    }

    #[test]
    fn test_sweep_evicts_expired_jobs() {
        let registry = InMemoryRegistry::new(Duration::hours(24), 100);

        let mut old = sample_record();
        old.created_at = Utc::now() - Duration::hours(25);
        let old_id = old.id.clone();
        registry.create(old).unwrap();

        let fresh = sample_record();
        let fresh_id = fresh.id.clone();
        registry.create(fresh).unwrap();

        let removed = registry.sweep();
        assert_eq!(removed, 1);
        assert!(registry.get(&old_id).is_none());
        assert!(registry.get(&fresh_id).is_some());
    }

    #[test]
    fn test_capacity_forces_sweep_before_rejecting() {
        let registry = InMemoryRegistry::new(Duration::hours(24), 2);

        let mut old = sample_record();
        old.created_at = Utc::now() - Duration::hours(25);
        registry.create(old).unwrap();
        registry.create(sample_record()).unwrap();
        assert_eq!(registry.len(), 2);

        // At capacity, but the expired job is evicted to make room.
        registry.create(sample_record()).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_full_of_fresh_jobs_rejects() {
        let registry = InMemoryRegistry::new(Duration::hours(24), 2);
        registry.create(sample_record()).unwrap();
        registry.create(sample_record()).unwrap();

        assert!(matches!(
            registry.create(sample_record()),
            Err(RegistryError::Full { capacity: 2 })
        ));
    }

    #[test]
    fn test_clear() {
        let registry = registry();
        registry.create(sample_record()).unwrap();
        registry.create(sample_record()).unwrap();

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_counts() {
        let registry = registry();
        let a = sample_record();
        let a_id = a.id.clone();
        registry.create(a).unwrap();
        registry.create(sample_record()).unwrap();

        registry.update(&a_id, JobPatch::state(JobState::Active));

        let (pending, active, terminal) = registry.counts();
        assert_eq!(pending, 1);
        assert_eq!(active, 1);
        assert_eq!(terminal, 0);
    }
}
