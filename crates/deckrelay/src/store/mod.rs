//! Shared work store client.
//!
//! `WorkStore` is the queue surface over the sqlite database: enqueue,
//! lease, ack, nack, status, cancel. `TranslationCache` layers a moka
//! TTL cache in front of the persistent `translation_cache` table so
//! repeated lookups stay in-process; in degraded mode (no database) the
//! moka layer is the whole cache.

use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::db::{cache_repo, queue_repo, Database};
use crate::error::QueueError;
use crate::job::{JobKind, JobMetadata, JobRecord, JobRequest, JobState, JobStatusView};

fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|e| {
            log::warn!("parse_timestamp: failed to parse '{}': {}", s, e);
            Utc::now()
        })
}

/// Derives the namespaced cache key for a `(text, language)` pair.
/// The digest keeps keys bounded regardless of source text length.
pub fn cache_key(text: &str, target_language: &str) -> String {
    use std::fmt::Write;
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        let _ = write!(hex, "{:02x}", byte);
    }
    format!("translation:{}:{}", target_language, hex)
}

/// Outcome of a nack: either re-queued for a later attempt or failed for
/// good.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackOutcome {
    Requeued,
    Failed,
}

/// Queue client over the persistent work store.
#[derive(Clone)]
pub struct WorkStore {
    db: Database,
    max_attempts: u32,
    retry_base: Duration,
}

impl WorkStore {
    pub fn new(db: Database, max_attempts: u32, retry_base: Duration) -> Self {
        Self {
            db,
            max_attempts,
            retry_base,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Enqueues a submission and returns its job id.
    pub fn enqueue(&self, request: &JobRequest) -> Result<String, QueueError> {
        let record = JobRecord::from_request(request, self.max_attempts);
        let now = Utc::now();
        let available_at = match request.metadata.delay_secs {
            Some(secs) => now + chrono::Duration::seconds(secs as i64),
            None => now,
        };

        let payload = serde_json::to_string(&record.payload)
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;

        let row = queue_repo::QueueJobRow {
            id: record.id.clone(),
            kind: record.kind.as_str().to_string(),
            payload,
            state: "pending".to_string(),
            progress: 0,
            attempts: 0,
            max_attempts: self.max_attempts,
            priority: request.metadata.priority,
            owner_id: request.metadata.owner_id.clone(),
            available_at: format_timestamp(available_at),
            created_at: format_timestamp(now),
            updated_at: format_timestamp(now),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        };
        queue_repo::insert(&self.db, &row)?;

        log::debug!("Enqueued {} job {}", record.kind, record.id);
        Ok(record.id)
    }

    /// Leases the next available job of the given kind, if any.
    pub fn lease(&self, kind: JobKind) -> Result<Option<JobRecord>, QueueError> {
        let now = format_timestamp(Utc::now());
        let row = queue_repo::claim_next(&self.db, kind.as_str(), &now)?;
        Ok(row.map(|row| record_from_row(&row)))
    }

    /// Acknowledges a leased job as completed with its result.
    pub fn ack(&self, id: &str, result: &serde_json::Value) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(result)
            .map_err(|e| QueueError::InvalidPayload(e.to_string()))?;
        queue_repo::complete(&self.db, id, &serialized, &format_timestamp(Utc::now()))?;
        Ok(())
    }

    /// Reports a failed attempt. Re-queues with exponential backoff while
    /// attempts remain (and the failure is retryable), otherwise fails
    /// the job permanently.
    pub fn nack(&self, id: &str, error: &str, retryable: bool) -> Result<NackOutcome, QueueError> {
        let row = queue_repo::find_by_id(&self.db, id)?
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        let now = Utc::now();

        if retryable && row.attempts < row.max_attempts {
            let backoff = self.backoff_for_attempt(row.attempts);
            let available_at = now + chrono::Duration::from_std(backoff).unwrap_or_default();
            queue_repo::release_for_retry(
                &self.db,
                id,
                error,
                &format_timestamp(available_at),
                &format_timestamp(now),
            )?;
            log::warn!(
                "Job {} attempt {}/{} failed, retrying in {:?}: {}",
                id,
                row.attempts,
                row.max_attempts,
                backoff,
                error
            );
            Ok(NackOutcome::Requeued)
        } else {
            queue_repo::fail(&self.db, id, error, &format_timestamp(now))?;
            log::error!(
                "Job {} failed permanently after {} attempts: {}",
                id,
                row.attempts,
                error
            );
            Ok(NackOutcome::Failed)
        }
    }

    /// Returns the status view for a job, if tracked.
    pub fn get_status(&self, id: &str) -> Result<Option<JobStatusView>, QueueError> {
        let row = queue_repo::find_by_id(&self.db, id)?;
        Ok(row.map(|row| JobStatusView::from(&record_from_row(&row))))
    }

    /// Cancels a job that has not been leased. Returns true on success.
    pub fn cancel(&self, id: &str) -> Result<bool, QueueError> {
        if queue_repo::find_by_id(&self.db, id)?.is_none() {
            return Err(QueueError::NotFound(id.to_string()));
        }
        Ok(queue_repo::cancel_pending(
            &self.db,
            id,
            &format_timestamp(Utc::now()),
        )?)
    }

    /// Raises a job's progress (monotonic).
    pub fn update_progress(&self, id: &str, progress: u8) -> Result<(), QueueError> {
        queue_repo::update_progress(
            &self.db,
            id,
            progress.min(100),
            &format_timestamp(Utc::now()),
        )?;
        Ok(())
    }

    /// Counts currently leased jobs of a kind.
    pub fn count_active(&self, kind: JobKind) -> Result<u64, QueueError> {
        Ok(queue_repo::count_by_state(
            &self.db,
            kind.as_str(),
            "active",
        )?)
    }

    /// Deletes terminal jobs last touched before the retention cutoff.
    pub fn purge_terminal_older_than(
        &self,
        retention: chrono::Duration,
    ) -> Result<usize, QueueError> {
        let cutoff = format_timestamp(Utc::now() - retention);
        Ok(queue_repo::purge_older_than(&self.db, &cutoff)?)
    }

    fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        // attempt 1 → base, attempt 2 → base*2, attempt 3 → base*4 ...
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        self.retry_base.saturating_mul(factor as u32)
    }
}

fn record_from_row(row: &queue_repo::QueueJobRow) -> JobRecord {
    let kind = JobKind::parse(&row.kind).unwrap_or_else(|| {
        log::warn!("Unknown job kind '{}' for job {}", row.kind, row.id);
        JobKind::Translate
    });
    let state = JobState::parse(&row.state).unwrap_or_else(|| {
        log::warn!("Unknown job state '{}' for job {}", row.state, row.id);
        JobState::Pending
    });
    let payload = serde_json::from_str(&row.payload).unwrap_or_else(|e| {
        log::warn!("Corrupt payload for job {}: {}", row.id, e);
        serde_json::Value::Null
    });
    let result = row
        .result
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());

    JobRecord {
        id: row.id.clone(),
        kind,
        payload,
        state,
        progress: row.progress,
        attempts: row.attempts,
        max_attempts: row.max_attempts,
        metadata: JobMetadata {
            owner_id: row.owner_id.clone(),
            priority: row.priority,
            delay_secs: None,
        },
        created_at: parse_timestamp(&row.created_at),
        started_at: row.started_at.as_deref().map(parse_timestamp),
        completed_at: row.completed_at.as_deref().map(parse_timestamp),
        result,
        error: row.error.clone(),
    }
}

/// Two-layer translation cache: moka in front, sqlite behind.
pub struct TranslationCache {
    front: moka::sync::Cache<String, String>,
    db: Option<Database>,
    ttl: Duration,
}

impl TranslationCache {
    pub fn new(db: Option<Database>, ttl: Duration, max_entries: u64) -> Self {
        let front = moka::sync::Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(ttl)
            .build();
        Self { front, db, ttl }
    }

    /// Looks up a cached translation. A hit in the persistent layer
    /// repopulates the in-process layer.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(value) = self.front.get(key) {
            return Some(value);
        }

        let db = self.db.as_ref()?;
        match cache_repo::get(db, key, &format_timestamp(Utc::now())) {
            Ok(Some(value)) => {
                self.front.insert(key.to_string(), value.clone());
                Some(value)
            }
            Ok(None) => None,
            Err(e) => {
                log::error!("Cache read failed for '{}': {}", key, e);
                None
            }
        }
    }

    /// Writes a translation to both layers.
    pub fn set(&self, key: &str, value: &str) {
        self.front.insert(key.to_string(), value.to_string());

        if let Some(db) = &self.db {
            let now = Utc::now();
            let expires_at = now + chrono::Duration::from_std(self.ttl).unwrap_or_default();
            if let Err(e) = cache_repo::set(
                db,
                key,
                value,
                &format_timestamp(now),
                &format_timestamp(expires_at),
            ) {
                log::error!("Cache write failed for '{}': {}", key, e);
            }
        }
    }

    /// Deletes expired rows from the persistent layer. The moka layer
    /// expires entries on its own.
    pub fn purge_expired(&self) -> usize {
        let Some(db) = &self.db else { return 0 };
        match cache_repo::purge_expired(db, &format_timestamp(Utc::now())) {
            Ok(removed) => removed,
            Err(e) => {
                log::error!("Cache purge failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobMetadata;

    fn store() -> WorkStore {
        WorkStore::new(
            Database::open_in_memory().unwrap(),
            3,
            Duration::from_secs(2),
        )
    }

    fn translate_request() -> JobRequest {
        JobRequest::new(JobKind::Translate, serde_json::json!({"items": []}))
    }

    #[test]
    fn test_cache_key_shape() {
        let key = cache_key("Hello", "ja");
        assert!(key.starts_with("translation:ja:"));
        assert_eq!(key.len(), "translation:ja:".len() + 16);
    }

    #[test]
    fn test_cache_key_is_stable_and_distinct() {
        assert_eq!(cache_key("Hello", "ja"), cache_key("Hello", "ja"));
        assert_ne!(cache_key("Hello", "ja"), cache_key("Hello", "fr"));
        assert_ne!(cache_key("Hello", "ja"), cache_key("Goodbye", "ja"));
    }

    #[test]
    fn test_enqueue_lease_ack_round_trip() {
        let store = store();
        let id = store.enqueue(&translate_request()).unwrap();

        let leased = store.lease(JobKind::Translate).unwrap().unwrap();
        assert_eq!(leased.id, id);
        assert_eq!(leased.state, JobState::Active);
        assert_eq!(leased.attempts, 1);

        store.ack(&id, &serde_json::json!({"done": true})).unwrap();

        let status = store.get_status(&id).unwrap().unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.progress, 100);
        assert!(status.result.is_some());
    }

    #[test]
    fn test_lease_empty_queue() {
        let store = store();
        assert!(store.lease(JobKind::Translate).unwrap().is_none());
    }

    #[test]
    fn test_nack_requeues_until_attempts_exhausted() {
        let store = store();
        let id = store.enqueue(&translate_request()).unwrap();

        store.lease(JobKind::Translate).unwrap().unwrap();
        assert_eq!(
            store.nack(&id, "flaky network", true).unwrap(),
            NackOutcome::Requeued
        );

        let status = store.get_status(&id).unwrap().unwrap();
        assert_eq!(status.state, JobState::Pending);

        // Backoff makes the job invisible right now.
        assert!(store.lease(JobKind::Translate).unwrap().is_none());
    }

    #[test]
    fn test_nack_fails_after_max_attempts() {
        let db = Database::open_in_memory().unwrap();
        // Zero backoff so attempts can be replayed immediately.
        let store = WorkStore::new(db, 3, Duration::ZERO);
        let id = store.enqueue(&translate_request()).unwrap();

        for attempt in 1..=3u32 {
            let leased = store.lease(JobKind::Translate).unwrap().unwrap();
            assert_eq!(leased.attempts, attempt);
            let outcome = store.nack(&id, "still broken", true).unwrap();
            if attempt < 3 {
                assert_eq!(outcome, NackOutcome::Requeued);
            } else {
                assert_eq!(outcome, NackOutcome::Failed);
            }
        }

        let status = store.get_status(&id).unwrap().unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert_eq!(status.error.as_deref(), Some("still broken"));
    }

    #[test]
    fn test_nack_validation_error_fails_immediately() {
        let store = store();
        let id = store.enqueue(&translate_request()).unwrap();
        store.lease(JobKind::Translate).unwrap();

        let outcome = store.nack(&id, "missing target language", false).unwrap();
        assert_eq!(outcome, NackOutcome::Failed);
    }

    #[test]
    fn test_cancel_pending_job() {
        let store = store();
        let id = store.enqueue(&translate_request()).unwrap();

        assert!(store.cancel(&id).unwrap());
        let status = store.get_status(&id).unwrap().unwrap();
        assert_eq!(status.state, JobState::Cancelled);
    }

    #[test]
    fn test_cancel_active_job_returns_false() {
        let store = store();
        let id = store.enqueue(&translate_request()).unwrap();
        store.lease(JobKind::Translate).unwrap();

        assert!(!store.cancel(&id).unwrap());
    }

    #[test]
    fn test_cancel_unknown_job() {
        let store = store();
        assert!(matches!(
            store.cancel("missing"),
            Err(QueueError::NotFound(_))
        ));
    }

    #[test]
    fn test_delayed_job_is_deferred() {
        let store = store();
        let request = translate_request().with_metadata(JobMetadata {
            owner_id: None,
            priority: 0,
            delay_secs: Some(3600),
        });
        store.enqueue(&request).unwrap();

        assert!(store.lease(JobKind::Translate).unwrap().is_none());
    }

    #[test]
    fn test_progress_updates_are_monotonic() {
        let store = store();
        let id = store.enqueue(&translate_request()).unwrap();
        store.lease(JobKind::Translate).unwrap();

        store.update_progress(&id, 60).unwrap();
        store.update_progress(&id, 30).unwrap();

        let status = store.get_status(&id).unwrap().unwrap();
        assert_eq!(status.progress, 60);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let store = store();
        assert_eq!(store.backoff_for_attempt(1), Duration::from_secs(2));
        assert_eq!(store.backoff_for_attempt(2), Duration::from_secs(4));
        assert_eq!(store.backoff_for_attempt(3), Duration::from_secs(8));
    }

    #[test]
    fn test_translation_cache_without_database() {
        let cache = TranslationCache::new(None, Duration::from_secs(60), 100);
        assert!(cache.get("translation:ja:abc").is_none());

        cache.set("translation:ja:abc", "こんにちは");
        assert_eq!(cache.get("translation:ja:abc").as_deref(), Some("こんにちは"));
        assert_eq!(cache.purge_expired(), 0);
    }

    #[test]
    fn test_translation_cache_persists_to_database() {
        let db = Database::open_in_memory().unwrap();
        let cache = TranslationCache::new(Some(db.clone()), Duration::from_secs(3600), 100);

        cache.set("translation:fr:xyz", "bonjour");

        // A second cache over the same database misses its moka layer
        // but hits the persistent one.
        let other = TranslationCache::new(Some(db), Duration::from_secs(3600), 100);
        assert_eq!(other.get("translation:fr:xyz").as_deref(), Some("bonjour"));
    }
}
