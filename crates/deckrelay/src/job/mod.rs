//! Job model: kinds, lifecycle states, records, and status views.

pub mod progress;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of work a job carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Translate,
    Transform,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Translate => "translate",
            JobKind::Transform => "transform",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "translate" => Some(JobKind::Translate),
            "transform" => Some(JobKind::Transform),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
///
/// The only legal transitions are pending → active → {completed, failed,
/// cancelled}, plus pending → cancelled for jobs removed before a lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Active,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "cancelled" => Some(JobState::Cancelled),
            _ => None,
        }
    }

    /// Returns true for completed, failed, and cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

/// Caller-supplied scheduling metadata for a submission.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetadata {
    /// Owner of the job, echoed back on status queries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    /// Higher priority jobs are leased first within a kind.
    #[serde(default)]
    pub priority: i32,
    /// Seconds to hold the job back before it becomes leasable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_secs: Option<u64>,
}

/// A job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub kind: JobKind,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub metadata: JobMetadata,
}

impl JobRequest {
    pub fn new(kind: JobKind, payload: serde_json::Value) -> Self {
        Self {
            kind,
            payload,
            metadata: JobMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: JobMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// The full job record as tracked by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: String,
    pub kind: JobKind,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub progress: u8,
    pub attempts: u32,
    pub max_attempts: u32,
    pub metadata: JobMetadata,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobRecord {
    /// Creates a fresh pending record for a submission.
    pub fn from_request(request: &JobRequest, max_attempts: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind: request.kind,
            payload: request.payload.clone(),
            state: JobState::Pending,
            progress: 0,
            attempts: 0,
            max_attempts,
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state.is_terminal()
    }
}

/// What status queries return to callers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusView {
    pub id: String,
    pub kind: JobKind,
    pub state: JobState,
    pub progress: u8,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&JobRecord> for JobStatusView {
    fn from(record: &JobRecord) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind,
            state: record.state,
            progress: record.progress,
            attempts: record.attempts,
            result: record.result.clone(),
            error: record.error.clone(),
            created_at: record.created_at,
            started_at: record.started_at,
            completed_at: record.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        assert_eq!(JobKind::parse("translate"), Some(JobKind::Translate));
        assert_eq!(JobKind::parse("transform"), Some(JobKind::Transform));
        assert_eq!(JobKind::parse("bogus"), None);
        assert_eq!(JobKind::Translate.as_str(), "translate");
    }

    #[test]
    fn test_state_terminal() {
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Active.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn test_record_from_request() {
        let request = JobRequest::new(JobKind::Translate, serde_json::json!({"items": []}))
            .with_metadata(JobMetadata {
                owner_id: Some("user-1".to_string()),
                priority: 5,
                delay_secs: None,
            });

        let record = JobRecord::from_request(&request, 3);
        assert!(!record.id.is_empty());
        assert_eq!(record.state, JobState::Pending);
        assert_eq!(record.progress, 0);
        assert_eq!(record.max_attempts, 3);
        assert_eq!(record.metadata.owner_id.as_deref(), Some("user-1"));
        assert!(!record.is_finished());
    }

    #[test]
    fn test_record_ids_are_unique() {
        let request = JobRequest::new(JobKind::Transform, serde_json::json!({}));
        let a = JobRecord::from_request(&request, 3);
        let b = JobRecord::from_request(&request, 3);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_status_view_from_record() {
        let request = JobRequest::new(JobKind::Translate, serde_json::json!({}));
        let mut record = JobRecord::from_request(&request, 3);
        record.state = JobState::Completed;
        record.progress = 100;
        record.result = Some(serde_json::json!({"ok": true}));

        let view = JobStatusView::from(&record);
        assert_eq!(view.state, JobState::Completed);
        assert_eq!(view.progress, 100);
        assert!(view.result.is_some());
        assert!(view.error.is_none());
    }
}
