//! Job progress broadcaster for push-style status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::{JobKind, JobState};

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    /// Unique job identifier.
    pub job_id: String,
    /// Kind of work the job carries.
    pub kind: JobKind,
    /// Overall job state.
    pub state: JobState,
    /// Percent complete, 0–100.
    pub progress: u8,
    /// Human-readable message describing current activity.
    pub message: String,
    /// Timestamp of this event.
    pub timestamp: DateTime<Utc>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    /// Creates a new in-flight progress event.
    pub fn new(job_id: &str, kind: JobKind, progress: u8, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
            state: JobState::Active,
            progress,
            message: message.to_string(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Creates a completion event.
    pub fn completed(job_id: &str, kind: JobKind) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
            state: JobState::Completed,
            progress: 100,
            message: "Job completed".to_string(),
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Creates a failure event.
    pub fn failed(job_id: &str, kind: JobKind, progress: u8, error: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            kind,
            state: JobState::Failed,
            progress,
            message: "Job failed".to_string(),
            timestamp: Utc::now(),
            error: Some(error.to_string()),
        }
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcaster_send_receive() {
        let broadcaster = JobProgressBroadcaster::new(10);
        let mut rx = broadcaster.subscribe();

        broadcaster.send(JobProgressEvent::new(
            "job-1",
            JobKind::Translate,
            25,
            "Translating sub-batch 1",
        ));

        let received = rx.try_recv().unwrap();
        assert_eq!(received.job_id, "job-1");
        assert_eq!(received.state, JobState::Active);
        assert_eq!(received.progress, 25);
    }

    #[test]
    fn test_completion_event() {
        let event = JobProgressEvent::completed("job-2", JobKind::Transform);
        assert_eq!(event.state, JobState::Completed);
        assert_eq!(event.progress, 100);
        assert!(event.error.is_none());
    }

    #[test]
    fn test_failure_event() {
        let event = JobProgressEvent::failed("job-3", JobKind::Translate, 40, "upstream refused");
        assert_eq!(event.state, JobState::Failed);
        assert_eq!(event.error.as_deref(), Some("upstream refused"));
    }

    #[test]
    fn test_send_without_receivers_is_fine() {
        let broadcaster = JobProgressBroadcaster::default();
        broadcaster.send(JobProgressEvent::completed("job-4", JobKind::Transform));
    }
}
