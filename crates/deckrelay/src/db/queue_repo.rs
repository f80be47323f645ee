//! Queue repository — row-level operations for the `queue_jobs` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct QueueJobRow {
    pub id: String,
    pub kind: String,
    pub payload: String,
    pub state: String,
    pub progress: u8,
    pub attempts: u32,
    pub max_attempts: u32,
    pub priority: i32,
    pub owner_id: Option<String>,
    pub available_at: String,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub result: Option<String>,
    pub error: Option<String>,
}

impl QueueJobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            kind: row.get("kind")?,
            payload: row.get("payload")?,
            state: row.get("state")?,
            progress: row.get("progress")?,
            attempts: row.get("attempts")?,
            max_attempts: row.get("max_attempts")?,
            priority: row.get("priority")?,
            owner_id: row.get("owner_id")?,
            available_at: row.get("available_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
            result: row.get("result")?,
            error: row.get("error")?,
        })
    }
}

/// Inserts a new pending job row.
pub fn insert(db: &Database, job: &QueueJobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO queue_jobs (id, kind, payload, state, progress, attempts, max_attempts,
             priority, owner_id, available_at, created_at, updated_at, started_at, completed_at,
             result, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                job.id,
                job.kind,
                job.payload,
                job.state,
                job.progress,
                job.attempts,
                job.max_attempts,
                job.priority,
                job.owner_id,
                job.available_at,
                job.created_at,
                job.updated_at,
                job.started_at,
                job.completed_at,
                job.result,
                job.error,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<QueueJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM queue_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], QueueJobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Claims the next available pending job of the given kind.
///
/// Candidate selection is priority DESC then created_at ASC, and a job
/// is only visible once its `available_at` has passed (which covers both
/// submission delays and retry backoff). The select-then-update pair is
/// atomic because all handles share one mutex-guarded connection.
pub fn claim_next(
    db: &Database,
    kind: &str,
    now: &str,
) -> Result<Option<QueueJobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let candidate: Option<String> = conn
            .query_row(
                "SELECT id FROM queue_jobs
                 WHERE kind = ?1 AND state = 'pending' AND available_at <= ?2
                 ORDER BY priority DESC, created_at ASC
                 LIMIT 1",
                params![kind, now],
                |r| r.get(0),
            )
            .optional()?;

        let id = match candidate {
            Some(id) => id,
            None => return Ok(None),
        };

        let updated = conn.execute(
            "UPDATE queue_jobs
             SET state = 'active', attempts = attempts + 1, started_at = ?2, updated_at = ?2
             WHERE id = ?1 AND state = 'pending'",
            params![id, now],
        )?;
        if updated != 1 {
            return Ok(None);
        }

        let mut stmt = conn.prepare("SELECT * FROM queue_jobs WHERE id = ?1")?;
        let row = stmt.query_row(params![id], QueueJobRow::from_row)?;
        Ok(Some(row))
    })
}

/// Marks an active job completed with its serialized result.
pub fn complete(db: &Database, id: &str, result: &str, now: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE queue_jobs
             SET state = 'completed', progress = 100, result = ?2, completed_at = ?3, updated_at = ?3
             WHERE id = ?1 AND state = 'active'",
            params![id, result, now],
        )?;
        Ok(())
    })
}

/// Returns an active job to the pending state for a later retry.
/// `available_at` carries the retry backoff window.
pub fn release_for_retry(
    db: &Database,
    id: &str,
    error: &str,
    available_at: &str,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE queue_jobs
             SET state = 'pending', error = ?2, available_at = ?3, updated_at = ?4
             WHERE id = ?1 AND state = 'active'",
            params![id, error, available_at, now],
        )?;
        Ok(())
    })
}

/// Marks an active job permanently failed.
pub fn fail(db: &Database, id: &str, error: &str, now: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE queue_jobs
             SET state = 'failed', error = ?2, completed_at = ?3, updated_at = ?3
             WHERE id = ?1 AND state = 'active'",
            params![id, error, now],
        )?;
        Ok(())
    })
}

/// Cancels a job that has not been claimed yet. Returns true if the job
/// was actually cancelled (pending at the time of the call).
pub fn cancel_pending(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE queue_jobs
             SET state = 'cancelled', completed_at = ?2, updated_at = ?2
             WHERE id = ?1 AND state = 'pending'",
            params![id, now],
        )?;
        Ok(updated == 1)
    })
}

/// Raises the progress of a job. MAX() keeps the sequence monotonic even
/// if updates arrive out of order.
pub fn update_progress(
    db: &Database,
    id: &str,
    progress: u8,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE queue_jobs
             SET progress = MAX(progress, ?2), updated_at = ?3
             WHERE id = ?1 AND state = 'active'",
            params![id, progress, now],
        )?;
        Ok(())
    })
}

/// Counts jobs of a kind in the given state.
pub fn count_by_state(db: &Database, kind: &str, state: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_jobs WHERE kind = ?1 AND state = ?2",
            params![kind, state],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Deletes terminal jobs older than the cutoff. Returns the number removed.
pub fn purge_older_than(db: &Database, cutoff: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let removed = conn.execute(
            "DELETE FROM queue_jobs
             WHERE state IN ('completed', 'failed', 'cancelled') AND updated_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    })
}
