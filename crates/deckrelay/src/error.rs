use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeckrelayError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    #[error("Translation error: {0}")]
    Translate(#[from] TranslateError),

    #[error("Transform error: {0}")]
    Transform(#[from] TransformError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

/// Errors from the work store queue surface.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Invalid job payload: {0}")]
    InvalidPayload(String),

    #[error("Store error: {0}")]
    Store(#[from] crate::db::DatabaseError),
}

/// Errors from the in-memory fallback registry.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Job id already registered: {0}")]
    DuplicateId(String),

    #[error("Registry is full ({capacity} jobs) even after a sweep")]
    Full { capacity: usize },
}

/// Errors from the partial-success batch processor.
#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Item {index} failed: {error}")]
    ItemFailed { index: usize, error: String },

    #[error(
        "Success rate {rate:.2} below required minimum {minimum:.2} \
         ({failed} of {total} items failed): {details}"
    )]
    BelowMinimumSuccessRate {
        rate: f64,
        minimum: f64,
        failed: usize,
        total: usize,
        /// Per-item causes, so status queries see why the batch failed.
        details: String,
    },

    #[error("All fallback strategies failed: {details}")]
    AllFallbacksFailed { details: String },
}

/// Errors from the translation worker and its collaborator.
#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("Translation request failed: {0}")]
    Request(String),

    #[error("Translation service returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Errors from the document transform worker and its collaborator.
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Transform process failed to start: {0}")]
    Spawn(String),

    #[error("Transform process exited with status {status}: {stderr}")]
    ProcessFailed { status: i32, stderr: String },

    #[error("Transform timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Transform output could not be parsed: {0}")]
    InvalidOutput(String),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the chunked upload session manager.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session '{session_id}' does not belong to this owner")]
    WrongOwner { session_id: String },

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Merge failed for session '{session_id}': {reason}")]
    MergeFailed { session_id: String, reason: String },

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, DeckrelayError>;
