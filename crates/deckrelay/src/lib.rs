pub mod batch;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod job;
pub mod logging;
pub mod registry;
pub mod store;
pub mod sweep;
pub mod transform;
pub mod translate;
pub mod upload;
pub mod worker;

pub use config::{EngineConfig, TransformConfig, TranslationConfig, UploadConfig};
pub use engine::{Engine, QueueBackend};
pub use error::{
    BatchError, DeckrelayError, QueueError, RegistryError, Result, TransformError, TranslateError,
    UploadError,
};
pub use job::progress::{JobProgressBroadcaster, JobProgressEvent};
pub use job::{JobKind, JobMetadata, JobRecord, JobRequest, JobState, JobStatusView};
pub use registry::{InMemoryRegistry, JobStatusStore};
pub use store::{TranslationCache, WorkStore};
pub use transform::runner::ProcessTransformRunner;
pub use transform::{SlideData, TransformKind, TransformOutcome, TransformPayload, TransformRunner};
pub use translate::http::HttpTranslator;
pub use translate::{TranslationItem, TranslationOutcome, TranslationPayload, Translator};
pub use upload::{ChunkReceipt, ChunkUpload, SessionProgress, UploadManager};
