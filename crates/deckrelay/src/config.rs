//! Engine configuration with serde defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for the work store database and temp artifacts.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Fixed pool size for translation jobs.
    #[serde(default = "default_translate_workers")]
    pub translate_workers: usize,
    /// Fixed pool size for transform jobs (higher resource cost).
    #[serde(default = "default_transform_workers")]
    pub transform_workers: usize,
    /// Attempts before a job is marked failed.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay for exponential retry backoff, in seconds.
    #[serde(default = "default_retry_base_secs")]
    pub retry_base_secs: u64,
    #[serde(default)]
    pub translation: TranslationConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Interval between sweep ticks, in seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".deckrelay")
}

fn default_translate_workers() -> usize {
    5
}

fn default_transform_workers() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_secs() -> u64 {
    2
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            translate_workers: default_translate_workers(),
            transform_workers: default_transform_workers(),
            max_attempts: default_max_attempts(),
            retry_base_secs: default_retry_base_secs(),
            translation: TranslationConfig::default(),
            transform: TransformConfig::default(),
            upload: UploadConfig::default(),
            registry: RegistryConfig::default(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl EngineConfig {
    pub(crate) fn database_path(&self) -> PathBuf {
        self.data_dir.join("data").join("deckrelay.db")
    }

    pub(crate) fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    /// Items per sub-batch within a translation job.
    #[serde(default = "default_sub_batch_size")]
    pub sub_batch_size: usize,
    /// Bounded parallelism for items within a sub-batch.
    #[serde(default = "default_item_concurrency")]
    pub item_concurrency: usize,
    /// Time-to-live for cached translations, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Capacity of the in-process cache layer.
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: u64,
}

fn default_sub_batch_size() -> usize {
    10
}

fn default_item_concurrency() -> usize {
    5
}

fn default_cache_ttl_secs() -> u64 {
    // 7 days
    7 * 24 * 60 * 60
}

fn default_cache_max_entries() -> u64 {
    10_000
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            sub_batch_size: default_sub_batch_size(),
            item_concurrency: default_item_concurrency(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_max_entries: default_cache_max_entries(),
        }
    }
}

impl TranslationConfig {
    pub(crate) fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformConfig {
    /// Program invoked as the transform collaborator.
    #[serde(default = "default_transform_program")]
    pub program: String,
    /// Leading arguments before the subcommand (e.g. a script path).
    #[serde(default)]
    pub args: Vec<String>,
    /// Hard timeout for a single transform call, in seconds.
    #[serde(default = "default_transform_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_transform_program() -> String {
    "python3".to_string()
}

fn default_transform_timeout_secs() -> u64 {
    // ~4 minutes, matching the collaborator's worst observed decks
    240
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            program: default_transform_program(),
            args: Vec::new(),
            timeout_secs: default_transform_timeout_secs(),
        }
    }
}

impl TransformConfig {
    pub(crate) fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Base directory for per-session chunk temp dirs.
    #[serde(default = "default_upload_tmp_dir")]
    pub tmp_dir: PathBuf,
    /// Directory merged files land in.
    #[serde(default = "default_upload_completed_dir")]
    pub completed_dir: PathBuf,
    /// Inactivity timeout before a session is purged, in seconds.
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
}

fn default_upload_tmp_dir() -> PathBuf {
    default_data_dir().join("uploads").join("tmp")
}

fn default_upload_completed_dir() -> PathBuf {
    default_data_dir().join("uploads").join("completed")
}

fn default_session_timeout_secs() -> u64 {
    // 30 minutes
    30 * 60
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            tmp_dir: default_upload_tmp_dir(),
            completed_dir: default_upload_completed_dir(),
            session_timeout_secs: default_session_timeout_secs(),
        }
    }
}

impl UploadConfig {
    pub(crate) fn session_timeout(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.session_timeout_secs as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Jobs older than this are swept regardless of state, in seconds.
    #[serde(default = "default_job_expiry_secs")]
    pub job_expiry_secs: u64,
    /// Registry capacity; reaching it forces a sweep before rejecting.
    #[serde(default = "default_registry_max_jobs")]
    pub max_jobs: usize,
}

fn default_job_expiry_secs() -> u64 {
    // 24 hours
    24 * 60 * 60
}

fn default_registry_max_jobs() -> usize {
    10_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            job_expiry_secs: default_job_expiry_secs(),
            max_jobs: default_registry_max_jobs(),
        }
    }
}

impl RegistryConfig {
    pub(crate) fn job_expiry(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.job_expiry_secs as i64)
    }
}
