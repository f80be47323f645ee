//! Slide-text translation: payload types, the translator seam, and the
//! executor that runs translate jobs against it with caching.

pub mod http;
pub mod worker;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TranslateError;

/// One piece of slide text to translate, keyed by a caller-chosen id
/// (typically `slide:shape` coordinates).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslationItem {
    pub id: String,
    pub original_text: String,
}

/// Payload of a translate job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationPayload {
    pub items: Vec<TranslationItem>,
    pub target_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// One translated item in the job result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TranslatedItem {
    pub id: String,
    pub original_text: String,
    pub translated_text: String,
    /// True when the translation came from the cache rather than the
    /// translator.
    pub cached: bool,
}

/// Result of a completed translate job. Translations keep the input
/// item order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationOutcome {
    pub translations: Vec<TranslatedItem>,
    pub cached_count: usize,
    pub duration_ms: u64,
}

/// Translates batches of texts into a target language.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Translates `texts` in order. The returned vector must have the
    /// same length and ordering as the input.
    async fn translate_batch(
        &self,
        texts: &[String],
        target_language: &str,
        model: Option<&str>,
    ) -> Result<Vec<String>, TranslateError>;
}
