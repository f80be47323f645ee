//! Slide-deck transforms: extracting text out of a deck and generating
//! a translated deck, both delegated to an external collaborator
//! process that speaks JSON on stdout.

pub mod runner;
pub mod worker;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransformError;

/// The two transform operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Read slide text out of a deck.
    Extract,
    /// Write a translated copy of a deck.
    Generate,
}

impl TransformKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformKind::Extract => "extract",
            TransformKind::Generate => "generate",
        }
    }
}

impl std::fmt::Display for TransformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a transform job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformPayload {
    pub transform: TransformKind,
    pub input_path: PathBuf,
    /// Destination path; required for `generate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    /// Translations keyed by slide/shape coordinates; required for
    /// `generate`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translations: Option<serde_json::Value>,
}

/// One text-bearing shape on a slide. Tables carry their cell grid
/// instead of a flat text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlideText {
    pub shape_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_title: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<Vec<Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Slide {
    pub slide_number: u32,
    pub texts: Vec<SlideText>,
}

/// Extracted text for a whole deck. Slides with no text are omitted,
/// so `slides.len()` can be less than `total_slides`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlideData {
    pub total_slides: u32,
    pub slides: Vec<Slide>,
}

/// Result of a completed transform job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformOutcome {
    pub transform: TransformKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_data: Option<SlideData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
    pub duration_ms: u64,
}

/// Performs deck transforms. The production implementation shells out
/// to the collaborator process; tests substitute their own.
#[async_trait]
pub trait TransformRunner: Send + Sync {
    async fn extract(&self, input: &Path) -> Result<SlideData, TransformError>;

    async fn generate(
        &self,
        input: &Path,
        output: &Path,
        translations: &serde_json::Value,
    ) -> Result<(), TransformError>;
}
