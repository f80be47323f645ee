//! Executor for transform jobs.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::error::TransformError;
use crate::job::{JobKind, JobRecord};
use crate::transform::{TransformKind, TransformOutcome, TransformPayload, TransformRunner};
use crate::worker::{ExecuteError, JobExecutor, ProgressHandle};

pub struct TransformExecutor {
    runner: Arc<dyn TransformRunner>,
}

impl TransformExecutor {
    pub fn new(runner: Arc<dyn TransformRunner>) -> Self {
        Self { runner }
    }

    /// Runs one transform payload to completion. Shared by the queued
    /// executor and the direct execution path.
    pub async fn run(
        &self,
        payload: &TransformPayload,
        progress: &ProgressHandle,
    ) -> Result<TransformOutcome, ExecuteError> {
        let started = Instant::now();
        progress.report(10, format!("Starting {} transform", payload.transform));

        let outcome = match payload.transform {
            TransformKind::Extract => {
                let slide_data = self
                    .runner
                    .extract(&payload.input_path)
                    .await
                    .map_err(classify)?;
                progress.report(90, format!("Extracted {} slides", slide_data.total_slides));
                TransformOutcome {
                    transform: TransformKind::Extract,
                    slide_data: Some(slide_data),
                    output_path: None,
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
            TransformKind::Generate => {
                let output_path = payload.output_path.clone().ok_or_else(|| {
                    ExecuteError::Validation(
                        "generate transform requires output_path".to_string(),
                    )
                })?;
                let translations = payload.translations.as_ref().ok_or_else(|| {
                    ExecuteError::Validation(
                        "generate transform requires translations".to_string(),
                    )
                })?;

                progress.report(50, "Generating translated deck");
                self.runner
                    .generate(&payload.input_path, &output_path, translations)
                    .await
                    .map_err(classify)?;
                progress.report(90, "Deck written");

                TransformOutcome {
                    transform: TransformKind::Generate,
                    slide_data: None,
                    output_path: Some(output_path),
                    duration_ms: started.elapsed().as_millis() as u64,
                }
            }
        };

        Ok(outcome)
    }
}

fn classify(e: TransformError) -> ExecuteError {
    match e {
        // The collaborator deterministically rejected the deck; a retry
        // cannot improve on that.
        TransformError::InvalidOutput(_) => ExecuteError::Validation(e.to_string()),
        _ => ExecuteError::Transient(e.to_string()),
    }
}

#[async_trait]
impl JobExecutor for TransformExecutor {
    fn kind(&self) -> JobKind {
        JobKind::Transform
    }

    async fn execute(
        &self,
        job: &JobRecord,
        progress: &ProgressHandle,
    ) -> Result<serde_json::Value, ExecuteError> {
        let payload: TransformPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| ExecuteError::Validation(format!("invalid transform payload: {}", e)))?;

        let outcome = self.run(&payload, progress).await?;
        serde_json::to_value(&outcome)
            .map_err(|e| ExecuteError::Transient(format!("failed to serialize result: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{Slide, SlideData, SlideText};
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;

    struct FakeRunner {
        generated: Mutex<Vec<(PathBuf, PathBuf)>>,
    }

    impl FakeRunner {
        fn new() -> Self {
            Self {
                generated: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TransformRunner for FakeRunner {
        async fn extract(&self, _input: &Path) -> Result<SlideData, TransformError> {
            Ok(SlideData {
                total_slides: 2,
                slides: vec![Slide {
                    slide_number: 1,
                    texts: vec![SlideText {
                        shape_type: "TEXT_BOX".to_string(),
                        text: Some("Quarterly results".to_string()),
                        is_title: Some(true),
                        table: None,
                    }],
                }],
            })
        }

        async fn generate(
            &self,
            input: &Path,
            output: &Path,
            _translations: &serde_json::Value,
        ) -> Result<(), TransformError> {
            self.generated
                .lock()
                .unwrap()
                .push((input.to_path_buf(), output.to_path_buf()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_extract_returns_slide_data() {
        let executor = TransformExecutor::new(Arc::new(FakeRunner::new()));
        let progress = ProgressHandle::detached("job-1", JobKind::Transform);

        let outcome = executor
            .run(
                &TransformPayload {
                    transform: TransformKind::Extract,
                    input_path: PathBuf::from("deck.pptx"),
                    output_path: None,
                    translations: None,
                },
                &progress,
            )
            .await
            .unwrap();

        let slide_data = outcome.slide_data.unwrap();
        assert_eq!(slide_data.total_slides, 2);
        assert_eq!(slide_data.slides[0].texts[0].is_title, Some(true));
    }

    #[tokio::test]
    async fn test_generate_requires_output_path_and_translations() {
        let executor = TransformExecutor::new(Arc::new(FakeRunner::new()));
        let progress = ProgressHandle::detached("job-1", JobKind::Transform);

        let missing_output = TransformPayload {
            transform: TransformKind::Generate,
            input_path: PathBuf::from("deck.pptx"),
            output_path: None,
            translations: Some(serde_json::json!({})),
        };
        assert!(matches!(
            executor.run(&missing_output, &progress).await,
            Err(ExecuteError::Validation(_))
        ));

        let missing_translations = TransformPayload {
            transform: TransformKind::Generate,
            input_path: PathBuf::from("deck.pptx"),
            output_path: Some(PathBuf::from("deck.ja.pptx")),
            translations: None,
        };
        assert!(matches!(
            executor.run(&missing_translations, &progress).await,
            Err(ExecuteError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_invokes_runner() {
        let runner = Arc::new(FakeRunner::new());
        let executor = TransformExecutor::new(runner.clone());
        let progress = ProgressHandle::detached("job-1", JobKind::Transform);

        let outcome = executor
            .run(
                &TransformPayload {
                    transform: TransformKind::Generate,
                    input_path: PathBuf::from("deck.pptx"),
                    output_path: Some(PathBuf::from("deck.ja.pptx")),
                    translations: Some(serde_json::json!({"1:1": "四半期決算"})),
                },
                &progress,
            )
            .await
            .unwrap();

        assert_eq!(outcome.output_path, Some(PathBuf::from("deck.ja.pptx")));
        let calls = runner.generated.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, PathBuf::from("deck.ja.pptx"));
    }
}
