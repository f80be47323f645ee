//! Executor for translate jobs.
//!
//! Splits the payload into cache hits and misses, translates the misses
//! in bounded sub-batches, and reassembles the results in input order.
//! Any sub-batch failure fails the whole attempt so the queue's retry
//! can replay it; by then the sub-batches that did succeed are cached
//! and skip the translator entirely.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use crate::batch::{self, BatchOptions};
use crate::config::TranslationConfig;
use crate::job::{JobKind, JobRecord};
use crate::store::{cache_key, TranslationCache};
use crate::translate::{
    TranslatedItem, TranslationItem, TranslationOutcome, TranslationPayload, Translator,
};
use crate::worker::{ExecuteError, JobExecutor, ProgressHandle};

pub struct TranslateExecutor {
    translator: Arc<dyn Translator>,
    cache: Arc<TranslationCache>,
    config: TranslationConfig,
}

impl TranslateExecutor {
    pub fn new(
        translator: Arc<dyn Translator>,
        cache: Arc<TranslationCache>,
        config: TranslationConfig,
    ) -> Self {
        Self {
            translator,
            cache,
            config,
        }
    }

    /// Runs one translate payload to completion. Shared by the queued
    /// executor and the direct execution path.
    pub async fn run(
        &self,
        payload: &TranslationPayload,
        progress: &ProgressHandle,
    ) -> Result<TranslationOutcome, ExecuteError> {
        if payload.target_language.trim().is_empty() {
            return Err(ExecuteError::Validation(
                "target_language must not be empty".to_string(),
            ));
        }

        let started = Instant::now();
        let total = payload.items.len();

        // Partition into cache hits and misses, remembering input order.
        let mut translations: Vec<Option<TranslatedItem>> = vec![None; total];
        let mut misses: Vec<(usize, TranslationItem)> = Vec::new();
        let mut cached_count = 0;

        for (index, item) in payload.items.iter().enumerate() {
            let key = cache_key(&item.original_text, &payload.target_language);
            if let Some(translated_text) = self.cache.get(&key) {
                translations[index] = Some(TranslatedItem {
                    id: item.id.clone(),
                    original_text: item.original_text.clone(),
                    translated_text,
                    cached: true,
                });
                cached_count += 1;
            } else {
                misses.push((index, item.clone()));
            }
        }

        progress.report(
            percent(cached_count, total),
            format!("{} of {} items served from cache", cached_count, total),
        );

        if !misses.is_empty() {
            let sub_batches: Vec<Vec<(usize, TranslationItem)>> = misses
                .chunks(self.config.sub_batch_size.max(1))
                .map(|chunk| chunk.to_vec())
                .collect();

            let options = BatchOptions {
                continue_on_error: true,
                min_success_rate: 1.0,
                concurrency: self.config.item_concurrency.max(1),
            };

            let done = Arc::new(AtomicUsize::new(cached_count));
            let translator = Arc::clone(&self.translator);
            let cache = Arc::clone(&self.cache);
            let target_language = payload.target_language.clone();
            let model = payload.model.clone();
            let progress_handle = progress.clone();

            // Each surviving sub-batch is cached inside the handler, so
            // a retried attempt only re-sends what actually failed.
            let result = batch::process(sub_batches, &options, move |chunk| {
                let translator = Arc::clone(&translator);
                let cache = Arc::clone(&cache);
                let target_language = target_language.clone();
                let model = model.clone();
                let done = Arc::clone(&done);
                let progress_handle = progress_handle.clone();
                async move {
                    let texts: Vec<String> = chunk
                        .iter()
                        .map(|(_, item)| item.original_text.clone())
                        .collect();
                    let translated = translator
                        .translate_batch(&texts, &target_language, model.as_deref())
                        .await
                        .map_err(|e| e.to_string())?;

                    let finished = done.fetch_add(chunk.len(), Ordering::SeqCst) + chunk.len();
                    progress_handle.report(
                        percent(finished, total),
                        format!("Translated {} of {} items", finished, total),
                    );

                    let pairs: Vec<(usize, TranslationItem, String)> = chunk
                        .into_iter()
                        .zip(translated)
                        .map(|((index, item), text)| {
                            cache.set(&cache_key(&item.original_text, &target_language), &text);
                            (index, item, text)
                        })
                        .collect();
                    Ok::<_, String>(pairs)
                }
            })
            .await
            .map_err(|e| ExecuteError::Transient(e.to_string()))?;

            for (_, pairs) in result.successful {
                for (index, item, translated_text) in pairs {
                    translations[index] = Some(TranslatedItem {
                        id: item.id,
                        original_text: item.original_text,
                        translated_text,
                        cached: false,
                    });
                }
            }
        }

        let translations: Vec<TranslatedItem> = translations
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| {
                    ExecuteError::Transient(format!("item {} was never translated", index))
                })
            })
            .collect::<Result<_, _>>()?;

        Ok(TranslationOutcome {
            translations,
            cached_count,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done * 100) / total).min(100) as u8
}

#[async_trait]
impl JobExecutor for TranslateExecutor {
    fn kind(&self) -> JobKind {
        JobKind::Translate
    }

    async fn execute(
        &self,
        job: &JobRecord,
        progress: &ProgressHandle,
    ) -> Result<serde_json::Value, ExecuteError> {
        let payload: TranslationPayload = serde_json::from_value(job.payload.clone())
            .map_err(|e| ExecuteError::Validation(format!("invalid translate payload: {}", e)))?;

        let outcome = self.run(&payload, progress).await?;
        serde_json::to_value(&outcome)
            .map_err(|e| ExecuteError::Transient(format!("failed to serialize result: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TranslateError;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Uppercases input and counts calls; can fail for marked texts.
    struct FakeTranslator {
        calls: Mutex<Vec<Vec<String>>>,
        fail_on: Option<String>,
    }

    impl FakeTranslator {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing_on(text: &str) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                fail_on: Some(text.to_string()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Translator for FakeTranslator {
        async fn translate_batch(
            &self,
            texts: &[String],
            _target_language: &str,
            _model: Option<&str>,
        ) -> Result<Vec<String>, TranslateError> {
            self.calls.lock().unwrap().push(texts.to_vec());
            if let Some(bad) = &self.fail_on {
                if texts.iter().any(|t| t == bad) {
                    return Err(TranslateError::Request("simulated outage".to_string()));
                }
            }
            Ok(texts.iter().map(|t| t.to_uppercase()).collect())
        }
    }

    fn item(id: &str, text: &str) -> TranslationItem {
        TranslationItem {
            id: id.to_string(),
            original_text: text.to_string(),
        }
    }

    fn executor(translator: Arc<dyn Translator>) -> TranslateExecutor {
        let cache = Arc::new(TranslationCache::new(
            None,
            Duration::from_secs(3600),
            1000,
        ));
        TranslateExecutor::new(
            translator,
            cache,
            TranslationConfig {
                sub_batch_size: 2,
                item_concurrency: 2,
                ..Default::default()
            },
        )
    }

    fn payload(items: Vec<TranslationItem>) -> TranslationPayload {
        TranslationPayload {
            items,
            target_language: "ja".to_string(),
            model: None,
        }
    }

    #[tokio::test]
    async fn test_translates_in_order_with_sub_batches() {
        let translator = Arc::new(FakeTranslator::new());
        let executor = executor(translator.clone());
        let progress = ProgressHandle::detached("job-1", JobKind::Translate);

        let outcome = executor
            .run(
                &payload(vec![
                    item("1:1", "hello"),
                    item("1:2", "world"),
                    item("2:1", "again"),
                ]),
                &progress,
            )
            .await
            .unwrap();

        assert_eq!(outcome.cached_count, 0);
        assert_eq!(outcome.translations.len(), 3);
        assert_eq!(outcome.translations[0].id, "1:1");
        assert_eq!(outcome.translations[0].translated_text, "HELLO");
        assert!(!outcome.translations[0].cached);
        assert_eq!(outcome.translations[2].translated_text, "AGAIN");
        // 3 items with sub_batch_size 2 → two translator calls.
        assert_eq!(translator.call_count(), 2);
    }

    #[tokio::test]
    async fn test_second_run_is_fully_cached() {
        let translator = Arc::new(FakeTranslator::new());
        let executor = executor(translator.clone());
        let progress = ProgressHandle::detached("job-1", JobKind::Translate);
        let payload = payload(vec![item("1:1", "Hello")]);

        let first = executor.run(&payload, &progress).await.unwrap();
        assert!(!first.translations[0].cached);

        let second = executor.run(&payload, &progress).await.unwrap();
        assert!(second.translations[0].cached);
        assert_eq!(second.cached_count, 1);
        assert_eq!(second.translations[0].translated_text, "HELLO");
        // The second run never reached the translator.
        assert_eq!(translator.call_count(), 1);
    }

    #[tokio::test]
    async fn test_sub_batch_failure_fails_the_attempt() {
        let translator = Arc::new(FakeTranslator::failing_on("broken"));
        let executor = executor(translator.clone());
        let progress = ProgressHandle::detached("job-1", JobKind::Translate);

        let err = executor
            .run(
                &payload(vec![
                    item("1:1", "fine"),
                    item("1:2", "also fine"),
                    item("2:1", "broken"),
                ]),
                &progress,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExecuteError::Transient(_)));

        // The surviving sub-batch was cached, so a retry only re-sends
        // the failed one.
        let calls_after_first = translator.call_count();
        assert_eq!(calls_after_first, 2);
    }

    #[tokio::test]
    async fn test_empty_target_language_is_validation_error() {
        let executor = executor(Arc::new(FakeTranslator::new()));
        let progress = ProgressHandle::detached("job-1", JobKind::Translate);

        let mut bad = payload(vec![item("1:1", "hello")]);
        bad.target_language = "  ".to_string();

        let err = executor.run(&bad, &progress).await.unwrap_err();
        assert!(matches!(err, ExecuteError::Validation(_)));
    }

    #[tokio::test]
    async fn test_empty_payload_completes() {
        let executor = executor(Arc::new(FakeTranslator::new()));
        let progress = ProgressHandle::detached("job-1", JobKind::Translate);

        let outcome = executor.run(&payload(vec![]), &progress).await.unwrap();
        assert!(outcome.translations.is_empty());
        assert_eq!(outcome.cached_count, 0);
    }
}
