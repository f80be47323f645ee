//! Partial-success batch processing.
//!
//! Runs an async handler over a set of items with bounded concurrency,
//! collecting per-item successes and failures instead of aborting on the
//! first error. Callers gate the aggregate result with a minimum success
//! rate. `try_with_fallbacks` runs ordered recovery strategies for the
//! cases where a whole batch has to succeed one way or another.

use std::future::Future;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};

use crate::error::BatchError;

/// Tuning for a single batch run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Keep going after an item fails instead of short-circuiting.
    pub continue_on_error: bool,
    /// Fraction of items (0.0 to 1.0) that must succeed for the run to
    /// count as successful. 0.0 accepts any outcome.
    pub min_success_rate: f64,
    /// Maximum number of items in flight at once.
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            continue_on_error: true,
            min_success_rate: 0.0,
            concurrency: 5,
        }
    }
}

/// One failed item, keyed by its position in the input.
#[derive(Debug)]
pub struct BatchFailure<T> {
    pub index: usize,
    pub item: T,
    pub error: String,
}

/// Aggregate outcome of a batch run.
#[derive(Debug)]
pub struct BatchResult<T, U> {
    /// Successful `(index, output)` pairs, ordered by input index.
    pub successful: Vec<(usize, U)>,
    pub failed: Vec<BatchFailure<T>>,
    pub total: usize,
}

impl<T, U> BatchResult<T, U> {
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        self.successful.len() as f64 / self.total as f64
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Consumes the result, returning outputs in input order.
    pub fn into_outputs(self) -> Vec<U> {
        self.successful.into_iter().map(|(_, value)| value).collect()
    }
}

enum ItemOutcome<T, U> {
    Ok(usize, U),
    Err(usize, T, String),
}

/// Processes `items` through `handler` with at most
/// `options.concurrency` in flight.
///
/// With `continue_on_error` every item runs and failures are collected;
/// without it the first failure stops the run and cancels whatever is
/// still in flight. The run errors with `BelowMinimumSuccessRate` when
/// the success rate lands under `min_success_rate`.
pub async fn process<T, U, F, Fut, E>(
    items: Vec<T>,
    options: &BatchOptions,
    handler: F,
) -> Result<BatchResult<T, U>, BatchError>
where
    T: Clone,
    F: Fn(T) -> Fut,
    Fut: Future<Output = Result<U, E>>,
    E: std::fmt::Display,
{
    let total = items.len();
    let concurrency = options.concurrency.max(1);

    let mut outcomes = stream::iter(items.into_iter().enumerate().map(|(index, item)| {
        let fut = handler(item.clone());
        async move {
            match fut.await {
                Ok(value) => ItemOutcome::Ok(index, value),
                Err(e) => ItemOutcome::Err(index, item, e.to_string()),
            }
        }
    }))
    .buffer_unordered(concurrency);

    let mut successful = Vec::new();
    let mut failed = Vec::new();

    while let Some(outcome) = outcomes.next().await {
        match outcome {
            ItemOutcome::Ok(index, value) => successful.push((index, value)),
            ItemOutcome::Err(index, item, error) => {
                log::warn!("Batch item {} failed: {}", index, error);
                failed.push(BatchFailure { index, item, error });
                if !options.continue_on_error {
                    break;
                }
            }
        }
    }
    drop(outcomes);

    if !options.continue_on_error {
        if let Some(first) = failed.first() {
            return Err(BatchError::ItemFailed {
                index: first.index,
                error: first.error.clone(),
            });
        }
    }

    successful.sort_by_key(|(index, _)| *index);
    failed.sort_by_key(|failure| failure.index);

    let result = BatchResult {
        successful,
        failed,
        total,
    };

    let rate = result.success_rate();
    if rate < options.min_success_rate {
        return Err(BatchError::BelowMinimumSuccessRate {
            rate,
            minimum: options.min_success_rate,
            failed: result.failed.len(),
            total: result.total,
            details: failure_details(&result.failed),
        });
    }

    Ok(result)
}

/// The per-item causes behind a failed run, capped so a large batch does
/// not flood the job's error column.
fn failure_details<T>(failed: &[BatchFailure<T>]) -> String {
    const SHOWN: usize = 5;

    let mut details: Vec<String> = failed
        .iter()
        .take(SHOWN)
        .map(|f| format!("item {}: {}", f.index, f.error))
        .collect();
    if failed.len() > SHOWN {
        details.push(format!("and {} more", failed.len() - SHOWN));
    }
    details.join("; ")
}

/// A named recovery strategy with an optional time limit.
pub struct Fallback<U> {
    pub name: String,
    pub timeout: Option<Duration>,
    pub run: Box<dyn Fn() -> futures_util::future::BoxFuture<'static, Result<U, String>> + Send + Sync>,
}

impl<U> Fallback<U> {
    pub fn new<F, Fut>(name: impl Into<String>, timeout: Option<Duration>, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<U, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            timeout,
            run: Box::new(move || Box::pin(f())),
        }
    }
}

/// Tries strategies in order, returning the first success. When all of
/// them fail the combined error lists every strategy's failure.
pub async fn try_with_fallbacks<U>(strategies: Vec<Fallback<U>>) -> Result<U, BatchError> {
    let mut details = Vec::with_capacity(strategies.len());

    for strategy in &strategies {
        let attempt = (strategy.run)();
        let outcome = match strategy.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => Err(format!("timed out after {:?}", limit)),
            },
            None => attempt.await,
        };

        match outcome {
            Ok(value) => {
                if !details.is_empty() {
                    log::info!(
                        "Strategy '{}' succeeded after {} failed attempt(s)",
                        strategy.name,
                        details.len()
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                log::warn!("Strategy '{}' failed: {}", strategy.name, e);
                details.push(format!("{}: {}", strategy.name, e));
            }
        }
    }

    Err(BatchError::AllFallbacksFailed {
        details: details.join("; "),
    })
}
