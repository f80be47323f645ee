//! Periodic cleanup scheduler.
//!
//! One loop reclaims everything with a lifetime: expired upload
//! sessions, stale registry entries, expired cache rows, and old
//! terminal queue rows. Supports manual trigger via broadcast channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::registry::InMemoryRegistry;
use crate::store::{TranslationCache, WorkStore};
use crate::upload::UploadManager;

/// How long terminal queue rows are kept before deletion.
fn job_retention() -> chrono::Duration {
    chrono::Duration::hours(24)
}

pub struct Sweeper {
    registry: Arc<InMemoryRegistry>,
    uploads: Arc<UploadManager>,
    cache: Arc<TranslationCache>,
    store: Option<WorkStore>,
    interval: Duration,
    shutdown: Arc<AtomicBool>,
}

impl Sweeper {
    pub fn new(
        registry: Arc<InMemoryRegistry>,
        uploads: Arc<UploadManager>,
        cache: Arc<TranslationCache>,
        store: Option<WorkStore>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            uploads,
            cache,
            store,
            interval,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the sweep loop on the runtime.
    /// Accepts a trigger receiver for manual sweep requests.
    pub fn start(&self, mut trigger_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let registry = Arc::clone(&self.registry);
        let uploads = Arc::clone(&self.uploads);
        let cache = Arc::clone(&self.cache);
        let store = self.store.clone();
        let shutdown = Arc::clone(&self.shutdown);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(interval);
            interval_timer.tick().await; // skip immediate first tick

            loop {
                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                tokio::select! {
                    _ = interval_timer.tick() => {},
                    Ok(()) = trigger_rx.recv() => {
                        log::info!("Manual sweep triggered");
                    },
                }

                if shutdown.load(Ordering::Acquire) {
                    break;
                }

                run_sweep(&registry, &uploads, &cache, store.as_ref()).await;
            }
        })
    }

    /// Signals the sweeper to stop.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Release);
    }
}

async fn run_sweep(
    registry: &InMemoryRegistry,
    uploads: &UploadManager,
    cache: &TranslationCache,
    store: Option<&WorkStore>,
) {
    let sessions = uploads.purge_expired().await;
    let registry_entries = registry.sweep();
    let cache_rows = cache.purge_expired();
    let queue_rows = match store {
        Some(store) => match store.purge_terminal_older_than(job_retention()) {
            Ok(removed) => removed,
            Err(e) => {
                log::error!("Queue sweep failed: {}", e);
                0
            }
        },
        None => 0,
    };

    if sessions + registry_entries + cache_rows + queue_rows > 0 {
        log::info!(
            "Sweep removed {} upload session(s), {} registry entries, {} cache rows, {} queue rows",
            sessions,
            registry_entries,
            cache_rows,
            queue_rows
        );
    }
}
