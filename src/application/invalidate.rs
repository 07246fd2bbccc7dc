//! Fan-out invalidation of every preset for one source image.

use std::sync::Arc;

use futures::future::join_all;
use metrics::counter;
use tracing::{info, warn};

use crate::application::aggregate::{AggregateError, FailureCollector, FanOut};
use crate::application::ports::{StorageBackend, StorageError, UrlCache};
use crate::cache::CacheKey;
use crate::domain::{presets::PresetTable, source::SourceUrl};

const TARGET: &str = "derivo::invalidate";

/// Removes every preset's derivative and clears its cache entry.
///
/// Cache entries are cleared whatever the storage outcome: a missing entry
/// only costs a re-materialization, a stale one serves the wrong image.
#[derive(Clone)]
pub struct Invalidator {
    presets: PresetTable,
    backend: Arc<dyn StorageBackend>,
    cache: Arc<dyn UrlCache>,
}

impl Invalidator {
    pub fn new(
        presets: PresetTable,
        backend: Arc<dyn StorageBackend>,
        cache: Arc<dyn UrlCache>,
    ) -> Self {
        Self {
            presets,
            backend,
            cache,
        }
    }

    pub async fn invalidate(&self, source: &SourceUrl) -> Result<(), AggregateError> {
        info!(target = TARGET, url = %source, "invalidating derivatives");

        let branches = self.presets.iter().map(|preset| {
            let name = preset.name().to_string();
            let this = self.clone();
            let preset = name.clone();
            let source = source.clone();
            let handle = tokio::spawn(async move { this.invalidate_one(&preset, &source).await });
            async move { (name, handle.await) }
        });

        let mut failures = FailureCollector::new(FanOut::Invalidate);
        for (preset, outcome) in join_all(branches).await {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(
                        target = TARGET,
                        url = %source,
                        preset = %preset,
                        error = %err,
                        "failed to remove derivative",
                    );
                    failures.push(preset, format!("failed to remove: {err}"));
                }
                Err(join_err) => {
                    // The branch died before it could clear its entry.
                    let key = CacheKey::new(self.backend.scheme(), &preset, source.as_str());
                    self.clear_entry(&key, source, &preset).await;
                    failures.push(preset, format!("task aborted: {join_err}"));
                }
            }
        }

        let result = failures.finish();
        let label = if result.is_ok() { "ok" } else { "error" };
        counter!("derivo_invalidate_total", "result" => label).increment(1);
        result
    }

    async fn invalidate_one(&self, preset: &str, source: &SourceUrl) -> Result<(), StorageError> {
        let removed = self.backend.remove(preset, source).await;
        let key = CacheKey::new(self.backend.scheme(), preset, source.as_str());
        self.clear_entry(&key, source, preset).await;
        removed
    }

    async fn clear_entry(&self, key: &CacheKey, source: &SourceUrl, preset: &str) {
        if let Err(err) = self.cache.delete(key).await {
            warn!(
                target = TARGET,
                url = %source,
                preset,
                error = %err,
                "failed to clear url cache entry",
            );
        }
    }
}
