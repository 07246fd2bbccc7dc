//! Fan-out materialization of every preset for one source image.

use std::{sync::Arc, time::Instant};

use futures::future::join_all;
use metrics::{counter, histogram};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::aggregate::{AggregateError, FailureCollector, FanOut};
use crate::application::ports::{
    DerivativeAddress, StorageBackend, StorageError, TransformError, Transformer, UrlCache,
};
use crate::cache::CacheKey;
use crate::domain::{
    presets::{Preset, PresetTable},
    source::SourceUrl,
};

const TARGET: &str = "derivo::materialize";

#[derive(Debug, Error)]
enum BranchError {
    #[error("failed to transform: {0}")]
    Transform(#[from] TransformError),
    #[error("failed to store: {0}")]
    Store(#[from] StorageError),
}

/// Transforms and stores every preset of a source concurrently.
///
/// Each preset is an independent branch: transform, then store, then record
/// the address in the URL cache. A branch failure never cancels its siblings
/// and nothing is rolled back; the call returns once every branch finished.
#[derive(Clone)]
pub struct Materializer {
    presets: PresetTable,
    transformer: Arc<dyn Transformer>,
    backend: Arc<dyn StorageBackend>,
    cache: Arc<dyn UrlCache>,
}

impl Materializer {
    pub fn new(
        presets: PresetTable,
        transformer: Arc<dyn Transformer>,
        backend: Arc<dyn StorageBackend>,
        cache: Arc<dyn UrlCache>,
    ) -> Self {
        Self {
            presets,
            transformer,
            backend,
            cache,
        }
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    pub async fn materialize_all(&self, source: &SourceUrl) -> Result<(), AggregateError> {
        let started_at = Instant::now();
        info!(
            target = TARGET,
            url = %source,
            presets = self.presets.len(),
            "materializing derivatives",
        );

        let branches = self.presets.iter().map(|preset| {
            let name = preset.name().to_string();
            let this = self.clone();
            let preset = preset.clone();
            let source = source.clone();
            let handle = tokio::spawn(async move { this.materialize_one(&preset, &source).await });
            async move { (name, handle.await) }
        });

        let mut failures = FailureCollector::new(FanOut::Materialize);
        for (preset, outcome) in join_all(branches).await {
            match outcome {
                Ok(Ok(address)) => {
                    debug!(
                        target = TARGET,
                        url = %source,
                        preset = %preset,
                        address = %address.url,
                        "derivative stored",
                    );
                }
                Ok(Err(err)) => {
                    warn!(
                        target = TARGET,
                        url = %source,
                        preset = %preset,
                        error = %err,
                        "derivative failed",
                    );
                    failures.push(preset, err.to_string());
                }
                Err(join_err) => {
                    warn!(
                        target = TARGET,
                        url = %source,
                        preset = %preset,
                        error = %join_err,
                        "derivative task aborted",
                    );
                    failures.push(preset, format!("task aborted: {join_err}"));
                }
            }
        }

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!("derivo_materialize_ms").record(elapsed_ms as f64);

        let result = failures.finish();
        let label = if result.is_ok() { "ok" } else { "error" };
        counter!("derivo_materialize_total", "result" => label).increment(1);
        info!(
            target = TARGET,
            url = %source,
            result = label,
            elapsed_ms,
            "materialization finished",
        );
        result
    }

    async fn materialize_one(
        &self,
        preset: &Preset,
        source: &SourceUrl,
    ) -> Result<DerivativeAddress, BranchError> {
        debug!(
            target = TARGET,
            url = %source,
            preset = preset.name(),
            rule = preset.rule(),
            "applying transformation",
        );
        let derivative = self.transformer.transform(preset.rule(), source).await?;
        let address = self.backend.store(preset.name(), source, derivative).await?;

        // The derivative is durable at this point; a cache failure only costs
        // a probe on the next request.
        let key = CacheKey::new(self.backend.scheme(), preset.name(), source.as_str());
        if let Err(err) = self.cache.set(key, address.url.clone()).await {
            warn!(
                target = TARGET,
                url = %source,
                preset = preset.name(),
                error = %err,
                "failed to record derivative in url cache",
            );
        }

        Ok(address)
    }
}
