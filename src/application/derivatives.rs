//! Read-path decision and guarded eager operations for derivatives.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::{
    aggregate::AggregateError,
    inflight::{InFlight, InFlightError},
    invalidate::Invalidator,
    materialize::Materializer,
    ports::{StorageBackend, UrlCache},
};
use crate::cache::CacheKey;
use crate::domain::{
    presets::{Preset, PresetTable},
    source::SourceUrl,
};

const TARGET: &str = "derivo::derivatives";

/// Outcome of the read path for one `(source, preset)` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServeDecision {
    /// The URL cache knows the derivative's address.
    Cached { location: String },
    /// The derivative was found in storage; its cache entry is being filled.
    Confirmed { location: String },
    /// The derivative is not available; the client gets the original.
    Fallback { location: String, fill: Fill },
}

/// Whether a background materialization was started by a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fill {
    Spawned,
    AlreadyInFlight,
}

impl ServeDecision {
    pub fn location(&self) -> &str {
        match self {
            ServeDecision::Cached { location }
            | ServeDecision::Confirmed { location }
            | ServeDecision::Fallback { location, .. } => location,
        }
    }

    /// Permanent redirects are only issued for confirmed derivatives.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, ServeDecision::Fallback { .. })
    }
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    InFlight(#[from] InFlightError),
    #[error(transparent)]
    Failed(#[from] AggregateError),
    #[error("guarded run aborted: {0}")]
    Aborted(String),
}

/// Coordinates the URL cache, the storage backend and the in-flight set.
pub struct DerivativeService {
    presets: PresetTable,
    backend: Arc<dyn StorageBackend>,
    cache: Arc<dyn UrlCache>,
    inflight: InFlight,
    materializer: Materializer,
    invalidator: Invalidator,
}

impl DerivativeService {
    pub fn new(
        materializer: Materializer,
        backend: Arc<dyn StorageBackend>,
        cache: Arc<dyn UrlCache>,
        inflight: InFlight,
    ) -> Self {
        let presets = materializer.presets().clone();
        let invalidator = Invalidator::new(presets.clone(), backend.clone(), cache.clone());
        Self {
            presets,
            backend,
            cache,
            inflight,
            materializer,
            invalidator,
        }
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    pub fn inflight(&self) -> &InFlight {
        &self.inflight
    }

    /// Decide how to answer a read request.
    ///
    /// Never waits on transformation: a miss that storage cannot confirm is
    /// answered with the original URL and filled in the background.
    pub async fn resolve(&self, source: &SourceUrl, preset: &Preset) -> ServeDecision {
        let key = CacheKey::new(self.backend.scheme(), preset.name(), source.as_str());

        match self.cache.lookup(&key).await {
            Ok(Some(location)) => {
                debug!(
                    target = TARGET,
                    url = %source,
                    preset = preset.name(),
                    address = %location,
                    result = "cache_hit",
                    "cached derivative found",
                );
                return ServeDecision::Cached { location };
            }
            Ok(None) => {}
            Err(err) => {
                warn!(
                    target = TARGET,
                    url = %source,
                    preset = preset.name(),
                    error = %err,
                    "url cache lookup failed; treating as miss",
                );
            }
        }

        match self.backend.exists(preset.name(), source).await {
            Ok(probe) if probe.present => {
                counter!("derivo_probe_hit_total").increment(1);
                let location = probe.address.url;
                self.spawn_cache_fill(key, preset, source);
                debug!(
                    target = TARGET,
                    url = %source,
                    preset = preset.name(),
                    address = %location,
                    result = "probe_hit",
                    "derivative confirmed in storage",
                );
                ServeDecision::Confirmed { location }
            }
            Ok(_) => {
                let fill = self.spawn_fill(source);
                ServeDecision::Fallback {
                    location: source.to_string(),
                    fill,
                }
            }
            Err(err) => {
                warn!(
                    target = TARGET,
                    url = %source,
                    preset = preset.name(),
                    error = %err,
                    "existence probe failed",
                );
                let fill = self.spawn_fill(source);
                ServeDecision::Fallback {
                    location: source.to_string(),
                    fill,
                }
            }
        }
    }

    /// Materialize every preset now, rejecting overlapping runs for the URL.
    ///
    /// The run and its guard live in their own task: dropping the returned
    /// future (a client hanging up) leaves the URL guarded until every
    /// branch has finished.
    pub async fn materialize(&self, source: &SourceUrl) -> Result<Duration, OperationError> {
        let guard = self.inflight.try_acquire(source)?;
        let materializer = self.materializer.clone();
        let source = source.clone();
        let run = tokio::spawn(async move {
            let _guard = guard;
            let started_at = Instant::now();
            materializer.materialize_all(&source).await?;
            Ok::<_, OperationError>(started_at.elapsed())
        });
        join_guarded(run).await
    }

    /// Remove every preset's derivative, rejecting overlapping runs for the URL.
    pub async fn invalidate(&self, source: &SourceUrl) -> Result<Duration, OperationError> {
        let guard = self.inflight.try_acquire(source)?;
        let invalidator = self.invalidator.clone();
        let source = source.clone();
        let run = tokio::spawn(async move {
            let _guard = guard;
            let started_at = Instant::now();
            invalidator.invalidate(&source).await?;
            Ok::<_, OperationError>(started_at.elapsed())
        });
        join_guarded(run).await
    }

    /// Start a detached materialization unless one is already running.
    ///
    /// The task owns its in-flight guard and is not tied to any request, so
    /// it keeps running after the response has been sent.
    pub fn spawn_fill(&self, source: &SourceUrl) -> Fill {
        let guard = match self.inflight.try_acquire(source) {
            Ok(guard) => guard,
            Err(_) => {
                debug!(target = TARGET, url = %source, "materialization already in flight");
                return Fill::AlreadyInFlight;
            }
        };

        let materializer = self.materializer.clone();
        let source = source.clone();
        tokio::spawn(async move {
            let _guard = guard;
            match materializer.materialize_all(&source).await {
                Ok(()) => info!(
                    target = TARGET,
                    url = %source,
                    "background materialization completed",
                ),
                Err(err) => warn!(
                    target = TARGET,
                    url = %source,
                    failed = err.failures().len(),
                    error = %err,
                    "background materialization failed"
                ),
            }
        });
        Fill::Spawned
    }

    /// Record a probed derivative in the URL cache without delaying the
    /// response.
    ///
    /// The fill takes the URL's guard and probes again before writing, so it
    /// cannot re-insert an entry that a concurrent invalidation just cleared.
    /// While another run holds the guard the fill is skipped.
    fn spawn_cache_fill(&self, key: CacheKey, preset: &Preset, source: &SourceUrl) {
        let Ok(guard) = self.inflight.try_acquire(source) else {
            debug!(
                target = TARGET,
                url = %source,
                preset = preset.name(),
                "url busy; skipping cache fill",
            );
            return;
        };

        let backend = self.backend.clone();
        let cache = self.cache.clone();
        let preset = preset.name().to_string();
        let source = source.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let address = match backend.exists(&preset, &source).await {
                Ok(probe) if probe.present => probe.address.url,
                Ok(_) => return,
                Err(err) => {
                    warn!(
                        target = TARGET,
                        url = %source,
                        preset = %preset,
                        error = %err,
                        "existence re-check failed; skipping cache fill",
                    );
                    return;
                }
            };
            if let Err(err) = cache.set(key, address).await {
                warn!(
                    target = TARGET,
                    url = %source,
                    preset = %preset,
                    error = %err,
                    "failed to record probed derivative in url cache",
                );
            }
        });
    }
}

async fn join_guarded(
    run: tokio::task::JoinHandle<Result<Duration, OperationError>>,
) -> Result<Duration, OperationError> {
    match run.await {
        Ok(outcome) => outcome,
        Err(err) => Err(OperationError::Aborted(err.to_string())),
    }
}
