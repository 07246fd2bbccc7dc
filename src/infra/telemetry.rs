use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "derivo_cache_hit_total",
            Unit::Count,
            "Total number of URL cache hits."
        );
        describe_counter!(
            "derivo_cache_miss_total",
            Unit::Count,
            "Total number of URL cache misses, expired entries included."
        );
        describe_counter!(
            "derivo_probe_hit_total",
            Unit::Count,
            "Cache misses answered by a successful storage existence probe."
        );
        describe_counter!(
            "derivo_materialize_total",
            Unit::Count,
            "Materialization runs, labelled by result."
        );
        describe_counter!(
            "derivo_invalidate_total",
            Unit::Count,
            "Invalidation runs, labelled by result."
        );
        describe_counter!(
            "derivo_inflight_rejected_total",
            Unit::Count,
            "Runs rejected because the URL was already being processed."
        );
        describe_counter!(
            "derivo_reaper_removed_total",
            Unit::Count,
            "Derivative files removed by the storage reaper."
        );
        describe_histogram!(
            "derivo_materialize_ms",
            Unit::Milliseconds,
            "Wall time of a full materialization run in milliseconds."
        );
    });
}
