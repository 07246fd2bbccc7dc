mod common;

use std::{collections::HashSet, fs, sync::Arc, time::Duration, time::SystemTime};

use axum::http::StatusCode;
use bytes::Bytes;
use derivo::{
    application::ports::{Derivative, StorageBackend},
    infra::reaper::StorageReaper,
};
use metrics_util::debugging::DebuggingRecorder;
use tokio::sync::Semaphore;

use common::{FakeTransformer, Harness, body_text, source};

const IMAGE: &str = "https://x/metrics.jpg";
const STORED: &str = "https://x/already-stored.jpg";

#[tokio::test]
async fn pipeline_emits_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let gate = Arc::new(Semaphore::new(0));
    let harness = Harness::new(FakeTransformer {
        failing_rules: HashSet::from(["596x450".to_string()]),
        gate: Some(gate.clone()),
        ..Default::default()
    });

    // miss + fallback + background fill held at the gate
    assert_eq!(harness.get(IMAGE, "thumb").await.status(), StatusCode::FOUND);

    // rejected while the fill is running
    let response = harness.put(IMAGE).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "url is being processed");

    gate.add_permits(3);
    harness.settle(IMAGE).await;

    // hit
    assert_eq!(
        harness.get(IMAGE, "thumb").await.status(),
        StatusCode::MOVED_PERMANENTLY
    );
    assert_eq!(harness.delete(IMAGE).await.status(), StatusCode::OK);

    // stored out of band: confirmed by the existence check
    let stored = harness
        .backend
        .store(
            "thumb",
            &source(STORED),
            Derivative::from_bytes(Bytes::from_static(b"jpg"), "image/jpeg"),
        )
        .await
        .expect("store");
    assert_eq!(
        harness.get(STORED, "thumb").await.status(),
        StatusCode::MOVED_PERMANENTLY
    );
    harness.settle(STORED).await;

    // aged out by the reaper
    fs::File::options()
        .write(true)
        .open(&stored.path)
        .expect("open stored derivative")
        .set_modified(SystemTime::now() - Duration::from_secs(7_200))
        .expect("set mtime");
    let reaper = StorageReaper::new(harness.dir.path(), 3_600, Duration::from_secs(3_600));
    assert_eq!(reaper.sweep().await.removed, 1);

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(key, _, _, _)| key.key().name().to_string())
        .collect();

    for expected in [
        "derivo_cache_hit_total",
        "derivo_cache_miss_total",
        "derivo_probe_hit_total",
        "derivo_materialize_total",
        "derivo_materialize_ms",
        "derivo_invalidate_total",
        "derivo_inflight_rejected_total",
        "derivo_reaper_removed_total",
    ] {
        assert!(names.contains(expected), "missing metric {expected}: {names:?}");
    }
}
