#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, Response},
};
use bytes::Bytes;
use derivo::{
    application::{
        derivatives::DerivativeService,
        inflight::InFlight,
        materialize::Materializer,
        ports::{Derivative, TransformError, Transformer},
    },
    cache::{MemoryUrlCache, MemoryUrlCacheConfig},
    domain::{presets::PresetTable, source::SourceUrl, whitelist::Whitelist},
    infra::{
        http::{DispatcherState, GuardianState, build_dispatcher_router, build_guardian_router},
        storage::fs::FsBackend,
    },
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tower::ServiceExt;

pub const PUBLIC_BASE: &str = "http://127.0.0.1:9090/derivatives";

/// Transformer double: echoes `rule|url`, fails configured rules and can be
/// held closed until the test releases it.
#[derive(Default)]
pub struct FakeTransformer {
    pub failing_rules: HashSet<String>,
    pub gate: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
}

impl FakeTransformer {
    pub fn failing(rules: &[&str]) -> Self {
        Self {
            failing_rules: rules.iter().map(|rule| rule.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transformer for FakeTransformer {
    async fn transform(
        &self,
        rule: &str,
        source: &SourceUrl,
    ) -> Result<Derivative, TransformError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = self.gate.as_ref() {
            let _permit = gate
                .acquire()
                .await
                .map_err(|err| TransformError::Request(err.to_string()))?;
        }
        if self.failing_rules.contains(rule) {
            return Err(TransformError::Unprocessable(format!(
                "rule {rule} cannot be applied"
            )));
        }
        Ok(Derivative::from_bytes(
            Bytes::from(format!("{rule}|{source}")),
            "image/jpeg",
        ))
    }
}

pub fn presets() -> PresetTable {
    PresetTable::new(BTreeMap::from([
        ("large".to_string(), "596x450".to_string()),
        ("small".to_string(), "360x216".to_string()),
        ("thumb".to_string(), "170x230".to_string()),
    ]))
    .expect("valid presets")
}

pub fn source(raw: &str) -> SourceUrl {
    SourceUrl::parse(raw).expect("valid source url")
}

pub struct Harness {
    pub dir: TempDir,
    pub backend: Arc<FsBackend>,
    pub cache: Arc<MemoryUrlCache>,
    pub transformer: Arc<FakeTransformer>,
    pub service: Arc<DerivativeService>,
    pub dispatcher: Router,
    pub guardian: Router,
}

impl Harness {
    pub fn new(transformer: FakeTransformer) -> Self {
        Self::with_whitelist(transformer, Whitelist::default())
    }

    pub fn with_whitelist(transformer: FakeTransformer, whitelist: Whitelist) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let backend = Arc::new(FsBackend::new(dir.path(), PUBLIC_BASE).expect("fs backend"));
        let cache = Arc::new(MemoryUrlCache::new(&MemoryUrlCacheConfig::default()));
        let transformer = Arc::new(transformer);

        let materializer = Materializer::new(
            presets(),
            transformer.clone(),
            backend.clone(),
            cache.clone(),
        );
        let service = Arc::new(DerivativeService::new(
            materializer,
            backend.clone(),
            cache.clone(),
            InFlight::new(),
        ));

        let dispatcher = build_dispatcher_router(DispatcherState {
            derivatives: service.clone(),
            whitelist: Arc::new(whitelist),
            files: Some(backend.clone()),
        });
        let guardian = build_guardian_router(GuardianState {
            derivatives: service.clone(),
        });

        Self {
            dir,
            backend,
            cache,
            transformer,
            service,
            dispatcher,
            guardian,
        }
    }

    pub async fn get(&self, url: &str, preset: &str) -> Response<Body> {
        let uri = format!("/?url={}&preset={}", encode(url), encode(preset));
        send(&self.dispatcher, Method::GET, &uri).await
    }

    pub async fn put(&self, url: &str) -> Response<Body> {
        send(&self.guardian, Method::PUT, &format!("/?url={}", encode(url))).await
    }

    pub async fn delete(&self, url: &str) -> Response<Body> {
        send(&self.guardian, Method::DELETE, &format!("/?url={}", encode(url))).await
    }

    /// Wait for any background run on `url` to finish.
    pub async fn settle(&self, url: &str) {
        let source = source(url);
        wait_until(|| !self.service.inflight().is_in_flight(&source)).await;
    }
}

pub async fn send(router: &Router, method: Method, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond")
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get("location")
        .expect("location header")
        .to_str()
        .expect("ascii location")
        .to_string()
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should hold before timeout");
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
