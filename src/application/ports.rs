//! Capability traits for the collaborators the derivative pipeline drives.
//!
//! The transformer, the physical storage backend and the logical URL cache
//! are all external services from the pipeline's point of view: each one is
//! assumed safe for concurrent use and is only reached through these traits.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use thiserror::Error;

use crate::cache::CacheKey;
use crate::domain::source::SourceUrl;

/// Byte stream of a transformed image.
pub type DerivativeStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

/// Output of transforming a source under one preset. Owned by the branch that
/// produced it until it is handed to [`StorageBackend::store`].
pub struct Derivative {
    pub content: DerivativeStream,
    pub size: u64,
    pub content_type: String,
}

impl Derivative {
    pub fn new(content: DerivativeStream, size: u64, content_type: impl Into<String>) -> Self {
        Self {
            content,
            size,
            content_type: content_type.into(),
        }
    }

    /// Wrap a fully-buffered payload.
    pub fn from_bytes(data: Bytes, content_type: impl Into<String>) -> Self {
        let size = data.len() as u64;
        let content = futures::stream::once(async move { Ok(data) }).boxed();
        Self::new(content, size, content_type)
    }
}

impl fmt::Debug for Derivative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivative")
            .field("size", &self.size)
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Physical location of a derivative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivativeAddress {
    /// Object key or absolute file path.
    pub path: String,
    /// Address clients are redirected to.
    pub url: String,
}

/// Result of a lightweight existence probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub present: bool,
    pub address: DerivativeAddress,
}

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("transformer request failed: {0}")]
    Request(String),
    #[error("transformer returned status {status}: {detail}")]
    Upstream { status: u16, detail: String },
    #[error("transformer response is unusable: {0}")]
    Unprocessable(String),
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("object store request failed: {0}")]
    Request(String),
    #[error("object store answered {status} to {op} {path}")]
    Status {
        op: &'static str,
        path: String,
        status: u16,
    },
    #[error("derivative stream failed: {0}")]
    Stream(String),
    #[error("derivative declared {declared} bytes but produced {actual}")]
    SizeMismatch { declared: u64, actual: u64 },
    #[error("invalid stored path")]
    InvalidPath,
}

#[derive(Debug, Error)]
#[error("url cache error: {message}")]
pub struct CacheError {
    pub message: String,
}

impl CacheError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Produces derivatives from a source image and an opaque rule.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(
        &self,
        rule: &str,
        source: &SourceUrl,
    ) -> Result<Derivative, TransformError>;
}

/// Physical storage of derivatives. Every operation concerns exactly one
/// preset; failures never affect other presets.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Scheme identifier mixed into cache keys (`fs`, `s3`).
    fn scheme(&self) -> &'static str;

    /// Deterministic address for `(preset, source)`; independent of any
    /// mutable state.
    fn locate(&self, preset: &str, source: &SourceUrl) -> DerivativeAddress;

    /// Check whether the derivative exists without fetching its bytes.
    async fn exists(&self, preset: &str, source: &SourceUrl) -> Result<Probe, StorageError>;

    /// Durably write the derivative at [`StorageBackend::locate`]. Re-storing
    /// the same derivative replaces it in place.
    async fn store(
        &self,
        preset: &str,
        source: &SourceUrl,
        derivative: Derivative,
    ) -> Result<DerivativeAddress, StorageError>;

    /// Remove the derivative. Removing an absent derivative succeeds.
    async fn remove(&self, preset: &str, source: &SourceUrl) -> Result<(), StorageError>;
}

/// Logical cache of confirmed derivative addresses.
#[async_trait]
pub trait UrlCache: Send + Sync {
    async fn lookup(&self, key: &CacheKey) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: CacheKey, address: String) -> Result<(), CacheError>;
    async fn delete(&self, key: &CacheKey) -> Result<(), CacheError>;
}
