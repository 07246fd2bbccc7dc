//! Object-store derivative storage over plain HTTP.
//!
//! Speaks the S3-compatible subset the pipeline needs: `HEAD` to probe,
//! `PUT` with a canned ACL to store and `DELETE` to remove. Objects are keyed
//! `<preset>/<source path>` under the configured endpoint.

use async_trait::async_trait;
use reqwest::{
    Body, Client, StatusCode,
    header::{AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, HeaderValue},
};
use tracing::debug;

use crate::application::ports::{
    Derivative, DerivativeAddress, Probe, StorageBackend, StorageError,
};
use crate::domain::source::SourceUrl;

pub const SCHEME: &str = "s3";
const ACL_HEADER: &str = "x-amz-acl";
const INDEX_KEY: &str = "index";
const TARGET: &str = "derivo::storage::object";

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub public_base_url: String,
    pub acl: String,
    pub authorization: Option<String>,
}

#[derive(Debug)]
pub struct ObjectStoreBackend {
    client: Client,
    endpoint: String,
    public_base_url: String,
    acl: HeaderValue,
    authorization: Option<HeaderValue>,
}

impl ObjectStoreBackend {
    pub fn new(config: ObjectStoreConfig) -> Result<Self, StorageError> {
        let client = Client::builder()
            .user_agent(concat!("derivo/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| StorageError::Request(err.to_string()))?;
        Self::with_client(client, config)
    }

    pub fn with_client(client: Client, config: ObjectStoreConfig) -> Result<Self, StorageError> {
        let acl = HeaderValue::from_str(&config.acl)
            .map_err(|err| StorageError::Request(format!("invalid acl header: {err}")))?;
        let authorization = config
            .authorization
            .as_deref()
            .map(HeaderValue::from_str)
            .transpose()
            .map_err(|err| StorageError::Request(format!("invalid authorization header: {err}")))?
            .map(|mut value| {
                value.set_sensitive(true);
                value
            });

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            public_base_url: config.public_base_url.trim_end_matches('/').to_string(),
            acl,
            authorization,
        })
    }

    /// Object key for a derivative: `<preset>/<source path>`.
    ///
    /// Host and query are not part of the key, so `https://a/x.jpg` and
    /// `https://b/x.jpg` address the same object even though their cache
    /// keys differ. Sources sharing a bucket must have distinct paths.
    pub fn object_key(preset: &str, source: &SourceUrl) -> String {
        let path = source.path().trim_start_matches('/');
        let path = if path.is_empty() { INDEX_KEY } else { path };
        format!("{preset}/{path}")
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{key}", self.endpoint)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.authorization.as_ref() {
            Some(value) => request.header(AUTHORIZATION, value.clone()),
            None => request,
        }
    }
}

fn request_error(err: reqwest::Error) -> StorageError {
    StorageError::Request(err.to_string())
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    fn scheme(&self) -> &'static str {
        SCHEME
    }

    fn locate(&self, preset: &str, source: &SourceUrl) -> DerivativeAddress {
        let key = Self::object_key(preset, source);
        DerivativeAddress {
            url: format!("{}/{key}", self.public_base_url),
            path: key,
        }
    }

    async fn exists(&self, preset: &str, source: &SourceUrl) -> Result<Probe, StorageError> {
        let address = self.locate(preset, source);
        let response = self
            .authorize(self.client.head(self.object_url(&address.path)))
            .send()
            .await
            .map_err(request_error)?;

        match response.status() {
            status if status.is_success() => Ok(Probe {
                present: true,
                address,
            }),
            StatusCode::NOT_FOUND => Ok(Probe {
                present: false,
                address,
            }),
            status => Err(StorageError::Status {
                op: "HEAD",
                path: address.path,
                status: status.as_u16(),
            }),
        }
    }

    async fn store(
        &self,
        preset: &str,
        source: &SourceUrl,
        derivative: Derivative,
    ) -> Result<DerivativeAddress, StorageError> {
        let address = self.locate(preset, source);
        let Derivative {
            content,
            size,
            content_type,
        } = derivative;

        let response = self
            .authorize(self.client.put(self.object_url(&address.path)))
            .header(CONTENT_LENGTH, size)
            .header(CONTENT_TYPE, content_type)
            .header(ACL_HEADER, self.acl.clone())
            .body(Body::wrap_stream(content))
            .send()
            .await
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Status {
                op: "PUT",
                path: address.path,
                status: status.as_u16(),
            });
        }

        debug!(target = TARGET, path = %address.path, size, "object stored");
        Ok(address)
    }

    async fn remove(&self, preset: &str, source: &SourceUrl) -> Result<(), StorageError> {
        let key = Self::object_key(preset, source);
        let response = self
            .authorize(self.client.delete(self.object_url(&key)))
            .send()
            .await
            .map_err(request_error)?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Ok(()),
            status => Err(StorageError::Status {
                op: "DELETE",
                path: key,
                status: status.as_u16(),
            }),
        }
    }
}
