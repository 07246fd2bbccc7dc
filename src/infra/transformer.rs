//! HTTP client for the external image transformation service.

use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Client, Url, header::CONTENT_TYPE};

use crate::application::ports::{Derivative, TransformError, Transformer};
use crate::domain::source::SourceUrl;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
const MAX_ERROR_DETAIL: usize = 512;

/// Calls `GET {endpoint}?rule=<rule>&url=<source>` and streams the response
/// body back as the derivative.
#[derive(Debug, Clone)]
pub struct HttpTransformer {
    client: Client,
    endpoint: Url,
}

impl HttpTransformer {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, TransformError> {
        let client = Client::builder()
            .user_agent(concat!("derivo/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|err| TransformError::Request(err.to_string()))?;
        Ok(Self { client, endpoint })
    }

    fn request_url(&self, rule: &str, source: &SourceUrl) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("rule", rule)
            .append_pair("url", source.as_str());
        url
    }
}

#[async_trait]
impl Transformer for HttpTransformer {
    async fn transform(
        &self,
        rule: &str,
        source: &SourceUrl,
    ) -> Result<Derivative, TransformError> {
        let response = self
            .client
            .get(self.request_url(rule, source))
            .send()
            .await
            .map_err(|err| TransformError::Request(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TransformError::Upstream {
                status: status.as_u16(),
                detail: truncate_detail(detail),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        match response.content_length() {
            Some(size) => {
                let content = response
                    .bytes_stream()
                    .map_err(std::io::Error::other)
                    .boxed();
                Ok(Derivative::new(content, size, content_type))
            }
            None => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|err| TransformError::Unprocessable(err.to_string()))?;
                Ok(Derivative::from_bytes(body, content_type))
            }
        }
    }
}

fn truncate_detail(mut detail: String) -> String {
    if detail.len() > MAX_ERROR_DETAIL {
        let cut = (0..=MAX_ERROR_DETAIL)
            .rev()
            .find(|index| detail.is_char_boundary(*index))
            .unwrap_or(0);
        detail.truncate(cut);
    }
    detail
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        extract::Query,
        http::{StatusCode, header},
        response::IntoResponse,
        routing::get,
    };
    use bytes::Bytes;
    use serde::Deserialize;

    use super::*;

    #[derive(Deserialize)]
    struct TransformQuery {
        rule: String,
        url: String,
    }

    async fn transform_handler(Query(query): Query<TransformQuery>) -> impl IntoResponse {
        if query.rule == "broken" {
            return (StatusCode::UNPROCESSABLE_ENTITY, "cannot decode source").into_response();
        }
        (
            [(header::CONTENT_TYPE, "image/webp")],
            format!("{}@{}", query.rule, query.url),
        )
            .into_response()
    }

    async fn spawn_transformer() -> Url {
        let app = Router::new().route("/transform", get(transform_handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });
        Url::parse(&format!("http://{addr}/transform")).expect("endpoint url")
    }

    #[tokio::test]
    async fn streams_the_transformed_body() {
        let endpoint = spawn_transformer().await;
        let transformer = HttpTransformer::new(endpoint, Duration::from_secs(5)).expect("client");
        let source = SourceUrl::parse("https://x/a.jpg?size=big").expect("valid url");

        let derivative = transformer
            .transform("170x230", &source)
            .await
            .expect("transform");
        assert_eq!(derivative.content_type, "image/webp");

        let expected = format!("170x230@{source}");
        assert_eq!(derivative.size, expected.len() as u64);
        let chunks: Vec<Bytes> = derivative
            .content
            .try_collect()
            .await
            .expect("body stream");
        assert_eq!(chunks.concat(), expected.as_bytes());
    }

    #[tokio::test]
    async fn upstream_failure_carries_status_and_detail() {
        let endpoint = spawn_transformer().await;
        let transformer = HttpTransformer::new(endpoint, Duration::from_secs(5)).expect("client");
        let source = SourceUrl::parse("https://x/a.jpg").expect("valid url");

        let err = transformer
            .transform("broken", &source)
            .await
            .expect_err("upstream rejects rule");
        match err {
            TransformError::Upstream { status, detail } => {
                assert_eq!(status, 422);
                assert_eq!(detail, "cannot decode source");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn unreachable_service_is_a_request_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        drop(listener);

        let endpoint = Url::parse(&format!("http://{addr}/transform")).expect("endpoint url");
        let transformer = HttpTransformer::new(endpoint, Duration::from_secs(2)).expect("client");
        let source = SourceUrl::parse("https://x/a.jpg").expect("valid url");

        let err = transformer
            .transform("170x230", &source)
            .await
            .expect_err("connection refused");
        assert!(matches!(err, TransformError::Request(_)));
    }
}
