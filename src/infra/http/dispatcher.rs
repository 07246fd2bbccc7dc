//! Read listener: redirects clients to derivatives or to the original image.

use std::{io::ErrorKind, sync::Arc};

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, LOCATION},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::error;

use crate::{
    application::{
        derivatives::{DerivativeService, ServeDecision},
        error::HttpError,
        ports::StorageError,
    },
    domain::{source::SourceUrl, whitelist::Whitelist},
    infra::storage::fs::FsBackend,
};

use super::{
    DERIVATIVES_PREFIX, health,
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct DispatcherState {
    pub derivatives: Arc<DerivativeService>,
    pub whitelist: Arc<Whitelist>,
    /// Present when derivatives live on the local filesystem and are served
    /// by this listener.
    pub files: Option<Arc<FsBackend>>,
}

pub fn build_dispatcher_router(state: DispatcherState) -> Router {
    let mut router = Router::new()
        .route("/", get(fetch))
        .route("/_health", get(health));

    if state.files.is_some() {
        router = router.route(
            &format!("{DERIVATIVES_PREFIX}/{{*path}}"),
            get(serve_derivative),
        );
    }

    router
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
struct FetchQuery {
    url: Option<String>,
    preset: Option<String>,
}

async fn fetch(
    State(state): State<DispatcherState>,
    Query(query): Query<FetchQuery>,
) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::dispatcher::fetch";

    let raw = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            HttpError::new(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Bad url",
                "missing `url` query parameter",
            )
        })?;

    if !state.whitelist.allows(raw) {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::FORBIDDEN,
            "Specified url not allowed",
            format!("`{raw}` matches no whitelist pattern"),
        ));
    }

    let source = SourceUrl::parse(raw).map_err(|err| {
        HttpError::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, "Bad url", &err)
    })?;

    let preset = state
        .derivatives
        .presets()
        .resolve(query.preset.as_deref().unwrap_or_default())
        .map_err(|err| {
            HttpError::from_error(SOURCE, StatusCode::INTERNAL_SERVER_ERROR, "Bad preset", &err)
        })?;

    let decision = state.derivatives.resolve(&source, preset).await;
    redirect(SOURCE, &decision)
}

fn redirect(source: &'static str, decision: &ServeDecision) -> Result<Response, HttpError> {
    let status = if decision.is_permanent() {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::FOUND
    };

    let location = HeaderValue::from_str(decision.location()).map_err(|err| {
        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Bad location",
            &err,
        )
    })?;

    Ok((status, [(LOCATION, location)]).into_response())
}

async fn serve_derivative(
    State(state): State<DispatcherState>,
    Path(path): Path<String>,
) -> Response {
    const SOURCE: &str = "infra::http::dispatcher::serve_derivative";

    let Some(files) = state.files.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match files.read(&path).await {
        Ok(bytes) => build_derivative_response(&path, bytes),
        Err(StorageError::InvalidPath) => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Derivative not found",
            "The requested derivative path is invalid",
        )
        .into_response(),
        Err(StorageError::Io(err)) if err.kind() == ErrorKind::NotFound => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "Derivative not found",
            "The requested derivative is not available",
        )
        .into_response(),
        Err(err) => {
            error!(
                target = SOURCE,
                path = %path,
                error = %err,
                "failed to read stored derivative"
            );
            HttpError::new(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read derivative",
                err.to_string(),
            )
            .into_response()
        }
    }
}

fn build_derivative_response(path: &str, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("public, max-age=86400"));

    response
}
