//! Administrative listener: eager materialization (PUT) and invalidation (DELETE).

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{Query, State},
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Deserialize;
use tracing::info;

use crate::{
    application::{
        derivatives::{DerivativeService, OperationError},
        error::HttpError,
    },
    domain::source::SourceUrl,
};

use super::{
    ELAPSED_TIME_HEADER, health,
    middleware::{log_responses, set_request_context},
};

const TARGET: &str = "derivo::http::guardian";

#[derive(Clone)]
pub struct GuardianState {
    pub derivatives: Arc<DerivativeService>,
}

pub fn build_guardian_router(state: GuardianState) -> Router {
    Router::new()
        .route("/", put(materialize).delete(invalidate))
        .route("/_health", get(health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Default, Deserialize)]
struct TargetQuery {
    url: Option<String>,
}

async fn materialize(
    State(state): State<GuardianState>,
    Query(query): Query<TargetQuery>,
) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::guardian::materialize";

    let source = parse_target(SOURCE, &query)?;
    let elapsed = state
        .derivatives
        .materialize(&source)
        .await
        .map_err(|err| operation_error(SOURCE, err))?;

    info!(
        target = TARGET,
        url = %source,
        elapsed_ms = elapsed.as_millis() as u64,
        "derivatives materialized",
    );
    Ok(elapsed_response(elapsed))
}

async fn invalidate(
    State(state): State<GuardianState>,
    Query(query): Query<TargetQuery>,
) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::guardian::invalidate";

    let source = parse_target(SOURCE, &query)?;
    let elapsed = state
        .derivatives
        .invalidate(&source)
        .await
        .map_err(|err| operation_error(SOURCE, err))?;

    info!(
        target = TARGET,
        url = %source,
        elapsed_ms = elapsed.as_millis() as u64,
        "derivatives invalidated",
    );
    Ok(elapsed_response(elapsed))
}

fn parse_target(source: &'static str, query: &TargetQuery) -> Result<SourceUrl, HttpError> {
    let raw = query.url.as_deref().unwrap_or_default();
    SourceUrl::parse(raw).map_err(|err| {
        HttpError::from_error(source, StatusCode::INTERNAL_SERVER_ERROR, "Bad url", &err)
    })
}

fn operation_error(source: &'static str, err: OperationError) -> HttpError {
    let public_message = match &err {
        OperationError::InFlight(_) => "url is being processed".to_string(),
        OperationError::Failed(aggregate) => aggregate.to_string(),
        OperationError::Aborted(_) => err.to_string(),
    };
    HttpError::from_error(
        source,
        StatusCode::INTERNAL_SERVER_ERROR,
        public_message,
        &err,
    )
}

fn elapsed_response(elapsed: Duration) -> Response {
    let mut response = StatusCode::OK.into_response();
    let value = format!("{:.2}", elapsed.as_secs_f64());
    if let Ok(value) = HeaderValue::from_str(&value) {
        response.headers_mut().insert(ELAPSED_TIME_HEADER, value);
    }
    response
}
