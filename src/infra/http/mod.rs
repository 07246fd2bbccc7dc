mod dispatcher;
mod guardian;
mod middleware;

pub use dispatcher::{DispatcherState, build_dispatcher_router};
pub use guardian::{GuardianState, build_guardian_router};
pub use middleware::RequestContext;

use axum::http::StatusCode;

/// Wall time of a successful guardian operation, seconds with two decimals.
pub const ELAPSED_TIME_HEADER: &str = "x-derivo-elapsed-time";

/// Mount point of filesystem derivatives on the dispatcher.
pub const DERIVATIVES_PREFIX: &str = "/derivatives";

async fn health() -> StatusCode {
    StatusCode::NO_CONTENT
}
