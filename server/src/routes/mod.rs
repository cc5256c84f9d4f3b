//! HTTP routes and the request metrics middleware

pub mod health;
pub mod metrics;
pub mod predict;

use std::time::Instant;

use axum::{
    extract::{DefaultBodyLimit, MatchedPath, Request, State},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

/// Largest accepted upload
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(health::root))
        .route("/health", get(health::health_check))
        .route("/predict", post(predict::predict))
        .route("/metrics", get(metrics::metrics))
        .layer(middleware::from_fn_with_state(state.clone(), track_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Handler label for requests that matched no route
const UNMATCHED_HANDLER: &str = "none";

/// Count requests and time them per matched route
async fn track_metrics(State(state): State<SharedState>, req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let handler = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_HANDLER.to_string(), |p| p.as_str().to_string());

    let response = next.run(req).await;

    state.metrics.observe_request(
        &method,
        &handler,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );
    response
}
