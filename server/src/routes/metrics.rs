//! Prometheus scrape endpoint

use axum::{extract::State, http::header, response::IntoResponse};

use crate::error::ApiError;
use crate::state::SharedState;

/// GET /metrics - Text exposition of all service metrics
pub async fn metrics(State(state): State<SharedState>) -> Result<impl IntoResponse, ApiError> {
    let body = state.metrics.render()?;
    Ok((
        [(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)],
        body,
    ))
}
