//! Prediction endpoint

use std::time::Instant;

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::error::ApiError;
use crate::routes::MAX_UPLOAD_BYTES;
use crate::state::SharedState;

/// Name of the multipart field carrying the image
pub const FILE_FIELD: &str = "file";

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub class: String,
    pub confidence: f64,
    pub inference_time_ms: f64,
}

/// POST /predict - Classify an uploaded image
pub async fn predict(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<PredictResponse>, ApiError> {
    if !state.model_loaded() {
        return Err(ApiError::ModelNotLoaded);
    }

    let start = Instant::now();
    let bytes = read_file_field(multipart).await?;

    let worker = state.clone();
    let prediction = tokio::task::spawn_blocking(move || worker.predict(&bytes))
        .await
        .map_err(|e| ApiError::Internal(format!("Prediction task failed: {}", e)))??;

    let latency = start.elapsed().as_secs_f64();
    state
        .metrics
        .observe_prediction(latency, prediction.confidence);

    Ok(Json(PredictResponse {
        class: prediction.class,
        confidence: round_to(prediction.confidence as f64, 4),
        inference_time_ms: round_to(latency * 1000.0, 2),
    }))
}

async fn read_file_field(mut multipart: Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| upload_error("Invalid multipart body", e))?
    {
        if field.name() == Some(FILE_FIELD) {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| upload_error("Failed to read upload", e))?;
            return Ok(bytes.to_vec());
        }
    }
    Err(ApiError::BadRequest(format!(
        "Missing '{}' field",
        FILE_FIELD
    )))
}

/// Bodies over the upload limit are 413, any other multipart failure is 400
fn upload_error(context: &str, err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(MAX_UPLOAD_BYTES)
    } else {
        ApiError::BadRequest(format!("{}: {}", context, err))
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(0.923456, 4), 0.9235);
        assert_eq!(round_to(12.3456, 2), 12.35);
        assert_eq!(round_to(1.0, 4), 1.0);
    }
}
