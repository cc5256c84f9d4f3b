//! Prometheus metrics for the inference service
//!
//! Each [`ServiceMetrics`] owns its own registry so tests can build
//! independent instances.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry,
    TextEncoder,
};

use crate::error::ApiError;

const CONFIDENCE_BUCKETS: &[f64] = &[0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 0.95, 0.99, 1.0];

pub struct ServiceMetrics {
    registry: Registry,
    pub predictions_total: IntCounter,
    pub inference_latency: Histogram,
    pub prediction_confidence: Histogram,
    pub http_requests_total: IntCounterVec,
    pub http_request_duration: HistogramVec,
}

impl ServiceMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let predictions_total =
            IntCounter::new("predictions_total", "Total number of predictions")?;
        let inference_latency = Histogram::with_opts(HistogramOpts::new(
            "inference_latency_seconds",
            "Inference latency in seconds",
        ))?;
        let prediction_confidence = Histogram::with_opts(
            HistogramOpts::new("prediction_confidence", "Prediction confidence scores")
                .buckets(CONFIDENCE_BUCKETS.to_vec()),
        )?;
        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests"),
            &["method", "handler", "status"],
        )?;
        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request latency in seconds",
            ),
            &["method", "handler"],
        )?;

        registry.register(Box::new(predictions_total.clone()))?;
        registry.register(Box::new(inference_latency.clone()))?;
        registry.register(Box::new(prediction_confidence.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            registry,
            predictions_total,
            inference_latency,
            prediction_confidence,
            http_requests_total,
            http_request_duration,
        })
    }

    /// Record one successful prediction
    pub fn observe_prediction(&self, latency_seconds: f64, confidence: f32) {
        self.predictions_total.inc();
        self.inference_latency.observe(latency_seconds);
        self.prediction_confidence.observe(confidence as f64);
    }

    /// Record one HTTP request; statuses are grouped by class (`2xx`, `4xx`, ...)
    pub fn observe_request(&self, method: &str, handler: &str, status: u16, seconds: f64) {
        self.http_requests_total
            .with_label_values(&[method, handler, &status_group(status)])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, handler])
            .observe(seconds);
    }

    /// Text exposition format
    pub fn render(&self) -> Result<String, ApiError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ApiError::Internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| ApiError::Internal(format!("Metrics are not UTF-8: {}", e)))
    }
}

fn status_group(status: u16) -> String {
    format!("{}xx", status / 100)
}
