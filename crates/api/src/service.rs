use crate::error::PredictError;
use crate::metrics::MetricsRecorder;
use crate::tracking::{ExperimentSink, RunRecord};
use axum::body::Bytes;
use chrono::Utc;
use inference::{Detection, Detector, RawDetections, decode_image, normalize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;

pub const PREDICT_METHOD: &str = "POST";
pub const PREDICT_ENDPOINT: &str = "/predict";

/// The uploaded image as received from the client.
#[derive(Debug, Clone)]
pub struct Upload {
    pub filename: Option<String>,
    pub bytes: Bytes,
}

/// Runs one prediction request end to end: count, read, decode, infer,
/// normalize, then record latency and the experiment run.
pub struct PredictService {
    detector: Arc<dyn Detector>,
    metrics: MetricsRecorder,
    tracker: Arc<dyn ExperimentSink>,
}

impl PredictService {
    pub fn new(
        detector: Arc<dyn Detector>,
        metrics: MetricsRecorder,
        tracker: Arc<dyn ExperimentSink>,
    ) -> Self {
        Self {
            detector,
            metrics,
            tracker,
        }
    }

    pub fn detector(&self) -> &dyn Detector {
        self.detector.as_ref()
    }

    /// `upload` is awaited after the request has been counted, so a body
    /// that fails to arrive still shows up in the request counter.
    pub async fn handle<F>(&self, upload: F) -> Result<Vec<Detection>, PredictError>
    where
        F: Future<Output = Result<Upload, PredictError>>,
    {
        self.metrics.record_request(PREDICT_METHOD, PREDICT_ENDPOINT);

        let started_at = Utc::now();
        let start = Instant::now();

        let mut filename = None;
        let result = async {
            let upload = upload.await?;
            filename = upload.filename.clone();
            tracing::debug!(
                filename = upload.filename.as_deref().unwrap_or("unknown"),
                bytes = upload.bytes.len(),
                "Upload received"
            );
            self.predict(upload.bytes).await
        }
        .instrument(tracing::info_span!("predict"))
        .await;

        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(detections) => {
                self.metrics.observe_latency(PREDICT_ENDPOINT, elapsed);
                tracing::info!(
                    filename = filename.as_deref().unwrap_or("unknown"),
                    detections = detections.len(),
                    elapsed_ms = elapsed * 1000.0,
                    "Prediction complete"
                );
                self.tracker.record(RunRecord::prediction(
                    PREDICT_ENDPOINT,
                    filename.as_deref(),
                    elapsed,
                    &detections,
                    started_at,
                ));
                Ok(detections)
            }
            Err(e) => {
                tracing::error!(
                    stage = e.stage(),
                    error = %e,
                    filename = filename.as_deref().unwrap_or("unknown"),
                    "Prediction failed"
                );
                self.tracker.record(RunRecord::failure(
                    PREDICT_ENDPOINT,
                    filename.as_deref(),
                    elapsed,
                    &e.to_string(),
                    started_at,
                ));
                Err(e)
            }
        }
    }

    /// Decode and inference are CPU bound and run on the blocking pool.
    async fn predict(&self, bytes: Bytes) -> Result<Vec<Detection>, PredictError> {
        let detector = Arc::clone(&self.detector);
        let span = tracing::Span::current();

        let raw = tokio::task::spawn_blocking(move || -> Result<RawDetections, PredictError> {
            let _enter = span.enter();
            let image = decode_image(&bytes)?;
            detector.detect(&image).map_err(PredictError::Inference)
        })
        .await??;

        Ok(normalize(&raw))
    }
}
