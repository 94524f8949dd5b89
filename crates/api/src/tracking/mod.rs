pub mod mlflow;

use crate::config::TrackingConfig;
use chrono::{DateTime, Utc};
use inference::Detection;
use std::sync::Arc;

pub use mlflow::{MlflowClient, MlflowSink};

pub const RESULTS_ARTIFACT: &str = "results.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextArtifact {
    pub path: String,
    pub contents: String,
}

/// Everything logged for one request, as one experiment run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub tags: Vec<(String, String)>,
    pub params: Vec<(String, String)>,
    pub metrics: Vec<(String, f64)>,
    pub artifact: Option<TextArtifact>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn prediction(
        endpoint: &str,
        filename: Option<&str>,
        elapsed_secs: f64,
        detections: &[Detection],
        started_at: DateTime<Utc>,
    ) -> Self {
        let contents = serde_json::to_string(detections).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Failed to serialize detections for tracking");
            String::new()
        });

        Self {
            tags: vec![("endpoint".to_string(), endpoint.to_string())],
            params: vec![("filename".to_string(), display_filename(filename))],
            metrics: vec![
                ("response_time".to_string(), elapsed_secs),
                ("detections".to_string(), detections.len() as f64),
            ],
            artifact: Some(TextArtifact {
                path: RESULTS_ARTIFACT.to_string(),
                contents,
            }),
            status: RunStatus::Finished,
            started_at,
            ended_at: Utc::now(),
        }
    }

    pub fn failure(
        endpoint: &str,
        filename: Option<&str>,
        elapsed_secs: f64,
        error: &str,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tags: vec![
                ("endpoint".to_string(), endpoint.to_string()),
                ("error".to_string(), error.to_string()),
            ],
            params: vec![("filename".to_string(), display_filename(filename))],
            metrics: vec![("response_time".to_string(), elapsed_secs)],
            artifact: None,
            status: RunStatus::Failed,
            started_at,
            ended_at: Utc::now(),
        }
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        lookup(&self.tags, key).map(String::as_str)
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        lookup(&self.params, key).map(String::as_str)
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        lookup(&self.metrics, key).copied()
    }
}

fn lookup<'a, V>(pairs: &'a [(String, V)], key: &str) -> Option<&'a V> {
    pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
}

fn display_filename(filename: Option<&str>) -> String {
    filename.unwrap_or("unknown").to_string()
}

/// Destination for per-request experiment runs. Recording is fire-and-forget:
/// implementations swallow their own failures.
pub trait ExperimentSink: Send + Sync {
    fn record(&self, run: RunRecord);
}

/// Used when no tracking server is configured.
pub struct NoopSink;

impl ExperimentSink for NoopSink {
    fn record(&self, run: RunRecord) {
        tracing::trace!(status = run.status.as_str(), "Experiment tracking disabled, run dropped");
    }
}

pub fn sink_from_config(config: Option<&TrackingConfig>) -> anyhow::Result<Arc<dyn ExperimentSink>> {
    match config {
        Some(config) => {
            tracing::info!(
                uri = %config.uri,
                experiment = %config.experiment_name,
                "Experiment tracking enabled"
            );
            Ok(Arc::new(MlflowSink::new(MlflowClient::new(config)?)))
        }
        None => {
            tracing::info!("MLFLOW_TRACKING_URI not set, experiment tracking disabled");
            Ok(Arc::new(NoopSink))
        }
    }
}
