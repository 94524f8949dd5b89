use common::{env_opt, env_or};
use inference::DetectorConfig;
use std::env;

pub use common::Environment;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub environment: Environment,
    pub bind_addr: String,
    pub metrics_addr: String,
    pub max_upload_bytes: usize,
    /// Reported by `/health`; defaults to the loaded model's own name.
    pub model_name: Option<String>,
    pub detector: DetectorConfig,
    pub tracking: Option<TrackingConfig>,
    pub otel_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TrackingConfig {
    pub uri: String,
    pub experiment_name: String,
    pub timeout_ms: u64,
}

impl ApiConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let environment = Environment::from_env();

        let bind_addr = env::var("API_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());

        let metrics_addr =
            env::var("METRICS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8001".to_string());

        let max_upload_bytes = env_or("MAX_UPLOAD_BYTES", 20 * 1024 * 1024)?;

        let tracking = match env_opt("MLFLOW_TRACKING_URI") {
            Some(uri) => Some(TrackingConfig {
                uri,
                experiment_name: env::var("MLFLOW_EXPERIMENT_NAME")
                    .unwrap_or_else(|_| "Default".to_string()),
                timeout_ms: env_or("MLFLOW_TIMEOUT_MS", 5000)?,
            }),
            None => None,
        };

        Ok(Self {
            environment,
            bind_addr,
            metrics_addr,
            max_upload_bytes,
            model_name: env_opt("MODEL_NAME"),
            detector: DetectorConfig::from_env()?,
            tracking,
            otel_endpoint: env_opt("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

impl TrackingConfig {
    pub fn new(uri: impl Into<String>, experiment_name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            experiment_name: experiment_name.into(),
            timeout_ms: 5000,
        }
    }
}
