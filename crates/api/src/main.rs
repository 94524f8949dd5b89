use anyhow::Context;
use api::{
    ApiConfig, AppState, MetricsExporter, MetricsRecorder, PredictService,
    server::{run_server, shutdown_signal},
    tracking::sink_from_config,
};
use common::{TelemetryGuard, setup_logging};
use std::sync::Arc;

#[cfg(feature = "ort-backend")]
use inference::OrtYoloDetector as Backend;

#[cfg(not(feature = "ort-backend"))]
compile_error!("The 'ort-backend' feature must be enabled to build the server binary");

const SERVICE_NAME: &str = "vision-api";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::from_env()?;

    let _telemetry = match config.otel_endpoint.as_deref() {
        Some(endpoint) => Some(TelemetryGuard::init(SERVICE_NAME, endpoint, config.environment)?),
        None => {
            setup_logging(config.environment);
            None
        }
    };

    tracing::info!(config = ?config, "Loaded configuration");

    tracing::info!(model_path = %config.detector.model_path, "Loading detection model");
    let detector = Backend::load(&config.detector)
        .with_context(|| format!("failed to load model from {}", config.detector.model_path))?;
    tracing::info!("Model loaded successfully");

    let metrics = MetricsRecorder::new()?;
    let tracker = sink_from_config(config.tracking.as_ref())?;
    let service = PredictService::new(Arc::new(detector), metrics.clone(), tracker);
    let state = AppState::new(
        service,
        metrics.clone(),
        config.model_name.clone(),
        config.max_upload_bytes,
    );

    let exporter = MetricsExporter::start(config.metrics_addr.clone(), metrics);

    let result = run_server(&config.bind_addr, state, shutdown_signal()).await;

    exporter.stop().await;
    result
}
