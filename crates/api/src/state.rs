use crate::metrics::MetricsRecorder;
use crate::service::PredictService;
use std::sync::Arc;

/// Shared by every handler. Built once in `main` after the model is loaded.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PredictService>,
    pub metrics: MetricsRecorder,
    pub model_name: String,
    pub max_upload_bytes: usize,
}

impl AppState {
    /// `model_name` overrides the name the detector reports about itself.
    pub fn new(
        service: PredictService,
        metrics: MetricsRecorder,
        model_name: Option<String>,
        max_upload_bytes: usize,
    ) -> Self {
        let model_name =
            model_name.unwrap_or_else(|| service.detector().model_name().to_string());

        Self {
            service: Arc::new(service),
            metrics,
            model_name,
            max_upload_bytes,
        }
    }
}
