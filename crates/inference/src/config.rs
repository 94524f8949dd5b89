use common::{env_opt, env_or};
use std::env;

pub const DEFAULT_INPUT_SIZE: u32 = 640;

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    pub model_path: String,
    pub labels_path: Option<String>,
    pub input_name: String,
    pub output_name: String,
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    pub intra_threads: usize,
}

impl DetectorConfig {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> anyhow::Result<Self> {
        let model_path =
            env::var("MODEL_PATH").unwrap_or_else(|_| "models/yolov5s.onnx".to_string());

        let config = Self {
            model_path,
            labels_path: env_opt("MODEL_LABELS_PATH"),
            input_name: env::var("MODEL_INPUT_NAME").unwrap_or_else(|_| "images".to_string()),
            output_name: env::var("MODEL_OUTPUT_NAME").unwrap_or_else(|_| "output0".to_string()),
            input_size: env_or("INPUT_SIZE", DEFAULT_INPUT_SIZE)?,
            confidence_threshold: env_or("CONFIDENCE_THRESHOLD", 0.25)?,
            iou_threshold: env_or("IOU_THRESHOLD", 0.45)?,
            max_detections: env_or("MAX_DETECTIONS", 1000)?,
            intra_threads: env_or("INTRA_THREADS", 4)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input_size == 0 || self.input_size % 32 != 0 {
            anyhow::bail!(
                "INPUT_SIZE must be a positive multiple of 32, got {}",
                self.input_size
            );
        }
        for (name, value) in [
            ("CONFIDENCE_THRESHOLD", self.confidence_threshold),
            ("IOU_THRESHOLD", self.iou_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{name} must be within [0, 1], got {value}");
            }
        }
        if self.max_detections == 0 {
            anyhow::bail!("MAX_DETECTIONS must be at least 1");
        }
        Ok(())
    }

    /// Create default configuration for testing
    pub fn test_default() -> Self {
        Self {
            model_path: "models/yolov5s.onnx".to_string(),
            labels_path: None,
            input_name: "images".to_string(),
            output_name: "output0".to_string(),
            input_size: DEFAULT_INPUT_SIZE,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 1000,
            intra_threads: 1,
        }
    }
}
