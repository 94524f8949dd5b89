use super::{Detector, RawDetections, TableRow, ensure_named, lock_runtime};
use crate::config::DetectorConfig;
use crate::labels::ClassNames;
use crate::processing::{
    post::{PostProcessor, TransformParams},
    pre::PreProcessor,
};
use image::RgbImage;
use ort::{
    session::{Session, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use std::sync::Mutex;

const MODEL_NAME: &str = "YOLOv5";

/// Session plus the buffers reused by every call; guarded together.
struct YoloRuntime {
    session: Session,
    preprocessor: PreProcessor,
}

/// YOLOv5 exported to ONNX, executed with ONNX Runtime.
pub struct OrtYoloDetector {
    runtime: Mutex<YoloRuntime>,
    postprocessor: PostProcessor,
    class_names: ClassNames,
    input_name: String,
    output_name: String,
}

impl OrtYoloDetector {
    pub fn load(config: &DetectorConfig) -> anyhow::Result<Self> {
        // Initialize ORT environment (idempotent)
        let _ = ort::init().commit();

        #[allow(unused_mut)]
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(config.intra_threads)?;

        #[cfg(feature = "cuda")]
        {
            tracing::info!("Initializing ONNX Runtime with CUDA execution provider");
            builder = builder.with_execution_providers([
                ort::execution_providers::CUDAExecutionProvider::default()
                    .with_device_id(0)
                    .build()
                    .error_on_failure(),
            ])?;
        }

        let session = builder.commit_from_file(&config.model_path)?;

        let inputs: Vec<&str> = session.inputs().iter().map(|i| i.name()).collect();
        let outputs: Vec<&str> = session.outputs().iter().map(|o| o.name()).collect();
        ensure_named("input", &config.input_name, &inputs)?;
        ensure_named("output", &config.output_name, &outputs)?;
        tracing::info!(model_path = %config.model_path, ?inputs, ?outputs, "Model loaded");

        let class_names = match &config.labels_path {
            Some(path) => {
                let names = ClassNames::load(path)?;
                tracing::info!(path = %path, classes = names.len(), "Loaded class names");
                names
            }
            None => {
                tracing::info!("No class names configured, labels fall back to class indices");
                ClassNames::default()
            }
        };

        Ok(Self {
            runtime: Mutex::new(YoloRuntime {
                session,
                preprocessor: PreProcessor::new(config.input_size),
            }),
            postprocessor: PostProcessor::new(
                config.confidence_threshold,
                config.iou_threshold,
                config.max_detections,
            ),
            class_names,
            input_name: config.input_name.clone(),
            output_name: config.output_name.clone(),
        })
    }
}

impl Detector for OrtYoloDetector {
    fn model_name(&self) -> &str {
        MODEL_NAME
    }

    fn detect(&self, image: &RgbImage) -> anyhow::Result<RawDetections> {
        let mut guard = lock_runtime(&self.runtime);
        let YoloRuntime {
            session,
            preprocessor,
        } = &mut *guard;

        let (input, letterbox) = preprocessor.preprocess(image)?;

        let output = {
            let _infer_span = tracing::info_span!("model_inference").entered();
            let outputs = session.run(ort::inputs![
                self.input_name.as_str() => TensorRef::from_array_view(input.view())?
            ])?;
            outputs
                .get(self.output_name.as_str())
                .ok_or_else(|| anyhow::anyhow!("model produced no output named {:?}", self.output_name))?
                .try_extract_array::<f32>()?
                .into_owned()
        };
        drop(guard);

        let transform = TransformParams {
            orig_width: image.width(),
            orig_height: image.height(),
            letterbox,
        };

        let candidates = self
            .postprocessor
            .parse_detections(&output.view(), &transform)?;

        let rows = candidates
            .into_iter()
            .map(|c| TableRow {
                xmin: c.x1,
                ymin: c.y1,
                xmax: c.x2,
                ymax: c.y2,
                confidence: c.confidence,
                class: c.class_id as f32,
                name: self.class_names.get(c.class_id).map(str::to_string),
            })
            .collect();

        Ok(RawDetections::from_rows(rows))
    }
}
