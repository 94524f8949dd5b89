#![allow(dead_code)]

use api::tracking::{ExperimentSink, NoopSink, RunRecord};
use api::{AppState, MetricsRecorder, PredictService};
use axum::body::Body;
use axum::http::{Request, Response, header};
use image::{DynamicImage, ImageFormat, RgbImage};
use inference::{Detector, RawDetections, TableRow};
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BOUNDARY: &str = "vision-api-test-boundary";

/// What the detector saw for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct SeenImage {
    pub width: u32,
    pub height: u32,
    pub raw_len: usize,
    pub first_pixel: [u8; 3],
}

/// Returns a fixed table and remembers every image it was handed.
pub struct StubDetector {
    table: Option<Vec<TableRow>>,
    seen: Mutex<Vec<SeenImage>>,
}

impl StubDetector {
    pub fn with_rows(rows: Vec<TableRow>) -> Self {
        Self {
            table: Some(rows),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::with_rows(Vec::new())
    }

    pub fn seen(&self) -> Vec<SeenImage> {
        self.seen.lock().unwrap().clone()
    }
}

impl Detector for StubDetector {
    fn model_name(&self) -> &str {
        "YOLOv5"
    }

    fn detect(&self, image: &RgbImage) -> anyhow::Result<RawDetections> {
        let pixel = image.get_pixel(0, 0).0;
        self.seen.lock().unwrap().push(SeenImage {
            width: image.width(),
            height: image.height(),
            raw_len: image.as_raw().len(),
            first_pixel: pixel,
        });
        Ok(RawDetections {
            table: self.table.clone(),
        })
    }
}

/// Takes at least `delay` per call and finds nothing.
pub struct SlowDetector {
    pub delay: Duration,
}

impl Detector for SlowDetector {
    fn model_name(&self) -> &str {
        "YOLOv5"
    }

    fn detect(&self, _image: &RgbImage) -> anyhow::Result<RawDetections> {
        std::thread::sleep(self.delay);
        Ok(RawDetections::from_rows(Vec::new()))
    }
}

pub struct FailingDetector;

impl Detector for FailingDetector {
    fn model_name(&self) -> &str {
        "YOLOv5"
    }

    fn detect(&self, _image: &RgbImage) -> anyhow::Result<RawDetections> {
        anyhow::bail!("output tensor has unexpected shape")
    }
}

/// Keeps every run in memory.
#[derive(Default)]
pub struct RecordingSink {
    runs: Mutex<Vec<RunRecord>>,
}

impl RecordingSink {
    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().unwrap().clone()
    }
}

impl ExperimentSink for RecordingSink {
    fn record(&self, run: RunRecord) {
        self.runs.lock().unwrap().push(run);
    }
}

pub fn row(class: f32, name: Option<&str>) -> TableRow {
    TableRow {
        xmin: 10.0,
        ymin: 20.0,
        xmax: 30.0,
        ymax: 40.0,
        confidence: 0.8,
        class,
        name: name.map(str::to_string),
    }
}

pub fn state_with(
    detector: Arc<dyn Detector>,
    tracker: Arc<dyn ExperimentSink>,
) -> (AppState, MetricsRecorder) {
    let metrics = MetricsRecorder::new().unwrap();
    let service = PredictService::new(detector, metrics.clone(), tracker);
    let state = AppState::new(service, metrics.clone(), None, 20 * 1024 * 1024);
    (state, metrics)
}

pub fn state(detector: Arc<dyn Detector>) -> (AppState, MetricsRecorder) {
    state_with(detector, Arc::new(NoopSink))
}

pub fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
}

pub fn solid_png(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, image::Rgb(rgb));
    encode(DynamicImage::ImageRgb8(image), ImageFormat::Png)
}

pub fn multipart_body(field: &str, filename: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn predict_request(filename: &str, content: &[u8]) -> Request<Body> {
    predict_request_with_field("file", filename, content)
}

pub fn predict_request_with_field(field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/predict")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(field, filename, content)))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn json_body(response: Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn text_body(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}
