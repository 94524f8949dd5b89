use super::pre::Letterbox;
use common::span_debug;
use std::cmp::Ordering;

/// Number of leading values per YOLOv5 output row before class scores:
/// cx, cy, w, h, objectness.
const BOX_FIELDS: usize = 5;

pub struct TransformParams {
    pub orig_width: u32,
    pub orig_height: u32,
    pub letterbox: Letterbox,
}

/// A detection surviving thresholding and NMS, in original image pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: usize,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    pub fn iou(&self, other: &Candidate) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        if inter == 0.0 {
            return 0.0;
        }
        let union = self.area() + other.area() - inter;
        if union > 0.0 { inter / union } else { 0.0 }
    }
}

pub struct PostProcessor {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl PostProcessor {
    pub fn new(confidence_threshold: f32, iou_threshold: f32, max_detections: usize) -> Self {
        Self {
            confidence_threshold,
            iou_threshold,
            max_detections,
        }
    }

    /// Decode a YOLOv5 head output `[1, N, 5 + num_classes]` into detections
    /// sorted by decreasing confidence.
    #[tracing::instrument(skip_all)]
    pub fn parse_detections(
        &self,
        output: &ndarray::ArrayViewD<f32>,
        transform: &TransformParams,
    ) -> anyhow::Result<Vec<Candidate>> {
        let shape = output.shape();
        if shape.len() != 3 || shape[0] != 1 || shape[2] <= BOX_FIELDS {
            anyhow::bail!(
                "unexpected YOLOv5 output shape {:?}, expected [1, N, 5 + classes]",
                shape
            );
        }

        let num_rows = shape[1];
        let num_classes = shape[2] - BOX_FIELDS;

        let mut candidates = Vec::new();

        for i in 0..num_rows {
            let objectness = output[[0, i, 4]];
            if objectness <= self.confidence_threshold {
                continue;
            }

            // Best class by objectness-weighted score
            let mut best_score = f32::NEG_INFINITY;
            let mut class_id = 0usize;
            for c in 0..num_classes {
                let score = output[[0, i, BOX_FIELDS + c]];
                if score > best_score {
                    best_score = score;
                    class_id = c;
                }
            }

            let confidence = objectness * best_score;
            if confidence <= self.confidence_threshold {
                continue;
            }

            let (x1, y1, x2, y2) = cxcywh_to_xyxy(
                output[[0, i, 0]],
                output[[0, i, 1]],
                output[[0, i, 2]],
                output[[0, i, 3]],
            );

            candidates.push(Candidate {
                x1,
                y1,
                x2,
                y2,
                confidence,
                class_id,
            });
        }

        let mut kept = nms(candidates, self.iou_threshold);
        kept.truncate(self.max_detections);

        for det in &mut kept {
            unletterbox(det, transform);
        }

        tracing::trace!(rows = num_rows, kept = kept.len(), "Decoded YOLOv5 output");

        Ok(kept)
    }
}

/// Class-aware greedy NMS. Boxes of different classes never suppress each
/// other. Output is sorted by decreasing confidence.
pub fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    let _s = span_debug!("nms");

    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut suppressed = vec![false; candidates.len()];
    let mut kept = Vec::new();

    for i in 0..candidates.len() {
        if suppressed[i] {
            continue;
        }
        kept.push(candidates[i]);
        for j in (i + 1)..candidates.len() {
            if !suppressed[j]
                && candidates[j].class_id == candidates[i].class_id
                && candidates[i].iou(&candidates[j]) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
    }

    kept
}

/// Map a box from model input space back to the original image and clamp it.
fn unletterbox(det: &mut Candidate, transform: &TransformParams) {
    let Letterbox {
        scale,
        offset_x,
        offset_y,
    } = transform.letterbox;
    let max_x = transform.orig_width as f32;
    let max_y = transform.orig_height as f32;

    det.x1 = ((det.x1 - offset_x) / scale).clamp(0.0, max_x);
    det.y1 = ((det.y1 - offset_y) / scale).clamp(0.0, max_y);
    det.x2 = ((det.x2 - offset_x) / scale).clamp(0.0, max_x);
    det.y2 = ((det.y2 - offset_y) / scale).clamp(0.0, max_y);
}

/// Convert bounding box from center-width-height format to corner format
#[inline]
fn cxcywh_to_xyxy(cx: f32, cy: f32, w: f32, h: f32) -> (f32, f32, f32, f32) {
    let x1 = cx - w / 2.0;
    let y1 = cy - h / 2.0;
    let x2 = cx + w / 2.0;
    let y2 = cy + h / 2.0;
    (x1, y1, x2, y2)
}
