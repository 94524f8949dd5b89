use crate::backend::{RawDetections, TableRow};
use serde::{Deserialize, Serialize};

/// A single detected object as returned to API clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
    pub confidence: f64,
    #[serde(rename = "class")]
    pub class_id: u32,
    pub label: String,
}

/// Turn the model's tabular output into detection records, preserving row
/// order. A missing or empty table yields an empty vector.
pub fn normalize(raw: &RawDetections) -> Vec<Detection> {
    match &raw.table {
        Some(rows) => rows.iter().map(Detection::from).collect(),
        None => Vec::new(),
    }
}

/// Label used when the model has no name for a class index.
pub fn fallback_label(class_id: u32) -> String {
    format!("class_{class_id}")
}

impl From<&TableRow> for Detection {
    fn from(row: &TableRow) -> Self {
        // `as` truncates toward zero and saturates; NaN and negatives become 0.
        let class_id = row.class as u32;
        let label = row
            .name
            .clone()
            .unwrap_or_else(|| fallback_label(class_id));

        Self {
            xmin: f64::from(row.xmin),
            ymin: f64::from(row.ymin),
            xmax: f64::from(row.xmax),
            ymax: f64::from(row.ymax),
            confidence: f64::from(row.confidence),
            class_id,
            label,
        }
    }
}
