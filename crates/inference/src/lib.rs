pub mod backend;
pub mod config;
pub mod decode;
pub mod labels;
pub mod normalize;
pub mod processing;

// Re-export commonly used types for convenience
pub use backend::{Detector, RawDetections, TableRow};
pub use config::DetectorConfig;
pub use decode::{DecodeError, decode_image};
pub use normalize::{Detection, normalize};

#[cfg(feature = "ort-backend")]
pub use backend::ort::OrtYoloDetector;
