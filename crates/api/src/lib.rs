pub mod config;
pub mod error;
pub mod metrics;
pub mod routes;
pub mod server;
pub mod service;
pub mod state;
pub mod tracking;

pub use config::{ApiConfig, TrackingConfig};
pub use error::PredictError;
pub use metrics::{MetricsExporter, MetricsRecorder};
pub use routes::router;
pub use service::{PredictService, Upload};
pub use state::AppState;
