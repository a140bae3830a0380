pub mod classifier;
pub mod features;
pub mod forest;
pub mod model;
pub mod scaler;
pub mod thresholds;

pub use model::{AnomalyDetector, DetectorConfig, TrainedState};
pub use thresholds::ThresholdTable;
