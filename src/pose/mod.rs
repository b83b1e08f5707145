pub mod detector;
pub mod landmark;

pub use detector::{DetectorConfig, DetectorMode, DetectorModel, PoseDetector};
pub use landmark::{Landmark, LandmarkType, PoseFrame};
