pub mod quality;
pub mod source;

pub use quality::{CameraQualityConfig, ResolutionPreset};
pub use source::{CameraFrame, CameraSource, DeviceOrientation, FrameCallback, LensDirection, Size};
