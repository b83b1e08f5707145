pub mod skeleton;
pub mod transform;

pub use skeleton::{OverlayLine, OverlayPoint, SkeletonOverlay, SIMPLIFIED_CONNECTIONS, SKELETON_CONNECTIONS};
pub use transform::{
    calculate_angle, calculate_distance, calculate_midpoint, calculate_vertical_angle, BoundingBox,
    CoordinateTransformer, FitMode, Point, TransformParams,
};
