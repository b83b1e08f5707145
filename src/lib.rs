pub mod camera;
pub mod clock;
pub mod config;
pub mod error;
pub mod performance;
pub mod pose;
pub mod recording;
pub mod render;
pub mod session;
pub mod testing;
