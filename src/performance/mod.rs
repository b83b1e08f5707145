pub mod frame_rate;
pub mod monitor;

pub use frame_rate::{FallbackLevel, FrameRateController, FrameRateSummary, FrameRateThresholds};
pub use monitor::{
    AlertLevel, AlertType, MonitorConfig, MonitorSummary, PerformanceAlert, PerformanceLevel, PerformanceMetrics,
    PerformanceMonitor, PerformanceThresholds, SystemMetrics, ThermalState,
};
