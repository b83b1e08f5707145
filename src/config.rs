use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::camera::{CameraQualityConfig, ResolutionPreset};
use crate::error::ConfigError;
use crate::performance::{FrameRateThresholds, MonitorConfig, PerformanceThresholds};
use crate::recording::MAX_FRAMES_IN_MEMORY;
use crate::session::SessionConfig;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraSettings,
    #[serde(default)]
    pub frame_rate: FrameRateThresholds,
    #[serde(default)]
    pub monitor: MonitorSettings,
    #[serde(default)]
    pub recorder: RecorderSettings,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraSettings {
    /// 開始時の解像度 ("low" / "medium" / "high" / "very_high")
    #[serde(default = "default_resolution")]
    pub resolution: ResolutionPreset,
    /// 開始時の目標FPS
    #[serde(default = "default_target_fps")]
    pub target_fps: u32,
}

fn default_resolution() -> ResolutionPreset { ResolutionPreset::High }
fn default_target_fps() -> u32 { 30 }

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            target_fps: default_target_fps(),
        }
    }
}

impl CameraSettings {
    /// フォールバックチェーン付きの品質ティア
    pub fn quality(&self) -> CameraQualityConfig {
        CameraQualityConfig::from_preset(self.resolution, self.target_fps)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MonitorSettings {
    /// 評価間隔 (ミリ秒)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// 移動平均・履歴のサンプル数
    #[serde(default = "default_sample_window")]
    pub sample_window: usize,
    #[serde(default)]
    pub thresholds: PerformanceThresholds,
}

fn default_tick_interval_ms() -> u64 { 1000 }
fn default_sample_window() -> usize { 60 }

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            sample_window: default_sample_window(),
            thresholds: PerformanceThresholds::default(),
        }
    }
}

impl MonitorSettings {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            thresholds: self.thresholds.clone(),
            tick_interval: Duration::from_millis(self.tick_interval_ms.max(1)),
            sample_window: self.sample_window.max(1),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecorderSettings {
    /// メモリに保持する最大フレーム数
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
}

fn default_max_frames() -> usize { MAX_FRAMES_IN_MEMORY }

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            max_frames: default_max_frames(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// 読めなければデフォルト設定で続行する
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if !path.exists() {
            info!("{} not found, using default config", path.display());
            return Self::default();
        }
        match Self::load(path) {
            Ok(config) => {
                info!("Loaded config from {}", path.display());
                config
            }
            Err(e) => {
                warn!("Failed to load {}: {}. Using defaults", path.display(), e);
                Self::default()
            }
        }
    }
}
