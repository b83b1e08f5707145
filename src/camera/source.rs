use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::quality::CameraQualityConfig;

/// レンズの向き
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensDirection {
    Front,
    Back,
}

impl LensDirection {
    pub fn is_front(self) -> bool {
        matches!(self, Self::Front)
    }
}

/// 端末の向き
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceOrientation {
    PortraitUp,
    LandscapeLeft,
    PortraitDown,
    LandscapeRight,
}

impl DeviceOrientation {
    pub fn degrees(self) -> u32 {
        match self {
            Self::PortraitUp => 0,
            Self::LandscapeLeft => 90,
            Self::PortraitDown => 180,
            Self::LandscapeRight => 270,
        }
    }
}

/// 幅と高さ (画像はピクセル、画面は論理ピクセル)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

impl Size {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0.0 {
            0.0
        } else {
            self.width / self.height
        }
    }
}

/// カメラから届く生フレーム。端末外には出さない
#[derive(Debug, Clone)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    /// カメラ側の単調増加する時計 (ms)。原点は端末依存で、壁時計ではない
    pub timestamp_ms: u64,
    /// YUV/BGRA等のプレーン。解釈は推論側に任せる
    pub data: Bytes,
}

impl CameraFrame {
    pub fn new(width: u32, height: u32, timestamp_ms: u64, data: Bytes) -> Self {
        Self {
            width,
            height,
            timestamp_ms,
            data,
        }
    }

    pub fn size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }
}

/// フレーム到着時に呼ばれるコールバック。カメラ側のスレッドから呼ばれてよい
pub type FrameCallback = Box<dyn Fn(CameraFrame) + Send + Sync>;

/// カメラドライバの抽象
#[async_trait]
pub trait CameraSource: Send {
    /// 指定品質・レンズで初期化。使用可能なら true
    async fn initialize(&mut self, config: &CameraQualityConfig, lens: LensDirection) -> Result<bool>;

    /// フレームストリームを開始
    async fn start_stream(&mut self, on_frame: FrameCallback) -> Result<()>;

    async fn stop_stream(&mut self) -> Result<()>;

    async fn dispose(&mut self);

    /// 初期化後の実際の画像サイズ
    fn image_size(&self) -> Option<Size>;

    /// センサー取り付け角 (度)
    fn sensor_orientation(&self) -> u32;
}
