use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::landmark::PoseFrame;
use crate::camera::CameraFrame;

/// 推論モデルの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorModel {
    /// 軽量モデル
    #[default]
    Base,
    /// 高精度モデル (低速)
    Accurate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorMode {
    /// 連続フレーム。前フレームの追跡結果を使う
    Stream,
    SingleImage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_mode")]
    pub mode: DetectorMode,
    #[serde(default)]
    pub model: DetectorModel,
}

fn default_mode() -> DetectorMode {
    DetectorMode::Stream
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            model: DetectorModel::default(),
        }
    }
}

/// 姿勢推定エンジンの抽象
///
/// 実装はエンジン固有の結果を即座に [`PoseFrame`] に変換して返すこと。
/// キャンセル手段は持たないので、呼び出し側は完了後に結果を捨てるかどうか判断する。
#[async_trait]
pub trait PoseDetector: Send {
    /// モデルを読み込む。失敗時は Err
    async fn initialize(&mut self, config: &DetectorConfig) -> Result<()>;

    /// 1フレームを推論。人物がいなければ `Ok(None)`
    ///
    /// `rotation` は画像を正立させるための回転角 (度)
    async fn process_image(&mut self, frame: &CameraFrame, rotation: u32) -> Result<Option<PoseFrame>>;

    async fn close(&mut self);
}
