use serde::Serialize;

use crate::camera::CameraQualityConfig;
use crate::performance::FallbackLevel;
use crate::pose::PoseFrame;

/// セッションの状態遷移
///
/// `Idle -> Initializing -> Active <-> Paused`、どこからでも `Stopped`。
/// 初期化に失敗すると `Idle` に戻る。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Idle,
    Initializing,
    Active,
    Paused,
    Stopped,
}

impl SessionPhase {
    /// カメラと推論器を確保している状態か
    pub fn is_running(self) -> bool {
        matches!(self, Self::Initializing | Self::Active | Self::Paused)
    }
}

/// UIに公開するセッションのスナップショット
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub phase: SessionPhase,
    pub is_initializing: bool,
    pub current_pose: Option<PoseFrame>,
    pub error_message: Option<String>,
    pub session_start_time_ms: Option<u64>,
    pub total_frames_processed: u64,
    pub current_config: CameraQualityConfig,
    /// `SimplifiedRendering` ならUIは簡易描画に切り替える
    pub fallback_level: FallbackLevel,
    pub dropped_frames: u64,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        self.phase == SessionPhase::Active
    }

    pub fn is_paused(&self) -> bool {
        self.phase == SessionPhase::Paused
    }

    pub fn simplified_rendering(&self) -> bool {
        self.fallback_level >= FallbackLevel::SimplifiedRendering
    }

    /// 開始からの経過時間
    pub fn elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.session_start_time_ms.map(|start| now_ms.saturating_sub(start))
    }
}
