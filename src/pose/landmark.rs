use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 全身33ランドマークのインデックス
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(usize)]
pub enum LandmarkType {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl LandmarkType {
    pub const COUNT: usize = 33;

    pub const ALL: [LandmarkType; Self::COUNT] = [
        Self::Nose,
        Self::LeftEyeInner,
        Self::LeftEye,
        Self::LeftEyeOuter,
        Self::RightEyeInner,
        Self::RightEye,
        Self::RightEyeOuter,
        Self::LeftEar,
        Self::RightEar,
        Self::MouthLeft,
        Self::MouthRight,
        Self::LeftShoulder,
        Self::RightShoulder,
        Self::LeftElbow,
        Self::RightElbow,
        Self::LeftWrist,
        Self::RightWrist,
        Self::LeftPinky,
        Self::RightPinky,
        Self::LeftIndex,
        Self::RightIndex,
        Self::LeftThumb,
        Self::RightThumb,
        Self::LeftHip,
        Self::RightHip,
        Self::LeftKnee,
        Self::RightKnee,
        Self::LeftAnkle,
        Self::RightAnkle,
        Self::LeftHeel,
        Self::RightHeel,
        Self::LeftFootIndex,
        Self::RightFootIndex,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftEyeInner => "left_eye_inner",
            Self::LeftEye => "left_eye",
            Self::LeftEyeOuter => "left_eye_outer",
            Self::RightEyeInner => "right_eye_inner",
            Self::RightEye => "right_eye",
            Self::RightEyeOuter => "right_eye_outer",
            Self::LeftEar => "left_ear",
            Self::RightEar => "right_ear",
            Self::MouthLeft => "mouth_left",
            Self::MouthRight => "mouth_right",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftPinky => "left_pinky",
            Self::RightPinky => "right_pinky",
            Self::LeftIndex => "left_index",
            Self::RightIndex => "right_index",
            Self::LeftThumb => "left_thumb",
            Self::RightThumb => "right_thumb",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
            Self::LeftKnee => "left_knee",
            Self::RightKnee => "right_knee",
            Self::LeftAnkle => "left_ankle",
            Self::RightAnkle => "right_ankle",
            Self::LeftHeel => "left_heel",
            Self::RightHeel => "right_heel",
            Self::LeftFootIndex => "left_foot_index",
            Self::RightFootIndex => "right_foot_index",
        }
    }
}

/// 単一ランドマーク
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Landmark {
    #[serde(rename = "type")]
    pub landmark_type: LandmarkType,
    /// 正規化されたX座標 (0.0〜1.0)
    pub x: f64,
    /// 正規化されたY座標 (0.0〜1.0)
    pub y: f64,
    /// 腰中点基準の相対深度
    pub z: f64,
    /// 信頼度スコア (0.0〜1.0)
    pub confidence: f64,
}

impl Landmark {
    /// 描画・記録に使ってよい最低信頼度
    pub const MIN_CONFIDENCE: f64 = 0.5;
    /// フォーム採点に使える信頼度
    pub const RELIABLE_CONFIDENCE: f64 = 0.7;

    pub fn new(landmark_type: LandmarkType, x: f64, y: f64, z: f64, confidence: f64) -> Self {
        Self {
            landmark_type,
            x,
            y,
            z,
            confidence,
        }
    }

    /// 信頼度が閾値以上か
    pub fn is_valid(&self, threshold: f64) -> bool {
        self.confidence >= threshold
    }

    pub fn is_usable(&self) -> bool {
        self.is_valid(Self::MIN_CONFIDENCE)
    }

    pub fn is_reliable(&self) -> bool {
        self.is_valid(Self::RELIABLE_CONFIDENCE)
    }

    /// ピクセル座標に変換
    pub fn to_pixel(&self, width: u32, height: u32) -> (i32, i32) {
        let px = (self.x * width as f64) as i32;
        let py = (self.y * height as f64) as i32;
        (px, py)
    }
}

/// 1フレーム分の推論結果
///
/// 推論エンジン側の型はここに変換してから扱う。キーはランドマーク種別ごとに一意。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseFrame {
    pub landmarks: BTreeMap<LandmarkType, Landmark>,
    /// 元になった `CameraFrame` の時刻 (カメラの時計)
    pub timestamp_ms: u64,
    pub processing_time_ms: Option<f64>,
}

impl PoseFrame {
    pub fn new(landmarks: impl IntoIterator<Item = Landmark>, timestamp_ms: u64) -> Self {
        Self {
            landmarks: landmarks
                .into_iter()
                .map(|lm| (lm.landmark_type, lm))
                .collect(),
            timestamp_ms,
            processing_time_ms: None,
        }
    }

    pub fn empty(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            ..Self::default()
        }
    }

    pub fn with_processing_time(mut self, processing_time_ms: f64) -> Self {
        self.processing_time_ms = Some(processing_time_ms);
        self
    }

    /// 人物が検出されたか
    pub fn is_detected(&self) -> bool {
        !self.landmarks.is_empty()
    }

    pub fn get(&self, landmark_type: LandmarkType) -> Option<&Landmark> {
        self.landmarks.get(&landmark_type)
    }

    /// 全ランドマークの平均信頼度
    pub fn average_confidence(&self) -> f64 {
        if self.landmarks.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.landmarks.values().map(|lm| lm.confidence).sum();
        sum / self.landmarks.len() as f64
    }

    /// 指定したランドマークのみの平均信頼度。欠けているものは0として数える
    pub fn average_confidence_of(&self, types: &[LandmarkType]) -> f64 {
        if types.is_empty() {
            return 0.0;
        }
        let sum: f64 = types
            .iter()
            .map(|t| self.get(*t).map_or(0.0, |lm| lm.confidence))
            .sum();
        sum / types.len() as f64
    }

    pub fn reliable_landmark_count(&self) -> usize {
        self.landmarks.values().filter(|lm| lm.is_reliable()).count()
    }

    /// 最低信頼度を満たすランドマーク
    pub fn usable_landmarks(&self) -> impl Iterator<Item = &Landmark> {
        self.landmarks.values().filter(|lm| lm.is_usable())
    }
}
