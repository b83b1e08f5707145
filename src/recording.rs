use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::camera::CameraQualityConfig;
use crate::clock::current_timestamp_ms;
use crate::error::RecorderError;
use crate::pose::{LandmarkType, PoseFrame};

/// メモリに保持する最大フレーム数 (30fpsで約60秒)
pub const MAX_FRAMES_IN_MEMORY: usize = 1800;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingState {
    #[default]
    Idle,
    Recording,
    Paused,
    Completed,
}

/// 記録用に絞ったランドマーク
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordedLandmark {
    #[serde(rename = "type")]
    pub landmark_type: LandmarkType,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedFrame {
    /// 録画ごとに0から始まる連番
    pub frame_index: u64,
    /// 録画開始からの経過ミリ秒
    pub timestamp_ms: u64,
    pub processing_time_ms: Option<f64>,
    pub overall_confidence: f64,
    pub landmarks: Vec<RecordedLandmark>,
}

impl RecordedFrame {
    /// 最低信頼度を満たすランドマークだけを残す
    fn from_pose(pose: &PoseFrame, frame_index: u64, relative_ms: u64) -> Self {
        let landmarks: Vec<RecordedLandmark> = pose
            .usable_landmarks()
            .map(|lm| RecordedLandmark {
                landmark_type: lm.landmark_type,
                x: lm.x,
                y: lm.y,
                z: lm.z,
                confidence: lm.confidence,
            })
            .collect();
        let overall_confidence = if landmarks.is_empty() {
            0.0
        } else {
            landmarks.iter().map(|lm| lm.confidence).sum::<f64>() / landmarks.len() as f64
        };

        Self {
            frame_index,
            timestamp_ms: relative_ms,
            processing_time_ms: pose.processing_time_ms,
            overall_confidence,
            landmarks,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub session_id: String,
    pub user_id: String,
    pub exercise_type: String,
    pub start_time_ms: u64,
    pub end_time_ms: Option<u64>,
    pub device_info: Option<String>,
    pub camera_config: Option<CameraQualityConfig>,
    pub average_fps: Option<f64>,
    pub total_frames: Option<u64>,
    pub dropped_frames: Option<u64>,
}

impl SessionMetadata {
    /// 終了前は None
    pub fn duration_ms(&self) -> Option<u64> {
        self.end_time_ms.map(|end| end.saturating_sub(self.start_time_ms))
    }
}

/// アップロード側に渡すペイロード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionExport {
    pub metadata: SessionMetadata,
    pub frames: Vec<RecordedFrame>,
}

/// 録画開始時の付加情報
#[derive(Debug, Clone, Default)]
pub struct RecordingOptions {
    pub device_info: Option<String>,
    pub camera_config: Option<CameraQualityConfig>,
}

/// 固定長リングバッファへの姿勢記録
///
/// 容量を超えると最も古いフレームから捨てる。
pub struct SessionRecorder {
    capacity: usize,
    state: RecordingState,
    buffer: VecDeque<RecordedFrame>,
    metadata: Option<SessionMetadata>,
    next_frame_index: u64,
    /// 最初に記録したフレームの時刻。相対時刻の原点
    timeline_origin_ms: Option<u64>,
    frame_count: u64,
    dropped_frame_count: u64,
}

impl SessionRecorder {
    pub fn new() -> Self {
        Self::with_capacity(MAX_FRAMES_IN_MEMORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: RecordingState::Idle,
            buffer: VecDeque::with_capacity(capacity),
            metadata: None,
            next_frame_index: 0,
            timeline_origin_ms: None,
            frame_count: 0,
            dropped_frame_count: 0,
        }
    }

    pub fn start_recording(
        &mut self,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        exercise_type: impl Into<String>,
    ) -> bool {
        self.start_recording_with(session_id, user_id, exercise_type, RecordingOptions::default())
    }

    /// 録画開始。録画中 (一時停止中を含む) なら何もせず false
    pub fn start_recording_with(
        &mut self,
        session_id: impl Into<String>,
        user_id: impl Into<String>,
        exercise_type: impl Into<String>,
        options: RecordingOptions,
    ) -> bool {
        if self.is_in_progress() {
            return false;
        }

        self.buffer.clear();
        self.next_frame_index = 0;
        self.timeline_origin_ms = None;
        self.frame_count = 0;
        self.dropped_frame_count = 0;

        let metadata = SessionMetadata {
            session_id: session_id.into(),
            user_id: user_id.into(),
            exercise_type: exercise_type.into(),
            start_time_ms: current_timestamp_ms(),
            end_time_ms: None,
            device_info: options.device_info,
            camera_config: options.camera_config,
            average_fps: None,
            total_frames: None,
            dropped_frames: None,
        };
        info!(
            session_id = %metadata.session_id,
            exercise = %metadata.exercise_type,
            "recording started"
        );
        self.metadata = Some(metadata);
        self.state = RecordingState::Recording;
        true
    }

    /// 録画中のみ記録する。記録したら true
    ///
    /// `pose.timestamp_ms` はカメラの時計なので壁時計の `start_time_ms` とは比べない。
    /// 相対時刻は最初に記録したフレームを 0 とする。
    pub fn record_frame(&mut self, pose: &PoseFrame) -> bool {
        if self.state != RecordingState::Recording {
            return false;
        }
        let origin_ms = *self.timeline_origin_ms.get_or_insert(pose.timestamp_ms);

        let frame = RecordedFrame::from_pose(pose, self.next_frame_index, pose.timestamp_ms.saturating_sub(origin_ms));
        self.next_frame_index += 1;

        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
            if self.dropped_frame_count == 0 {
                debug!(capacity = self.capacity, "recording buffer full, evicting oldest frames");
            }
            self.dropped_frame_count += 1;
        }
        self.buffer.push_back(frame);
        self.frame_count += 1;
        true
    }

    pub fn pause_recording(&mut self) {
        if self.state == RecordingState::Recording {
            self.state = RecordingState::Paused;
        }
    }

    pub fn resume_recording(&mut self) {
        if self.state == RecordingState::Paused {
            self.state = RecordingState::Recording;
        }
    }

    /// メタデータを確定して完了状態にする。録画していなければ None
    pub fn stop_recording(&mut self, average_fps: Option<f64>) -> Option<SessionMetadata> {
        if !self.is_in_progress() {
            return None;
        }
        let frame_count = self.frame_count;
        let dropped = self.dropped_frame_count;
        let metadata = self.metadata.as_mut()?;
        metadata.end_time_ms = Some(current_timestamp_ms());
        metadata.average_fps = average_fps;
        metadata.total_frames = Some(frame_count);
        metadata.dropped_frames = Some(dropped);
        self.state = RecordingState::Completed;

        info!(
            session_id = %metadata.session_id,
            frames = frame_count,
            evicted = dropped,
            duration_ms = metadata.duration_ms().unwrap_or(0),
            "recording stopped"
        );
        Some(metadata.clone())
    }

    pub fn export_session(&self) -> Result<SessionExport, RecorderError> {
        let metadata = self.metadata.clone().ok_or(RecorderError::NoSession)?;
        Ok(SessionExport {
            metadata,
            frames: self.buffer.iter().cloned().collect(),
        })
    }

    pub fn export_session_json(&self) -> Result<String, RecorderError> {
        let export = self.export_session()?;
        Ok(serde_json::to_string(&export)?)
    }

    /// 録画開始からの相対時刻 [start_ms, end_ms] に入るフレーム
    pub fn get_frames_in_range(&self, start_ms: u64, end_ms: u64) -> Vec<RecordedFrame> {
        self.buffer
            .iter()
            .filter(|f| f.timestamp_ms >= start_ms && f.timestamp_ms <= end_ms)
            .cloned()
            .collect()
    }

    /// 直近 n フレーム (古い順)
    pub fn get_latest_frames(&self, n: usize) -> Vec<RecordedFrame> {
        let skip = self.buffer.len().saturating_sub(n);
        self.buffer.iter().skip(skip).cloned().collect()
    }

    /// バッファとメタデータを破棄して Idle に戻す
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.metadata = None;
        self.next_frame_index = 0;
        self.timeline_origin_ms = None;
        self.frame_count = 0;
        self.dropped_frame_count = 0;
        self.state = RecordingState::Idle;
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn is_recording(&self) -> bool {
        self.state == RecordingState::Recording
    }

    fn is_in_progress(&self) -> bool {
        matches!(self.state, RecordingState::Recording | RecordingState::Paused)
    }

    pub fn metadata(&self) -> Option<&SessionMetadata> {
        self.metadata.as_ref()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// バッファ溢れで捨てたフレーム数
    pub fn dropped_frame_count(&self) -> u64 {
        self.dropped_frame_count
    }

    pub fn buffered_frames(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SessionRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::Landmark;

    fn pose_at(timestamp_ms: u64, confidence: f64) -> PoseFrame {
        PoseFrame::new(
            [
                Landmark::new(LandmarkType::LeftShoulder, 0.4, 0.3, 0.0, confidence),
                Landmark::new(LandmarkType::RightShoulder, 0.6, 0.3, 0.0, confidence),
                Landmark::new(LandmarkType::LeftHip, 0.45, 0.6, 0.0, confidence),
            ],
            timestamp_ms,
        )
        .with_processing_time(12.0)
    }

    fn started(recorder: &mut SessionRecorder) -> u64 {
        assert!(recorder.start_recording("s1", "u1", "squat"));
        recorder.metadata().unwrap().start_time_ms
    }

    #[test]
    fn test_record_five_frames() {
        let mut recorder = SessionRecorder::new();
        let start = started(&mut recorder);
        for i in 0..5 {
            assert!(recorder.record_frame(&pose_at(start + i * 33, 0.9)));
        }

        assert_eq!(recorder.frame_count(), 5);
        assert_eq!(recorder.dropped_frame_count(), 0);

        let export = recorder.export_session().unwrap();
        assert_eq!(export.frames.len(), 5);
        assert_eq!(export.frames[0].frame_index, 0);
        assert_eq!(export.frames[0].timestamp_ms, 0);
        assert_eq!(export.frames[4].timestamp_ms, 132);
        assert_eq!(export.frames[0].landmarks.len(), 3);
        assert!((export.frames[0].overall_confidence - 0.9).abs() < 1e-9);
        assert_eq!(export.frames[0].processing_time_ms, Some(12.0));
    }

    #[test]
    fn test_relative_time_follows_camera_clock() {
        let mut recorder = SessionRecorder::new();
        started(&mut recorder);
        // カメラの時計は起動からの経過時間で、壁時計とは無関係
        for ts in [5_000, 5_500, 6_000] {
            assert!(recorder.record_frame(&pose_at(ts, 0.9)));
        }
        recorder.pause_recording();
        recorder.resume_recording();
        recorder.record_frame(&pose_at(9_000, 0.9));

        let times: Vec<u64> = recorder.get_latest_frames(10).iter().map(|f| f.timestamp_ms).collect();
        assert_eq!(times, vec![0, 500, 1_000, 4_000]);
        assert_eq!(recorder.get_frames_in_range(400, 1_000).len(), 2);

        // 新しい録画では原点を取り直す
        recorder.stop_recording(None);
        started(&mut recorder);
        recorder.record_frame(&pose_at(20_000, 0.9));
        assert_eq!(recorder.get_latest_frames(1)[0].timestamp_ms, 0);
    }

    #[test]
    fn test_only_usable_landmarks_recorded() {
        let mut recorder = SessionRecorder::new();
        let start = started(&mut recorder);
        let mut pose = pose_at(start, 0.9);
        pose.landmarks.insert(
            LandmarkType::Nose,
            Landmark::new(LandmarkType::Nose, 0.5, 0.1, 0.0, 0.3),
        );
        recorder.record_frame(&pose);

        let frame = &recorder.get_latest_frames(1)[0];
        assert_eq!(frame.landmarks.len(), 3);
        assert!(frame.landmarks.iter().all(|lm| lm.landmark_type != LandmarkType::Nose));
    }

    #[test]
    fn test_buffer_evicts_oldest() {
        let mut recorder = SessionRecorder::new();
        let start = started(&mut recorder);
        let n = 2000u64;
        for i in 0..n {
            recorder.record_frame(&pose_at(start + i * 33, 0.9));
        }

        assert_eq!(recorder.buffered_frames(), MAX_FRAMES_IN_MEMORY);
        assert_eq!(recorder.frame_count(), n);
        assert_eq!(recorder.dropped_frame_count(), n - MAX_FRAMES_IN_MEMORY as u64);

        let export = recorder.export_session().unwrap();
        let indices: Vec<u64> = export.frames.iter().map(|f| f.frame_index).collect();
        let expected: Vec<u64> = (n - MAX_FRAMES_IN_MEMORY as u64..n).collect();
        assert_eq!(indices, expected);
    }

    #[test]
    fn test_record_ignored_unless_recording() {
        let mut recorder = SessionRecorder::new();
        assert!(!recorder.record_frame(&pose_at(0, 0.9)));

        let start = started(&mut recorder);
        recorder.pause_recording();
        assert_eq!(recorder.state(), RecordingState::Paused);
        assert!(!recorder.record_frame(&pose_at(start, 0.9)));

        recorder.resume_recording();
        assert!(recorder.record_frame(&pose_at(start + 33, 0.9)));
        assert_eq!(recorder.frame_count(), 1);
        // 一時停止しても連番は途切れない
        assert_eq!(recorder.get_latest_frames(1)[0].frame_index, 0);
    }

    #[test]
    fn test_start_is_noop_while_recording() {
        let mut recorder = SessionRecorder::new();
        let start = started(&mut recorder);
        recorder.record_frame(&pose_at(start, 0.9));
        assert!(!recorder.start_recording("s2", "u1", "lunge"));
        assert_eq!(recorder.metadata().unwrap().session_id, "s1");
        assert_eq!(recorder.buffered_frames(), 1);
    }

    #[test]
    fn test_stop_finalizes_metadata() {
        let mut recorder = SessionRecorder::new();
        let start = started(&mut recorder);
        assert!(recorder.metadata().unwrap().duration_ms().is_none());
        for i in 0..3 {
            recorder.record_frame(&pose_at(start + i * 33, 0.9));
        }

        let metadata = recorder.stop_recording(Some(29.5)).unwrap();
        assert_eq!(recorder.state(), RecordingState::Completed);
        assert_eq!(metadata.total_frames, Some(3));
        assert_eq!(metadata.dropped_frames, Some(0));
        assert_eq!(metadata.average_fps, Some(29.5));
        assert!(metadata.duration_ms().is_some());

        // 完了後は記録しない、再停止もしない
        assert!(!recorder.record_frame(&pose_at(start + 200, 0.9)));
        assert!(recorder.stop_recording(None).is_none());
    }

    #[test]
    fn test_new_recording_after_completion_resets_index() {
        let mut recorder = SessionRecorder::new();
        let start = started(&mut recorder);
        recorder.record_frame(&pose_at(start, 0.9));
        recorder.record_frame(&pose_at(start + 33, 0.9));
        recorder.stop_recording(None);

        let start = started(&mut recorder);
        recorder.record_frame(&pose_at(start, 0.9));
        assert_eq!(recorder.buffered_frames(), 1);
        assert_eq!(recorder.get_latest_frames(5)[0].frame_index, 0);
    }

    #[test]
    fn test_export_without_session_fails() {
        let recorder = SessionRecorder::new();
        assert!(matches!(recorder.export_session(), Err(RecorderError::NoSession)));
        assert!(recorder.export_session_json().is_err());
    }

    #[test]
    fn test_export_json_shape() {
        let mut recorder = SessionRecorder::new();
        let start = started(&mut recorder);
        recorder.record_frame(&pose_at(start, 0.9));
        recorder.stop_recording(Some(30.0));

        let json = recorder.export_session_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["metadata"]["sessionId"], "s1");
        assert_eq!(value["metadata"]["exerciseType"], "squat");
        assert_eq!(value["frames"][0]["frameIndex"], 0);
        assert_eq!(value["frames"][0]["landmarks"][0]["type"], "left_shoulder");
    }

    #[test]
    fn test_range_and_latest_queries() {
        let mut recorder = SessionRecorder::new();
        let start = started(&mut recorder);
        for i in 0..10 {
            recorder.record_frame(&pose_at(start + i * 100, 0.9));
        }

        let range = recorder.get_frames_in_range(200, 500);
        let indices: Vec<u64> = range.iter().map(|f| f.frame_index).collect();
        assert_eq!(indices, vec![2, 3, 4, 5]);

        let latest = recorder.get_latest_frames(3);
        let indices: Vec<u64> = latest.iter().map(|f| f.frame_index).collect();
        assert_eq!(indices, vec![7, 8, 9]);

        assert_eq!(recorder.get_latest_frames(50).len(), 10);
        assert!(recorder.get_frames_in_range(5_000, 6_000).is_empty());
    }

    #[test]
    fn test_clear_returns_to_idle() {
        let mut recorder = SessionRecorder::new();
        let start = started(&mut recorder);
        recorder.record_frame(&pose_at(start, 0.9));
        recorder.clear();
        assert_eq!(recorder.state(), RecordingState::Idle);
        assert_eq!(recorder.buffered_frames(), 0);
        assert!(recorder.metadata().is_none());
        assert!(recorder.export_session().is_err());
    }
}
