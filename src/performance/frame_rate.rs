use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tracing::{debug, info, warn};

/// 品質低下の段階。重い順に並ぶ
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLevel {
    #[default]
    None,
    ReducedResolution,
    ReducedFps,
    SimplifiedRendering,
}

impl FallbackLevel {
    pub fn next(self) -> Option<Self> {
        match self {
            Self::None => Some(Self::ReducedResolution),
            Self::ReducedResolution => Some(Self::ReducedFps),
            Self::ReducedFps => Some(Self::SimplifiedRendering),
            Self::SimplifiedRendering => None,
        }
    }
}

/// FPS・処理時間の閾値とデバウンス設定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRateThresholds {
    #[serde(default = "default_target_fps")]
    pub target_fps: f64,
    #[serde(default = "default_warning_fps")]
    pub warning_fps: f64,
    #[serde(default = "default_critical_fps")]
    pub critical_fps: f64,
    #[serde(default = "default_target_processing_ms")]
    pub target_processing_ms: f64,
    #[serde(default = "default_warning_processing_ms")]
    pub warning_processing_ms: f64,
    #[serde(default = "default_critical_processing_ms")]
    pub critical_processing_ms: f64,
    /// 移動平均に使うフレーム数
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// 劣化がこの時間続いたら一段階落とす
    #[serde(default = "default_debounce_window_ms")]
    pub debounce_window_ms: u64,
    /// デバウンス期間中に必要な劣化フレーム数
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
}

fn default_target_fps() -> f64 { 30.0 }
fn default_warning_fps() -> f64 { 20.0 }
fn default_critical_fps() -> f64 { 15.0 }
fn default_target_processing_ms() -> f64 { 33.0 }
fn default_warning_processing_ms() -> f64 { 50.0 }
fn default_critical_processing_ms() -> f64 { 66.0 }
fn default_window_size() -> usize { 30 }
fn default_debounce_window_ms() -> u64 { 3000 }
fn default_min_samples() -> u32 { 10 }

impl Default for FrameRateThresholds {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            warning_fps: default_warning_fps(),
            critical_fps: default_critical_fps(),
            target_processing_ms: default_target_processing_ms(),
            warning_processing_ms: default_warning_processing_ms(),
            critical_processing_ms: default_critical_processing_ms(),
            window_size: default_window_size(),
            debounce_window_ms: default_debounce_window_ms(),
            min_samples: default_min_samples(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Healthy,
    Degraded,
    Critical,
}

/// セッション終了時のログ用集計
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameRateSummary {
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub drop_rate: f64,
    pub average_fps: f64,
    pub average_processing_ms: f64,
    pub current_level: FallbackLevel,
    pub elapsed_ms: u64,
}

impl fmt::Display for FrameRateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} dropped={} ({:.1}%) avg_fps={:.1} avg_processing={:.1}ms level={:?} elapsed={}ms",
            self.total_frames,
            self.dropped_frames,
            self.drop_rate * 100.0,
            self.average_fps,
            self.average_processing_ms,
            self.current_level,
            self.elapsed_ms
        )
    }
}

pub type FallbackCallback = Box<dyn FnMut(FallbackLevel) + Send>;

/// フレームレート計測とフォールバック判定
///
/// 1フレームのノイズで段階を変えないよう、劣化が `debounce_window_ms` 続き、
/// かつ `min_samples` フレーム以上観測されたときだけ一段階落とす。
/// 段階は `reset()` 以外で戻らない。
pub struct FrameRateController {
    thresholds: FrameRateThresholds,
    frame_timestamps: VecDeque<u64>,
    processing_times: VecDeque<f64>,
    instant_fps: Option<f64>,
    total_frames: u64,
    dropped_frames: u64,
    processing_sum_ms: f64,
    processing_count: u64,
    first_frame_ms: Option<u64>,
    last_frame_ms: Option<u64>,
    degraded_since_ms: Option<u64>,
    degraded_samples: u32,
    current_level: FallbackLevel,
    on_fallback_needed: Option<FallbackCallback>,
}

impl FrameRateController {
    pub fn new(thresholds: FrameRateThresholds) -> Self {
        let window = thresholds.window_size.max(2);
        Self {
            thresholds,
            frame_timestamps: VecDeque::with_capacity(window),
            processing_times: VecDeque::with_capacity(window),
            instant_fps: None,
            total_frames: 0,
            dropped_frames: 0,
            processing_sum_ms: 0.0,
            processing_count: 0,
            first_frame_ms: None,
            last_frame_ms: None,
            degraded_since_ms: None,
            degraded_samples: 0,
            current_level: FallbackLevel::None,
            on_fallback_needed: None,
        }
    }

    pub fn thresholds(&self) -> &FrameRateThresholds {
        &self.thresholds
    }

    /// 段階を落とすべきときに呼ばれるコールバックを設定
    pub fn set_on_fallback_needed<F>(&mut self, callback: F)
    where
        F: FnMut(FallbackLevel) + Send + 'static,
    {
        self.on_fallback_needed = Some(Box::new(callback));
    }

    fn window(&self) -> usize {
        self.thresholds.window_size.max(2)
    }

    /// 処理済みフレームを記録し、フォールバック判定を行う
    pub fn record_frame(&mut self, timestamp_ms: u64) {
        if let Some(&last) = self.frame_timestamps.back() {
            let dt = timestamp_ms.saturating_sub(last);
            if dt > 0 {
                self.instant_fps = Some(1000.0 / dt as f64);
            }
        }

        if self.frame_timestamps.len() == self.window() {
            self.frame_timestamps.pop_front();
        }
        self.frame_timestamps.push_back(timestamp_ms);
        self.first_frame_ms.get_or_insert(timestamp_ms);
        self.last_frame_ms = Some(timestamp_ms);
        self.total_frames += 1;

        self.evaluate(timestamp_ms);
    }

    /// 推論1回分の処理時間 (ms)
    pub fn record_processing_time(&mut self, processing_ms: f64) {
        if self.processing_times.len() == self.window() {
            self.processing_times.pop_front();
        }
        self.processing_times.push_back(processing_ms);
        self.processing_sum_ms += processing_ms;
        self.processing_count += 1;
    }

    pub fn record_dropped_frame(&mut self) {
        self.dropped_frames += 1;
    }

    /// 直前フレームとの間隔から求めたFPS。開始直後と `mark_stream_gap` 直後は None
    pub fn instant_fps(&self) -> Option<f64> {
        self.instant_fps
    }

    /// ストリームが途切れたことを記録する (一時停止・設定切り替えからの再開)
    ///
    /// 途切れた時間をFPSに含めないよう、移動窓とデバウンスを測り直す。
    /// 累計と段階はそのまま。
    pub fn mark_stream_gap(&mut self) {
        self.frame_timestamps.clear();
        self.processing_times.clear();
        self.instant_fps = None;
        self.degraded_since_ms = None;
        self.degraded_samples = 0;
    }

    /// 直近ウィンドウの平均FPS。2フレーム未満なら None
    pub fn average_fps(&self) -> Option<f64> {
        let first = *self.frame_timestamps.front()?;
        let last = *self.frame_timestamps.back()?;
        let span = last.saturating_sub(first);
        if self.frame_timestamps.len() < 2 || span == 0 {
            return None;
        }
        Some((self.frame_timestamps.len() - 1) as f64 * 1000.0 / span as f64)
    }

    /// 直近ウィンドウの平均処理時間
    pub fn average_processing_ms(&self) -> Option<f64> {
        if self.processing_times.is_empty() {
            return None;
        }
        Some(self.processing_times.iter().sum::<f64>() / self.processing_times.len() as f64)
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// 到着フレームのうち捨てた割合
    pub fn drop_rate(&self) -> f64 {
        let arrived = self.total_frames + self.dropped_frames;
        if arrived == 0 {
            0.0
        } else {
            self.dropped_frames as f64 / arrived as f64
        }
    }

    pub fn current_level(&self) -> FallbackLevel {
        self.current_level
    }

    /// 目標FPS・目標処理時間を両方満たしているか
    pub fn meets_target(&self) -> bool {
        let fps_ok = self.average_fps().map_or(true, |fps| fps >= self.thresholds.target_fps);
        let ms_ok = self
            .average_processing_ms()
            .map_or(true, |ms| ms <= self.thresholds.target_processing_ms);
        fps_ok && ms_ok
    }

    fn health(&self) -> Health {
        let t = &self.thresholds;
        let fps = self.average_fps();
        let ms = self.average_processing_ms();

        let critical = fps.map_or(false, |v| v < t.critical_fps) || ms.map_or(false, |v| v > t.critical_processing_ms);
        if critical {
            return Health::Critical;
        }
        let degraded = fps.map_or(false, |v| v < t.warning_fps) || ms.map_or(false, |v| v > t.warning_processing_ms);
        if degraded {
            Health::Degraded
        } else {
            Health::Healthy
        }
    }

    fn evaluate(&mut self, now_ms: u64) {
        let health = self.health();
        if health == Health::Healthy {
            if self.degraded_since_ms.take().is_some() {
                debug!("frame rate recovered, debounce cleared");
            }
            self.degraded_samples = 0;
            return;
        }

        let since = *self.degraded_since_ms.get_or_insert(now_ms);
        self.degraded_samples += 1;

        let sustained = now_ms.saturating_sub(since) >= self.thresholds.debounce_window_ms;
        if sustained && self.degraded_samples >= self.thresholds.min_samples {
            self.escalate(now_ms, health);
        }
    }

    fn escalate(&mut self, now_ms: u64, health: Health) {
        // 次のウィンドウを測り直す
        self.degraded_since_ms = Some(now_ms);
        self.degraded_samples = 0;

        let Some(next) = self.current_level.next() else {
            return;
        };
        self.current_level = next;

        let fps = self.average_fps().unwrap_or(0.0);
        let processing_ms = self.average_processing_ms().unwrap_or(0.0);
        match health {
            Health::Critical => warn!(level = ?next, fps, processing_ms, "sustained critical performance, falling back"),
            _ => info!(level = ?next, fps, processing_ms, "sustained degraded performance, falling back"),
        }

        if let Some(callback) = self.on_fallback_needed.as_mut() {
            callback(next);
        }
    }

    /// 計測履歴と段階をすべて消す。コールバックと閾値は残す
    pub fn reset(&mut self) {
        self.frame_timestamps.clear();
        self.processing_times.clear();
        self.instant_fps = None;
        self.total_frames = 0;
        self.dropped_frames = 0;
        self.processing_sum_ms = 0.0;
        self.processing_count = 0;
        self.first_frame_ms = None;
        self.last_frame_ms = None;
        self.degraded_since_ms = None;
        self.degraded_samples = 0;
        self.current_level = FallbackLevel::None;
    }

    pub fn get_performance_summary(&self) -> FrameRateSummary {
        let elapsed_ms = match (self.first_frame_ms, self.last_frame_ms) {
            (Some(first), Some(last)) => last.saturating_sub(first),
            _ => 0,
        };
        let average_fps = if elapsed_ms > 0 && self.total_frames > 1 {
            (self.total_frames - 1) as f64 * 1000.0 / elapsed_ms as f64
        } else {
            0.0
        };
        let average_processing_ms = if self.processing_count > 0 {
            self.processing_sum_ms / self.processing_count as f64
        } else {
            0.0
        };

        FrameRateSummary {
            total_frames: self.total_frames,
            dropped_frames: self.dropped_frames,
            drop_rate: self.drop_rate(),
            average_fps,
            average_processing_ms,
            current_level: self.current_level,
            elapsed_ms,
        }
    }
}

impl Default for FrameRateController {
    fn default() -> Self {
        Self::new(FrameRateThresholds::default())
    }
}
