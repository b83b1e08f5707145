//! パイプラインと端末の指標を定期的に集計してアラートにする
//!
//! フレーム経路 (`record_frame`, `record_dropped_frame`) とプラットフォーム
//! (`update_system_metrics`) から値を受け取り、評価は自前のタイマーで行う。
//! フレーム経路側は短いロックを取るだけ。

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::current_timestamp_ms;

/// 端末の発熱状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThermalState {
    Nominal,
    Fair,
    Serious,
    Critical,
}

/// プラットフォーム側から渡される値。ここでは計測しない
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub memory_usage_mb: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    /// 0.0〜1.0
    pub battery_level: Option<f64>,
    pub is_charging: Option<bool>,
    pub thermal_state: Option<ThermalState>,
}

impl SystemMetrics {
    /// `Some` の項目だけ上書き
    fn merge(&mut self, update: SystemMetrics) {
        if update.memory_usage_mb.is_some() {
            self.memory_usage_mb = update.memory_usage_mb;
        }
        if update.cpu_usage_percent.is_some() {
            self.cpu_usage_percent = update.cpu_usage_percent;
        }
        if update.battery_level.is_some() {
            self.battery_level = update.battery_level;
        }
        if update.is_charging.is_some() {
            self.is_charging = update.is_charging;
        }
        if update.thermal_state.is_some() {
            self.thermal_state = update.thermal_state;
        }
    }
}

/// ある時点のスナップショット
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub timestamp_ms: u64,
    pub fps: f64,
    pub processing_time_ms: f64,
    pub frame_drop_rate: f64,
    pub memory_usage_mb: Option<f64>,
    pub cpu_usage_percent: Option<f64>,
    pub battery_level: Option<f64>,
    pub is_charging: Option<bool>,
    pub thermal_state: Option<ThermalState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    LowFps,
    HighProcessingTime,
    HighFrameDropRate,
    HighMemory,
    LowBattery,
    ThermalThrottling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceAlert {
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub level: AlertLevel,
    pub message: String,
    pub timestamp_ms: u64,
}

/// 全体の状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceLevel {
    Optimal,
    #[default]
    Acceptable,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThresholds {
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
    #[serde(default = "default_warning_drop_rate")]
    pub warning_drop_rate: f64,
    #[serde(default = "default_critical_drop_rate")]
    pub critical_drop_rate: f64,
    #[serde(default = "default_warning_memory_mb")]
    pub warning_memory_mb: f64,
    #[serde(default = "default_critical_memory_mb")]
    pub critical_memory_mb: f64,
    #[serde(default = "default_warning_battery")]
    pub warning_battery: f64,
    #[serde(default = "default_critical_battery")]
    pub critical_battery: f64,
    #[serde(default = "default_warning_thermal")]
    pub warning_thermal: ThermalState,
    #[serde(default = "default_critical_thermal")]
    pub critical_thermal: ThermalState,
}

fn default_target_fps() -> f64 { 30.0 }
fn default_warning_fps() -> f64 { 20.0 }
fn default_critical_fps() -> f64 { 15.0 }
fn default_target_processing_ms() -> f64 { 33.0 }
fn default_warning_processing_ms() -> f64 { 50.0 }
fn default_critical_processing_ms() -> f64 { 66.0 }
fn default_warning_drop_rate() -> f64 { 0.1 }
fn default_critical_drop_rate() -> f64 { 0.25 }
fn default_warning_memory_mb() -> f64 { 300.0 }
fn default_critical_memory_mb() -> f64 { 500.0 }
fn default_warning_battery() -> f64 { 0.2 }
fn default_critical_battery() -> f64 { 0.1 }
fn default_warning_thermal() -> ThermalState { ThermalState::Serious }
fn default_critical_thermal() -> ThermalState { ThermalState::Critical }

impl Default for PerformanceThresholds {
    fn default() -> Self {
        Self {
            target_fps: default_target_fps(),
            warning_fps: default_warning_fps(),
            critical_fps: default_critical_fps(),
            target_processing_ms: default_target_processing_ms(),
            warning_processing_ms: default_warning_processing_ms(),
            critical_processing_ms: default_critical_processing_ms(),
            warning_drop_rate: default_warning_drop_rate(),
            critical_drop_rate: default_critical_drop_rate(),
            warning_memory_mb: default_warning_memory_mb(),
            critical_memory_mb: default_critical_memory_mb(),
            warning_battery: default_warning_battery(),
            critical_battery: default_critical_battery(),
            warning_thermal: default_warning_thermal(),
            critical_thermal: default_critical_thermal(),
        }
    }
}

/// 監視終了時のログ用集計
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSummary {
    pub samples: u64,
    pub average_fps: f64,
    pub min_fps: f64,
    pub max_fps: f64,
    pub average_processing_ms: f64,
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub alert_count: u64,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub thresholds: PerformanceThresholds,
    pub tick_interval: Duration,
    /// 移動平均のサンプル数。履歴の保持数も兼ねる
    pub sample_window: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            thresholds: PerformanceThresholds::default(),
            tick_interval: Duration::from_secs(1),
            sample_window: 60,
        }
    }
}

struct MonitorState {
    fps_samples: VecDeque<f64>,
    processing_samples: VecDeque<f64>,
    total_frames: u64,
    dropped_frames: u64,
    fps_sum: f64,
    fps_count: u64,
    processing_sum: f64,
    system: SystemMetrics,
    history: VecDeque<PerformanceMetrics>,
    alerts: Vec<PerformanceAlert>,
    level: PerformanceLevel,
    started_at_ms: Option<u64>,
    ticks: u64,
    alert_count: u64,
    min_fps: Option<f64>,
    max_fps: Option<f64>,
}

impl MonitorState {
    fn new(window: usize) -> Self {
        Self {
            fps_samples: VecDeque::with_capacity(window),
            processing_samples: VecDeque::with_capacity(window),
            total_frames: 0,
            dropped_frames: 0,
            fps_sum: 0.0,
            fps_count: 0,
            processing_sum: 0.0,
            system: SystemMetrics::default(),
            history: VecDeque::with_capacity(window),
            alerts: Vec::new(),
            level: PerformanceLevel::default(),
            started_at_ms: None,
            ticks: 0,
            alert_count: 0,
            min_fps: None,
            max_fps: None,
        }
    }
}

fn push_bounded<T>(queue: &mut VecDeque<T>, value: T, capacity: usize) {
    if queue.len() >= capacity {
        queue.pop_front();
    }
    queue.push_back(value);
}

fn mean(values: &VecDeque<f64>) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

struct Inner {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    alerts_tx: watch::Sender<Vec<PerformanceAlert>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// 性能モニタ。セッション制御とは独立に開始・停止する
#[derive(Clone)]
pub struct PerformanceMonitor {
    inner: Arc<Inner>,
}

impl PerformanceMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let window = config.sample_window.max(1);
        let (alerts_tx, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(MonitorState::new(window)),
                alerts_tx,
                task: Mutex::new(None),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, MonitorState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn window(&self) -> usize {
        self.inner.config.sample_window.max(1)
    }

    pub fn thresholds(&self) -> &PerformanceThresholds {
        &self.inner.config.thresholds
    }

    /// 計測をリセットして定期評価タスクを開始。すでに動いていれば何もしない
    ///
    /// tokio ランタイム内から呼ぶこと。
    pub fn start(&self) {
        let mut task = self.inner.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.is_some() {
            return;
        }

        *self.state() = MonitorState::new(self.window());
        self.state().started_at_ms = Some(current_timestamp_ms());

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.tick_interval;
        *task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // 最初のtickは即時に完了する
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                PerformanceMonitor { inner }.evaluate_now(current_timestamp_ms());
            }
        }));
        info!(interval_ms = period.as_millis() as u64, "performance monitoring started");
    }

    pub fn stop(&self) {
        let handle = self.inner.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            let summary = self.get_summary();
            info!(?summary, "performance monitoring stopped");
        }
    }

    pub fn is_monitoring(&self) -> bool {
        self.inner
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// 処理済みフレーム1つ分
    ///
    /// 直前のフレームが無い (開始直後・再開直後) ときは `fps` に None を渡す。
    /// その場合は処理時間だけ記録する。
    pub fn record_frame(&self, fps: Option<f64>, processing_ms: f64) {
        let window = self.window();
        let mut state = self.state();
        if let Some(fps) = fps {
            push_bounded(&mut state.fps_samples, fps, window);
            state.fps_sum += fps;
            state.fps_count += 1;
        }
        push_bounded(&mut state.processing_samples, processing_ms, window);
        state.processing_sum += processing_ms;
        state.total_frames += 1;
    }

    pub fn record_dropped_frame(&self) {
        self.state().dropped_frames += 1;
    }

    /// プラットフォームからのシステム指標を反映
    pub fn update_system_metrics(&self, metrics: SystemMetrics) {
        self.state().system.merge(metrics);
    }

    /// 1回分の評価。通常はタイマーから呼ばれる
    pub fn evaluate_now(&self, now_ms: u64) -> PerformanceMetrics {
        let thresholds = &self.inner.config.thresholds;
        let window = self.window();
        let mut state = self.state();

        let avg_fps = mean(&state.fps_samples);
        let avg_ms = mean(&state.processing_samples);
        let arrived = state.total_frames + state.dropped_frames;
        let drop_rate = if arrived == 0 {
            0.0
        } else {
            state.dropped_frames as f64 / arrived as f64
        };

        let metrics = PerformanceMetrics {
            timestamp_ms: now_ms,
            fps: avg_fps.unwrap_or(0.0),
            processing_time_ms: avg_ms.unwrap_or(0.0),
            frame_drop_rate: drop_rate,
            memory_usage_mb: state.system.memory_usage_mb,
            cpu_usage_percent: state.system.cpu_usage_percent,
            battery_level: state.system.battery_level,
            is_charging: state.system.is_charging,
            thermal_state: state.system.thermal_state,
        };

        let alerts = evaluate_alerts(&metrics, avg_fps.is_some(), arrived > 0, thresholds);
        let level = overall_level(&alerts, avg_fps, avg_ms, thresholds);

        for alert in &alerts {
            let is_new = !state
                .alerts
                .iter()
                .any(|a| a.alert_type == alert.alert_type && a.level == alert.level);
            if is_new {
                state.alert_count += 1;
                warn!(alert = ?alert.alert_type, level = ?alert.level, "{}", alert.message);
            }
        }
        if level != state.level {
            debug!(from = ?state.level, to = ?level, "performance level changed");
        }

        if let Some(fps) = avg_fps {
            state.min_fps = Some(state.min_fps.map_or(fps, |m| m.min(fps)));
            state.max_fps = Some(state.max_fps.map_or(fps, |m| m.max(fps)));
        }
        state.ticks += 1;
        state.level = level;
        state.alerts = alerts.clone();
        push_bounded(&mut state.history, metrics.clone(), window);
        drop(state);

        self.inner.alerts_tx.send_replace(alerts);
        metrics
    }

    pub fn current_level(&self) -> PerformanceLevel {
        self.state().level
    }

    pub fn active_alerts(&self) -> Vec<PerformanceAlert> {
        self.state().alerts.clone()
    }

    /// 評価のたびに最新のアラート一覧が届く
    pub fn subscribe_alerts(&self) -> watch::Receiver<Vec<PerformanceAlert>> {
        self.inner.alerts_tx.subscribe()
    }

    pub fn history(&self) -> Vec<PerformanceMetrics> {
        self.state().history.iter().cloned().collect()
    }

    pub fn latest_metrics(&self) -> Option<PerformanceMetrics> {
        self.state().history.back().cloned()
    }

    pub fn get_summary(&self) -> MonitorSummary {
        let state = self.state();
        let elapsed_ms = state
            .started_at_ms
            .map_or(0, |start| current_timestamp_ms().saturating_sub(start));
        let average = |sum: f64, count: u64| {
            if count == 0 {
                0.0
            } else {
                sum / count as f64
            }
        };
        MonitorSummary {
            samples: state.ticks,
            average_fps: average(state.fps_sum, state.fps_count),
            min_fps: state.min_fps.unwrap_or(0.0),
            max_fps: state.max_fps.unwrap_or(0.0),
            average_processing_ms: average(state.processing_sum, state.total_frames),
            total_frames: state.total_frames,
            dropped_frames: state.dropped_frames,
            alert_count: state.alert_count,
            elapsed_ms,
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

fn alert(alert_type: AlertType, level: AlertLevel, message: String, timestamp_ms: u64) -> PerformanceAlert {
    PerformanceAlert {
        alert_type,
        level,
        message,
        timestamp_ms,
    }
}

fn evaluate_alerts(
    m: &PerformanceMetrics,
    has_frame_samples: bool,
    has_arrivals: bool,
    t: &PerformanceThresholds,
) -> Vec<PerformanceAlert> {
    let mut alerts = Vec::new();
    let ts = m.timestamp_ms;

    if has_frame_samples {
        if m.fps < t.critical_fps {
            alerts.push(alert(AlertType::LowFps, AlertLevel::Critical, format!("FPS critically low: {:.1}", m.fps), ts));
        } else if m.fps < t.warning_fps {
            alerts.push(alert(AlertType::LowFps, AlertLevel::Warning, format!("FPS below target: {:.1}", m.fps), ts));
        }

        if m.processing_time_ms > t.critical_processing_ms {
            alerts.push(alert(
                AlertType::HighProcessingTime,
                AlertLevel::Critical,
                format!("Processing time critically high: {:.1}ms", m.processing_time_ms),
                ts,
            ));
        } else if m.processing_time_ms > t.warning_processing_ms {
            alerts.push(alert(
                AlertType::HighProcessingTime,
                AlertLevel::Warning,
                format!("Processing time high: {:.1}ms", m.processing_time_ms),
                ts,
            ));
        }
    }

    if has_arrivals {
        let percent = m.frame_drop_rate * 100.0;
        if m.frame_drop_rate >= t.critical_drop_rate {
            alerts.push(alert(AlertType::HighFrameDropRate, AlertLevel::Critical, format!("Dropping {:.0}% of frames", percent), ts));
        } else if m.frame_drop_rate >= t.warning_drop_rate {
            alerts.push(alert(AlertType::HighFrameDropRate, AlertLevel::Warning, format!("Dropping {:.0}% of frames", percent), ts));
        }
    }

    if let Some(memory) = m.memory_usage_mb {
        if memory >= t.critical_memory_mb {
            alerts.push(alert(AlertType::HighMemory, AlertLevel::Critical, format!("Memory usage critical: {:.0}MB", memory), ts));
        } else if memory >= t.warning_memory_mb {
            alerts.push(alert(AlertType::HighMemory, AlertLevel::Warning, format!("Memory usage high: {:.0}MB", memory), ts));
        }
    }

    // 充電中はバッテリー残量を問わない
    if let (Some(battery), false) = (m.battery_level, m.is_charging.unwrap_or(false)) {
        let percent = battery * 100.0;
        if battery <= t.critical_battery {
            alerts.push(alert(AlertType::LowBattery, AlertLevel::Critical, format!("Battery critically low: {:.0}%", percent), ts));
        } else if battery <= t.warning_battery {
            alerts.push(alert(AlertType::LowBattery, AlertLevel::Warning, format!("Battery low: {:.0}%", percent), ts));
        }
    }

    if let Some(thermal) = m.thermal_state {
        if thermal >= t.critical_thermal {
            alerts.push(alert(AlertType::ThermalThrottling, AlertLevel::Critical, format!("Device thermal state {:?}", thermal), ts));
        } else if thermal >= t.warning_thermal {
            alerts.push(alert(AlertType::ThermalThrottling, AlertLevel::Warning, format!("Device thermal state {:?}", thermal), ts));
        }
    }

    alerts
}

fn overall_level(
    alerts: &[PerformanceAlert],
    avg_fps: Option<f64>,
    avg_ms: Option<f64>,
    t: &PerformanceThresholds,
) -> PerformanceLevel {
    if alerts.iter().any(|a| a.level == AlertLevel::Critical) {
        return PerformanceLevel::Critical;
    }
    if alerts.iter().any(|a| a.level == AlertLevel::Warning) {
        return PerformanceLevel::Warning;
    }
    match (avg_fps, avg_ms) {
        (Some(fps), Some(ms)) if fps >= t.target_fps && ms <= t.target_processing_ms => PerformanceLevel::Optimal,
        _ => PerformanceLevel::Acceptable,
    }
}
