//! カメラストリーム・推論・品質フォールバックのまとめ役
//!
//! 推論は同時に1つだけ。実行中に届いたフレームはキューに積まずドロップとして数える。
//! 推論器は呼び出しを取り消せないので、完了した結果はセッションがまだ Active の
//! ときだけ反映し、一時停止・停止の後に届いたものは捨てる。

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::state::{SessionPhase, SessionState};
use crate::camera::{CameraFrame, CameraQualityConfig, CameraSource, DeviceOrientation, FrameCallback, LensDirection, Size};
use crate::clock::current_timestamp_ms;
use crate::error::SessionError;
use crate::performance::{FallbackLevel, FrameRateController, FrameRateSummary, PerformanceMonitor};
use crate::pose::{DetectorConfig, PoseDetector, PoseFrame};
use crate::recording::SessionRecorder;
use crate::render::{CoordinateTransformer, SkeletonOverlay, TransformParams};

/// セッションで使うレンズ (インカメラ固定)
pub const SESSION_LENS: LensDirection = LensDirection::Front;

/// コントローラとアプリ側で共有する録画器
pub type SharedRecorder = Arc<Mutex<SessionRecorder>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub detector: DetectorConfig,
    /// 外接矩形に足す余白 (矩形の幅・高さに対する割合)
    #[serde(default = "default_bounding_box_padding")]
    pub bounding_box_padding: f64,
}

fn default_bounding_box_padding() -> f64 {
    0.1
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            bounding_box_padding: default_bounding_box_padding(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// 座標変換に必要なカメラと端末の向き
struct ViewGeometry {
    image_size: Option<Size>,
    sensor_orientation: u32,
    device_orientation: DeviceOrientation,
}

struct Inner {
    config: SessionConfig,
    camera: AsyncMutex<Box<dyn CameraSource>>,
    detector: AsyncMutex<Box<dyn PoseDetector>>,
    frame_rate: Mutex<FrameRateController>,
    state_tx: watch::Sender<SessionState>,
    is_processing_frame: AtomicBool,
    geometry: Mutex<ViewGeometry>,
    recorder: Mutex<Option<SharedRecorder>>,
    monitor: Mutex<Option<PerformanceMonitor>>,
    fallback_rx: Mutex<Option<mpsc::UnboundedReceiver<FallbackLevel>>>,
    fallback_task: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn phase(&self) -> SessionPhase {
        self.state_tx.borrow().phase
    }

    fn frame_callback(self: &Arc<Self>, runtime: Handle) -> FrameCallback {
        let weak = Arc::downgrade(self);
        Box::new(move |frame: CameraFrame| {
            if let Some(inner) = weak.upgrade() {
                inner.on_frame(&runtime, frame);
            }
        })
    }

    /// カメラスレッドから呼ばれる。ここでは待たない
    fn on_frame(self: &Arc<Self>, runtime: &Handle, frame: CameraFrame) {
        if self.phase() != SessionPhase::Active {
            return;
        }
        if self.is_processing_frame.swap(true, Ordering::AcqRel) {
            self.record_dropped_frame();
            return;
        }

        let inner = Arc::clone(self);
        runtime.spawn(async move {
            inner.process_frame(frame).await;
        });
    }

    async fn process_frame(self: Arc<Self>, frame: CameraFrame) {
        let rotation = self.detector_rotation();
        let started = Instant::now();
        let result = {
            let mut detector = self.detector.lock().await;
            detector.process_image(&frame, rotation).await
        };
        let processing_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(pose) => self.apply_result(pose, frame.timestamp_ms, processing_ms),
            Err(e) => {
                warn!(timestamp_ms = frame.timestamp_ms, "Pose processing failed: {e:#}");
                self.record_dropped_frame();
            }
        }
        self.is_processing_frame.store(false, Ordering::Release);
    }

    fn apply_result(&self, pose: Option<PoseFrame>, frame_timestamp_ms: u64, processing_ms: f64) {
        let pose = pose.map(|p| match p.processing_time_ms {
            Some(_) => p,
            None => p.with_processing_time(processing_ms),
        });

        let mut applied = false;
        self.state_tx.send_if_modified(|state| {
            if state.phase != SessionPhase::Active {
                return false;
            }
            state.current_pose = pose.clone();
            state.total_frames_processed += 1;
            applied = true;
            true
        });
        if !applied {
            debug!(frame_timestamp_ms, "session no longer active, discarding pose");
            return;
        }

        // フォールバック判定はここで走る
        let fps = {
            let mut frame_rate = lock(&self.frame_rate);
            frame_rate.record_processing_time(processing_ms);
            frame_rate.record_frame(frame_timestamp_ms);
            frame_rate.instant_fps()
        };

        if let Some(monitor) = lock(&self.monitor).as_ref() {
            monitor.record_frame(fps, processing_ms);
        }
        if let Some(pose) = pose.as_ref() {
            if let Some(recorder) = lock(&self.recorder).as_ref() {
                lock(recorder).record_frame(pose);
            }
        }
    }

    fn record_dropped_frame(&self) {
        let dropped = {
            let mut frame_rate = lock(&self.frame_rate);
            frame_rate.record_dropped_frame();
            frame_rate.dropped_frames()
        };
        if let Some(monitor) = lock(&self.monitor).as_ref() {
            monitor.record_dropped_frame();
        }
        self.state_tx.send_modify(|state| state.dropped_frames = dropped);
    }

    fn detector_rotation(&self) -> u32 {
        let geometry = lock(&self.geometry);
        CoordinateTransformer::rotation_angle(SESSION_LENS, geometry.device_orientation, geometry.sensor_orientation)
    }

    fn update_geometry(&self, camera: &dyn CameraSource) {
        let mut geometry = lock(&self.geometry);
        geometry.image_size = camera.image_size();
        geometry.sensor_orientation = camera.sensor_orientation();
    }
}

/// 姿勢推定セッションの制御
///
/// `Clone` は同じセッションへのハンドルを返す。状態は [`subscribe`](Self::subscribe)
/// で購読するか [`state`](Self::state) でスナップショットを取る。
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    /// `frame_rate` のフォールバックコールバックはコントローラが上書きする
    pub fn new(
        camera: Box<dyn CameraSource>,
        detector: Box<dyn PoseDetector>,
        mut frame_rate: FrameRateController,
        config: SessionConfig,
    ) -> Self {
        let (fallback_tx, fallback_rx) = mpsc::unbounded_channel();
        frame_rate.set_on_fallback_needed(move |level| {
            // 受信側が無いのは終了処理中のみ
            let _ = fallback_tx.send(level);
        });
        let (state_tx, _) = watch::channel(SessionState::default());

        Self {
            inner: Arc::new(Inner {
                config,
                camera: AsyncMutex::new(camera),
                detector: AsyncMutex::new(detector),
                frame_rate: Mutex::new(frame_rate),
                state_tx,
                is_processing_frame: AtomicBool::new(false),
                geometry: Mutex::new(ViewGeometry {
                    image_size: None,
                    sensor_orientation: 0,
                    device_orientation: DeviceOrientation::PortraitUp,
                }),
                recorder: Mutex::new(None),
                monitor: Mutex::new(None),
                fallback_rx: Mutex::new(Some(fallback_rx)),
                fallback_task: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.state_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.phase()
    }

    /// 推論が実行中か
    pub fn is_processing_frame(&self) -> bool {
        self.inner.is_processing_frame.load(Ordering::Acquire)
    }

    /// 受理した姿勢を録画器にも渡す
    pub fn attach_recorder(&self, recorder: SharedRecorder) {
        *lock(&self.inner.recorder) = Some(recorder);
    }

    pub fn detach_recorder(&self) -> Option<SharedRecorder> {
        lock(&self.inner.recorder).take()
    }

    /// 処理時間・FPS・ドロップをモニタにも送る。開始・停止は呼び出し側で行う
    pub fn attach_monitor(&self, monitor: PerformanceMonitor) {
        *lock(&self.inner.monitor) = Some(monitor);
    }

    pub fn set_device_orientation(&self, orientation: DeviceOrientation) {
        lock(&self.inner.geometry).device_orientation = orientation;
    }

    pub fn device_orientation(&self) -> DeviceOrientation {
        lock(&self.inner.geometry).device_orientation
    }

    /// 推論器に渡す回転角 (度)
    pub fn detector_rotation(&self) -> u32 {
        self.inner.detector_rotation()
    }

    pub fn performance_summary(&self) -> FrameRateSummary {
        lock(&self.inner.frame_rate).get_performance_summary()
    }

    /// 現在のカメラと端末の向きに合わせた変換器
    ///
    /// カメラ初期化前は設定上の解像度を画像サイズとして使う。
    pub fn transformer(&self, screen_size: Size) -> CoordinateTransformer {
        let config_size = {
            let (width, height) = self.inner.state_tx.borrow().current_config.resolution.dimensions();
            Size::new(width as f64, height as f64)
        };
        let geometry = lock(&self.inner.geometry);
        CoordinateTransformer::new(TransformParams {
            image_size: geometry.image_size.unwrap_or(config_size),
            screen_size,
            lens_direction: SESSION_LENS,
            device_orientation: geometry.device_orientation,
            sensor_orientation: geometry.sensor_orientation,
        })
    }

    /// 最新の姿勢を画面座標に変換した骨格。姿勢が無ければ None
    pub fn overlay(&self, screen_size: Size) -> Option<SkeletonOverlay> {
        let (pose, simplified) = {
            let state = self.inner.state_tx.borrow();
            (state.current_pose.clone()?, state.simplified_rendering())
        };
        let transformer = self.transformer(screen_size);
        Some(SkeletonOverlay::build(
            &pose,
            &transformer,
            self.inner.config.bounding_box_padding,
            simplified,
        ))
    }

    /// セッション開始。実行中なら何もせず false
    ///
    /// 推論器、カメラの順に初期化する。失敗すると `error_message` を設定して
    /// `Idle` に戻り false を返す。
    pub async fn start_session(&self, config: CameraQualityConfig) -> bool {
        let mut accepted = false;
        self.inner.state_tx.send_if_modified(|state| {
            if state.phase.is_running() {
                return false;
            }
            *state = SessionState {
                phase: SessionPhase::Initializing,
                is_initializing: true,
                current_config: config.clone(),
                ..SessionState::default()
            };
            accepted = true;
            true
        });
        if !accepted {
            debug!(phase = ?self.phase(), "session already running, ignoring start");
            return false;
        }

        self.ensure_fallback_task();
        info!(config = %config.label(), "starting pose session");

        let detector_result = {
            let mut detector = self.inner.detector.lock().await;
            detector.initialize(&self.inner.config.detector).await
        };
        if let Err(e) = detector_result {
            return self.fail_start(SessionError::DetectorInitialization(format!("{e:#}")));
        }

        // 以降、停止された場合はカメラのロック内で気付いて取得済みのものを返す
        let camera_error = {
            let mut camera = self.inner.camera.lock().await;
            if !self.is_initializing() {
                drop(camera);
                return self.abandon_start().await;
            }
            match camera.initialize(&config, SESSION_LENS).await {
                Ok(true) => {
                    self.inner.update_geometry(&**camera);
                    None
                }
                Ok(false) => Some("camera unavailable".to_string()),
                Err(e) => Some(format!("{e:#}")),
            }
        };
        if let Some(message) = camera_error {
            self.inner.detector.lock().await.close().await;
            return self.fail_start(SessionError::CameraInitialization(message));
        }

        lock(&self.inner.frame_rate).reset();
        self.inner.is_processing_frame.store(false, Ordering::Release);

        let stream_result = {
            let callback = self.inner.frame_callback(Handle::current());
            let mut camera = self.inner.camera.lock().await;
            if !self.is_initializing() {
                camera.dispose().await;
                drop(camera);
                return self.abandon_start().await;
            }
            let result = camera.start_stream(callback).await;
            if result.is_err() {
                camera.dispose().await;
            }
            result
        };
        if let Err(e) = stream_result {
            self.inner.detector.lock().await.close().await;
            return self.fail_start(SessionError::CameraStream(format!("{e:#}")));
        }

        // ストリーム開始後に停止された場合、カメラの後始末は stop_session 側で行われる
        let started_at = current_timestamp_ms();
        let activated = self.inner.state_tx.send_if_modified(|state| {
            if state.phase != SessionPhase::Initializing {
                return false;
            }
            state.phase = SessionPhase::Active;
            state.is_initializing = false;
            state.session_start_time_ms = Some(started_at);
            true
        });
        if !activated {
            debug!("session stopped during initialization");
            return false;
        }

        info!("pose session active");
        true
    }

    fn is_initializing(&self) -> bool {
        self.inner.phase() == SessionPhase::Initializing
    }

    /// 初期化中に停止されたときの後始末
    async fn abandon_start(&self) -> bool {
        debug!("session stopped during initialization, releasing detector");
        self.inner.detector.lock().await.close().await;
        false
    }

    fn fail_start(&self, err: SessionError) -> bool {
        error!("Failed to start session: {err}");
        let message = err.to_string();
        self.inner.state_tx.send_if_modified(|state| {
            // 停止済みなら Stopped のまま
            if state.phase != SessionPhase::Initializing {
                return false;
            }
            state.phase = SessionPhase::Idle;
            state.is_initializing = false;
            state.error_message = Some(message);
            true
        });
        false
    }

    /// カメラストリームを止める。Active 以外では何もしない
    pub async fn pause_session(&self) {
        let mut camera = self.inner.camera.lock().await;
        let paused = self.inner.state_tx.send_if_modified(|state| {
            if state.phase != SessionPhase::Active {
                return false;
            }
            state.phase = SessionPhase::Paused;
            true
        });
        if !paused {
            return;
        }

        if let Err(e) = camera.stop_stream().await {
            warn!("Failed to stop camera stream: {e:#}");
        }
        info!("session paused");
    }

    /// カメラストリームを再開する。Paused 以外では何もしない
    pub async fn resume_session(&self) {
        let mut camera = self.inner.camera.lock().await;
        if self.inner.phase() != SessionPhase::Paused {
            return;
        }

        let callback = self.inner.frame_callback(Handle::current());
        match camera.start_stream(callback).await {
            Ok(()) => {
                lock(&self.inner.frame_rate).mark_stream_gap();
                self.inner.state_tx.send_modify(|state| {
                    state.phase = SessionPhase::Active;
                    state.error_message = None;
                });
                info!("session resumed");
            }
            Err(e) => {
                let err = SessionError::CameraStream(format!("{e:#}"));
                warn!("Failed to resume session: {err}");
                let message = err.to_string();
                self.inner.state_tx.send_modify(|state| state.error_message = Some(message));
            }
        }
    }

    /// カメラと推論器を解放して状態を初期値に戻す
    pub async fn stop_session(&self) {
        let mut previous = SessionPhase::Idle;
        self.inner.state_tx.send_modify(|state| {
            previous = state.phase;
            state.phase = SessionPhase::Stopped;
        });

        if previous.is_running() {
            {
                let mut camera = self.inner.camera.lock().await;
                if previous != SessionPhase::Paused {
                    if let Err(e) = camera.stop_stream().await {
                        warn!("Failed to stop camera stream: {e:#}");
                    }
                }
                camera.dispose().await;
            }
            // 推論中ならその完了を待ってから閉じる
            self.inner.detector.lock().await.close().await;

            let summary = self.performance_summary();
            info!("Session stopped: {summary}");
        }

        self.inner.state_tx.send_replace(SessionState {
            phase: SessionPhase::Stopped,
            ..SessionState::default()
        });
    }

    /// フレームレート制御からの要求を処理する
    ///
    /// 解像度・FPSの段階はどちらも「次の品質ティアへ切り替え」になる。
    /// 簡易描画はUIに伝えるだけ。
    pub async fn handle_fallback(&self, level: FallbackLevel) {
        match level {
            FallbackLevel::None => {}
            FallbackLevel::ReducedResolution | FallbackLevel::ReducedFps => {
                self.inner.state_tx.send_modify(|state| state.fallback_level = level);
                self.apply_next_tier(level).await;
            }
            FallbackLevel::SimplifiedRendering => {
                info!("switching overlay to simplified rendering");
                self.inner.state_tx.send_modify(|state| state.fallback_level = level);
            }
        }
    }

    async fn apply_next_tier(&self, level: FallbackLevel) {
        let (phase, current) = {
            let state = self.inner.state_tx.borrow();
            (state.phase, state.current_config.clone())
        };
        if phase != SessionPhase::Active {
            debug!(?level, ?phase, "session not active, skipping camera fallback");
            return;
        }
        let Some(next) = current.next_tier().cloned() else {
            warn!(config = %current.label(), "no lighter camera tier available, continuing at current quality");
            return;
        };

        info!(from = %current.label(), to = %next.label(), ?level, "applying camera fallback tier");
        self.pause_session().await;

        let applied = {
            let mut camera = self.inner.camera.lock().await;
            match camera.initialize(&next, SESSION_LENS).await {
                Ok(true) => {
                    self.inner.update_geometry(&**camera);
                    true
                }
                Ok(false) => {
                    warn!(config = %next.label(), "camera rejected fallback tier");
                    false
                }
                Err(e) => {
                    warn!(config = %next.label(), "Failed to apply fallback tier: {e:#}");
                    false
                }
            }
        };
        if applied {
            self.inner.state_tx.send_modify(|state| state.current_config = next);
        }

        self.resume_session().await;
    }

    fn ensure_fallback_task(&self) {
        let Some(mut rx) = lock(&self.inner.fallback_rx).take() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Some(level) = rx.recv().await {
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                SessionController { inner }.handle_fallback(level).await;
            }
        });
        *lock(&self.inner.fallback_task) = Some(handle);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.fallback_task).take() {
            handle.abort();
        }
    }
}
