//! カメラドライバと推論エンジンの代役
//!
//! 実機なしでセッションを動かすためのもので、テストとデモで使う。どちらも共有状態への
//! `Clone` ハンドルなので、コントローラに Box で渡した後もテスト側から状態を覗ける。

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::camera::{CameraFrame, CameraQualityConfig, CameraSource, FrameCallback, LensDirection, Size};
use crate::pose::{DetectorConfig, Landmark, LandmarkType, PoseDetector, PoseFrame};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// 全33点が揃った立ち姿勢
pub fn full_pose(confidence: f64, timestamp_ms: u64) -> PoseFrame {
    let landmarks = LandmarkType::ALL.iter().map(|&landmark_type| {
        let i = landmark_type.index() as f64;
        // 左右交互、上から下へ
        let x = if landmark_type.index() % 2 == 0 { 0.45 } else { 0.55 };
        let y = 0.1 + 0.8 * i / (LandmarkType::COUNT - 1) as f64;
        Landmark::new(landmark_type, x, y, 0.0, confidence)
    });
    PoseFrame::new(landmarks, timestamp_ms)
}

#[derive(Default)]
struct CameraShared {
    callback: Option<FrameCallback>,
    streaming: bool,
    initialized: Vec<CameraQualityConfig>,
    image_size: Option<Size>,
    start_count: u32,
    stop_count: u32,
    disposed: bool,
}

/// テストからフレームを押し込むカメラ
#[derive(Clone)]
pub struct ScriptedCamera {
    shared: Arc<Mutex<CameraShared>>,
    sensor_orientation: u32,
    fail_initialize: Arc<AtomicBool>,
}

impl ScriptedCamera {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Mutex::new(CameraShared::default())),
            sensor_orientation: 0,
            fail_initialize: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_sensor_orientation(mut self, degrees: u32) -> Self {
        self.sensor_orientation = degrees % 360;
        self
    }

    /// 初期化で false を返すようにする
    pub fn set_fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    /// 空の画素データを持つフレーム
    pub fn frame(&self, timestamp_ms: u64) -> CameraFrame {
        let (width, height) = lock(&self.shared)
            .image_size
            .map(|s| (s.width as u32, s.height as u32))
            .unwrap_or((640, 480));
        CameraFrame::new(width, height, timestamp_ms, Bytes::new())
    }

    /// ストリーム中ならコールバックに渡して true
    pub fn push_frame(&self, frame: CameraFrame) -> bool {
        let shared = lock(&self.shared);
        match (&shared.callback, shared.streaming) {
            (Some(callback), true) => {
                callback(frame);
                true
            }
            _ => false,
        }
    }

    pub fn initialized_configs(&self) -> Vec<CameraQualityConfig> {
        lock(&self.shared).initialized.clone()
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.shared).streaming
    }

    pub fn start_count(&self) -> u32 {
        lock(&self.shared).start_count
    }

    pub fn stop_count(&self) -> u32 {
        lock(&self.shared).stop_count
    }

    pub fn is_disposed(&self) -> bool {
        lock(&self.shared).disposed
    }
}

impl Default for ScriptedCamera {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraSource for ScriptedCamera {
    async fn initialize(&mut self, config: &CameraQualityConfig, _lens: LensDirection) -> Result<bool> {
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let (width, height) = config.resolution.dimensions();
        let mut shared = lock(&self.shared);
        shared.initialized.push(config.clone());
        shared.image_size = Some(Size::new(width as f64, height as f64));
        shared.disposed = false;
        Ok(true)
    }

    async fn start_stream(&mut self, on_frame: FrameCallback) -> Result<()> {
        let mut shared = lock(&self.shared);
        if shared.disposed || shared.image_size.is_none() {
            return Err(anyhow!("camera is not initialized"));
        }
        shared.callback = Some(on_frame);
        shared.streaming = true;
        shared.start_count += 1;
        Ok(())
    }

    async fn stop_stream(&mut self) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.callback = None;
        shared.streaming = false;
        shared.stop_count += 1;
        Ok(())
    }

    async fn dispose(&mut self) {
        let mut shared = lock(&self.shared);
        shared.callback = None;
        shared.streaming = false;
        shared.image_size = None;
        shared.disposed = true;
    }

    fn image_size(&self) -> Option<Size> {
        lock(&self.shared).image_size
    }

    fn sensor_orientation(&self) -> u32 {
        self.sensor_orientation
    }
}

struct DetectorShared {
    gate: Option<Arc<Semaphore>>,
    delay: Duration,
    initialize_delay: Mutex<Duration>,
    confidence: Mutex<f64>,
    fail_initialize: AtomicBool,
    fail_processing: AtomicBool,
    detect_person: AtomicBool,
    calls: AtomicU64,
    rotations: Mutex<Vec<u32>>,
    initialized: AtomicBool,
    closed: AtomicBool,
}

/// 固定の姿勢を返す推論器
///
/// `gated` で作ると、許可が出るまで推論が完了しない。
#[derive(Clone)]
pub struct FakePoseDetector {
    shared: Arc<DetectorShared>,
}

impl FakePoseDetector {
    pub fn new() -> Self {
        Self::build(None, Duration::ZERO)
    }

    /// 推論1回ごとに1つ許可を消費する。許可は `Semaphore::add_permits` で出す
    pub fn gated() -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Self::build(Some(Arc::clone(&gate)), Duration::ZERO), gate)
    }

    /// 推論ごとに `delay` だけ待つ
    pub fn with_delay(delay: Duration) -> Self {
        Self::build(None, delay)
    }

    fn build(gate: Option<Arc<Semaphore>>, delay: Duration) -> Self {
        Self {
            shared: Arc::new(DetectorShared {
                gate,
                delay,
                initialize_delay: Mutex::new(Duration::ZERO),
                confidence: Mutex::new(0.9),
                fail_initialize: AtomicBool::new(false),
                fail_processing: AtomicBool::new(false),
                detect_person: AtomicBool::new(true),
                calls: AtomicU64::new(0),
                rotations: Mutex::new(Vec::new()),
                initialized: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn set_fail_initialize(&self, fail: bool) {
        self.shared.fail_initialize.store(fail, Ordering::SeqCst);
    }

    /// モデル読み込みに時間がかかる推論器を模す
    pub fn set_initialize_delay(&self, delay: Duration) {
        *lock(&self.shared.initialize_delay) = delay;
    }

    pub fn set_fail_processing(&self, fail: bool) {
        self.shared.fail_processing.store(fail, Ordering::SeqCst);
    }

    /// false なら人物なし (`Ok(None)`) を返す
    pub fn set_detect_person(&self, detect: bool) {
        self.shared.detect_person.store(detect, Ordering::SeqCst);
    }

    pub fn set_confidence(&self, confidence: f64) {
        *lock(&self.shared.confidence) = confidence;
    }

    pub fn calls(&self) -> u64 {
        self.shared.calls.load(Ordering::SeqCst)
    }

    pub fn rotations(&self) -> Vec<u32> {
        lock(&self.shared.rotations).clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.initialized.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }
}

impl Default for FakePoseDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PoseDetector for FakePoseDetector {
    async fn initialize(&mut self, _config: &DetectorConfig) -> Result<()> {
        let delay = *lock(&self.shared.initialize_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.shared.fail_initialize.load(Ordering::SeqCst) {
            return Err(anyhow!("model file not found"));
        }
        self.shared.initialized.store(true, Ordering::SeqCst);
        self.shared.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn process_image(&mut self, frame: &CameraFrame, rotation: u32) -> Result<Option<PoseFrame>> {
        self.shared.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.shared.rotations).push(rotation);

        if let Some(gate) = &self.shared.gate {
            gate.acquire().await?.forget();
        }
        if !self.shared.delay.is_zero() {
            tokio::time::sleep(self.shared.delay).await;
        }
        if self.shared.fail_processing.load(Ordering::SeqCst) {
            return Err(anyhow!("inference failed"));
        }
        if !self.shared.detect_person.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let confidence = *lock(&self.shared.confidence);
        Ok(Some(full_pose(confidence, frame.timestamp_ms)))
    }

    async fn close(&mut self) {
        self.shared.initialized.store(false, Ordering::SeqCst);
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}
