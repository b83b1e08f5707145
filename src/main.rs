use anyhow::{bail, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::info;

use pose_session::camera::Size;
use pose_session::config::Config;
use pose_session::performance::{FrameRateController, PerformanceMonitor};
use pose_session::recording::{RecordingOptions, SessionRecorder};
use pose_session::session::{LifecycleEvent, LifecycleObserver, SessionController, SharedRecorder};
use pose_session::testing::{FakePoseDetector, ScriptedCamera};

const CONFIG_PATH: &str = "config.toml";
const SESSION_DURATION: Duration = Duration::from_secs(4);
const FRAME_INTERVAL: Duration = Duration::from_millis(33);
/// 30fps に追いつけない推論時間
const INFERENCE_DELAY: Duration = Duration::from_millis(80);
/// この時点で一度バックグラウンドに入れる
const BACKGROUND_AT: Duration = Duration::from_millis(1500);
const BACKGROUND_FOR: Duration = Duration::from_millis(300);
const SCREEN: Size = Size { width: 390.0, height: 844.0 };

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pose_session=info")),
        )
        .init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path);
    info!("pose-session {}", env!("GIT_VERSION"));

    println!("=== Pose Session - シミュレーション ===");
    println!("カメラ: {}", config.camera.quality().label());
    println!("推論時間: {}ms / フレーム間隔: {}ms", INFERENCE_DELAY.as_millis(), FRAME_INTERVAL.as_millis());
    println!();

    let camera = ScriptedCamera::new().with_sensor_orientation(270);
    let controller = SessionController::new(
        Box::new(camera.clone()),
        Box::new(FakePoseDetector::with_delay(INFERENCE_DELAY)),
        FrameRateController::new(config.frame_rate.clone()),
        config.session.clone(),
    );

    let monitor = PerformanceMonitor::new(config.monitor.monitor_config());
    controller.attach_monitor(monitor.clone());
    let recorder: SharedRecorder = Arc::new(Mutex::new(SessionRecorder::with_capacity(config.recorder.max_frames)));
    controller.attach_recorder(Arc::clone(&recorder));

    let (lifecycle_tx, lifecycle_rx) = mpsc::channel(4);
    let lifecycle = LifecycleObserver::new(controller.clone()).spawn(lifecycle_rx);

    let quality = config.camera.quality();
    if !controller.start_session(quality.clone()).await {
        let message = controller.state().error_message.unwrap_or_default();
        bail!("セッションを開始できませんでした: {}", message);
    }
    monitor.start();
    recorder.lock().unwrap_or_else(|e| e.into_inner()).start_recording_with(
        "demo-session",
        "demo-user",
        "squat",
        RecordingOptions {
            device_info: Some(format!("simulated camera ({})", env!("CARGO_PKG_VERSION"))),
            camera_config: Some(quality),
        },
    );

    let started = Instant::now();
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    let mut backgrounded = false;
    while started.elapsed() < SESSION_DURATION {
        ticker.tick().await;
        let elapsed = started.elapsed();
        if !backgrounded && elapsed >= BACKGROUND_AT {
            lifecycle_tx.send(LifecycleEvent::Background).await?;
            tokio::time::sleep(BACKGROUND_FOR).await;
            lifecycle_tx.send(LifecycleEvent::Foreground).await?;
            backgrounded = true;
        }
        camera.push_frame(camera.frame(started.elapsed().as_millis() as u64));
    }

    let state = controller.state();
    let summary = controller.performance_summary();
    let overlay = controller.overlay(SCREEN);
    let metadata = recorder
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .stop_recording(Some(summary.average_fps));
    monitor.stop();
    let json = recorder.lock().unwrap_or_else(|e| e.into_inner()).export_session_json()?;

    lifecycle_tx.send(LifecycleEvent::Detached).await?;
    drop(lifecycle_tx);
    lifecycle.await?;

    println!("=== 結果 ===");
    println!("処理フレーム: {} / ドロップ: {}", state.total_frames_processed, state.dropped_frames);
    println!("最終品質: {} (fallback: {:?})", state.current_config.label(), state.fallback_level);
    println!("集計: {}", summary);
    if let Some(overlay) = overlay {
        println!("オーバーレイ: {}点 / {}本 (簡易: {})", overlay.points.len(), overlay.lines.len(), overlay.simplified);
    }
    println!("性能レベル: {:?} / アラート: {}件", monitor.current_level(), monitor.active_alerts().len());
    if let Some(metadata) = metadata {
        println!(
            "録画: {}フレーム (溢れ {}) / {}ms",
            metadata.total_frames.unwrap_or(0),
            metadata.dropped_frames.unwrap_or(0),
            metadata.duration_ms().unwrap_or(0)
        );
    }
    println!("エクスポート: {} bytes", json.len());

    Ok(())
}
