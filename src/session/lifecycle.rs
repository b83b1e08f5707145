use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::controller::SessionController;
use super::state::SessionPhase;

/// アプリのライフサイクル通知
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Foreground,
    Background,
    Detached,
}

/// バックグラウンド中は処理しないよう、ライフサイクルに合わせてセッションを止める
///
/// 復帰時に再開するのは、バックグラウンドに入る直前に Active だった場合だけ。
/// ユーザーが一時停止していたセッションは一時停止のまま。
/// 開始処理中に裏に回った場合は、開始の完了を待ってから一時停止する。
pub struct LifecycleObserver {
    controller: SessionController,
    resume_on_foreground: bool,
}

impl LifecycleObserver {
    pub fn new(controller: SessionController) -> Self {
        Self {
            controller,
            resume_on_foreground: false,
        }
    }

    pub async fn handle(&mut self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Background => {
                // 開始処理中なら終わるのを待つ。そのままだと裏で Active になってしまう
                if self.controller.phase() == SessionPhase::Initializing {
                    debug!("app moved to background during initialization, waiting for start to finish");
                    let mut state_rx = self.controller.subscribe();
                    let _ = state_rx.wait_for(|state| state.phase != SessionPhase::Initializing).await;
                }
                if self.controller.phase() == SessionPhase::Active {
                    info!("app moved to background, pausing session");
                    self.controller.pause_session().await;
                    self.resume_on_foreground = true;
                }
            }
            LifecycleEvent::Foreground => {
                if std::mem::take(&mut self.resume_on_foreground) {
                    info!("app returned to foreground, resuming session");
                    self.controller.resume_session().await;
                }
            }
            LifecycleEvent::Detached => {
                self.resume_on_foreground = false;
                info!("app detached, stopping session");
                self.controller.stop_session().await;
            }
        }
    }

    /// イベントを順に処理するタスクを起動。送信側が閉じると終了する
    pub fn spawn(mut self, mut events: mpsc::Receiver<LifecycleEvent>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                self.handle(event).await;
            }
            debug!("lifecycle event stream closed");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraQualityConfig;
    use crate::performance::FrameRateController;
    use crate::session::SessionConfig;
    use crate::testing::{FakePoseDetector, ScriptedCamera};
    use std::time::Duration;

    async fn active_session(camera: &ScriptedCamera) -> SessionController {
        let controller = SessionController::new(
            Box::new(camera.clone()),
            Box::new(FakePoseDetector::new()),
            FrameRateController::default(),
            SessionConfig::default(),
        );
        assert!(controller.start_session(CameraQualityConfig::high()).await);
        controller
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_background_pauses_and_foreground_resumes() {
        let camera = ScriptedCamera::new();
        let controller = active_session(&camera).await;
        camera.push_frame(camera.frame(0));
        settle().await;

        let mut observer = LifecycleObserver::new(controller.clone());
        observer.handle(LifecycleEvent::Background).await;
        assert_eq!(controller.phase(), SessionPhase::Paused);
        assert!(!camera.is_streaming());

        observer.handle(LifecycleEvent::Foreground).await;
        assert_eq!(controller.phase(), SessionPhase::Active);
        assert!(camera.is_streaming());
        assert_eq!(controller.state().total_frames_processed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_during_initialization_pauses_once_active() {
        let camera = ScriptedCamera::new();
        let detector = FakePoseDetector::new();
        detector.set_initialize_delay(Duration::from_millis(100));
        let controller = SessionController::new(
            Box::new(camera.clone()),
            Box::new(detector),
            FrameRateController::default(),
            SessionConfig::default(),
        );
        let starter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.start_session(CameraQualityConfig::high()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(controller.phase(), SessionPhase::Initializing);

        let mut observer = LifecycleObserver::new(controller.clone());
        observer.handle(LifecycleEvent::Background).await;
        assert!(starter.await.unwrap());
        assert_eq!(controller.phase(), SessionPhase::Paused);
        assert!(!camera.is_streaming());
        assert!(!camera.push_frame(camera.frame(0)));

        observer.handle(LifecycleEvent::Foreground).await;
        assert_eq!(controller.phase(), SessionPhase::Active);
        assert!(camera.is_streaming());
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_during_failed_start_does_not_resume() {
        let camera = ScriptedCamera::new();
        camera.set_fail_initialize(true);
        let detector = FakePoseDetector::new();
        detector.set_initialize_delay(Duration::from_millis(100));
        let controller = SessionController::new(
            Box::new(camera.clone()),
            Box::new(detector),
            FrameRateController::default(),
            SessionConfig::default(),
        );
        let starter = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.start_session(CameraQualityConfig::high()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut observer = LifecycleObserver::new(controller.clone());
        observer.handle(LifecycleEvent::Background).await;
        assert!(!starter.await.unwrap());
        assert_eq!(controller.phase(), SessionPhase::Idle);

        observer.handle(LifecycleEvent::Foreground).await;
        assert_eq!(controller.phase(), SessionPhase::Idle);
        assert_eq!(camera.start_count(), 0);
    }

    #[tokio::test]
    async fn test_user_pause_survives_foreground() {
        let camera = ScriptedCamera::new();
        let controller = active_session(&camera).await;
        controller.pause_session().await;

        let mut observer = LifecycleObserver::new(controller.clone());
        observer.handle(LifecycleEvent::Background).await;
        observer.handle(LifecycleEvent::Foreground).await;

        assert_eq!(controller.phase(), SessionPhase::Paused);
        assert_eq!(camera.start_count(), 1);
    }

    #[tokio::test]
    async fn test_foreground_without_background_is_noop() {
        let camera = ScriptedCamera::new();
        let controller = active_session(&camera).await;

        let mut observer = LifecycleObserver::new(controller.clone());
        observer.handle(LifecycleEvent::Foreground).await;
        assert_eq!(controller.phase(), SessionPhase::Active);
        assert_eq!(camera.start_count(), 1);
    }

    #[tokio::test]
    async fn test_spawned_observer_handles_stream() {
        let camera = ScriptedCamera::new();
        let controller = active_session(&camera).await;
        let (tx, rx) = mpsc::channel(8);
        let task = LifecycleObserver::new(controller.clone()).spawn(rx);

        tx.send(LifecycleEvent::Background).await.unwrap();
        tx.send(LifecycleEvent::Foreground).await.unwrap();
        tx.send(LifecycleEvent::Detached).await.unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(controller.phase(), SessionPhase::Stopped);
        assert!(camera.is_disposed());
        assert_eq!(camera.start_count(), 2);
    }
}
