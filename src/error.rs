use thiserror::Error;

/// セッション開始・ストリームの失敗
///
/// 致命的ではない。コントローラが `SessionState::error_message` に変換して Idle に戻る。
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to initialize pose detector: {0}")]
    DetectorInitialization(String),

    #[error("Failed to initialize camera: {0}")]
    CameraInitialization(String),

    #[error("Camera stream error: {0}")]
    CameraStream(String),
}

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("No recorded session to export")]
    NoSession,

    #[error("Failed to serialize session: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}
