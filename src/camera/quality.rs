use serde::{Deserialize, Serialize};

/// カメラ解像度プリセット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionPreset {
    Low,
    Medium,
    High,
    VeryHigh,
}

impl ResolutionPreset {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Low => (320, 240),
            Self::Medium => (640, 480),
            Self::High => (1280, 720),
            Self::VeryHigh => (1920, 1080),
        }
    }

    pub fn pixel_count(self) -> u64 {
        let (w, h) = self.dimensions();
        w as u64 * h as u64
    }
}

/// 品質ティア。`fallback` を辿ると必ず `None` で終わる降順チェーンになる
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraQualityConfig {
    pub resolution: ResolutionPreset,
    pub target_fps: u32,
    pub fallback: Option<Box<CameraQualityConfig>>,
}

impl CameraQualityConfig {
    fn tier(resolution: ResolutionPreset, target_fps: u32, fallback: Option<CameraQualityConfig>) -> Self {
        Self {
            resolution,
            target_fps,
            fallback: fallback.map(Box::new),
        }
    }

    /// 1920x1080@30
    pub fn very_high() -> Self {
        Self::tier(ResolutionPreset::VeryHigh, 30, Some(Self::high()))
    }

    /// 1280x720@30
    pub fn high() -> Self {
        Self::tier(ResolutionPreset::High, 30, Some(Self::medium()))
    }

    /// 640x480@30
    pub fn medium() -> Self {
        Self::tier(ResolutionPreset::Medium, 30, Some(Self::medium_reduced_fps()))
    }

    /// 640x480@20
    pub fn medium_reduced_fps() -> Self {
        Self::tier(ResolutionPreset::Medium, 20, Some(Self::low()))
    }

    /// 320x240@15。これ以上は落とせない
    pub fn low() -> Self {
        Self::tier(ResolutionPreset::Low, 15, None)
    }

    /// プリセットとFPSから開始ティアを作る。
    /// 後続は組み込みチェーンのうち、開始ティアより負荷が低いものだけを残す。
    pub fn from_preset(resolution: ResolutionPreset, target_fps: u32) -> Self {
        let base = match resolution {
            ResolutionPreset::VeryHigh => Self::very_high(),
            ResolutionPreset::High => Self::high(),
            ResolutionPreset::Medium => Self::medium(),
            ResolutionPreset::Low => Self::low(),
        };
        let top_rate = resolution.pixel_count() * target_fps as u64;

        let mut fallback = base.fallback;
        loop {
            match fallback {
                Some(tier) if tier.pixel_rate() >= top_rate => fallback = tier.fallback,
                other => {
                    fallback = other;
                    break;
                }
            }
        }

        Self {
            resolution,
            target_fps,
            fallback,
        }
    }

    /// 毎秒処理するピクセル数
    pub fn pixel_rate(&self) -> u64 {
        self.resolution.pixel_count() * self.target_fps as u64
    }

    pub fn is_terminal(&self) -> bool {
        self.fallback.is_none()
    }

    pub fn next_tier(&self) -> Option<&CameraQualityConfig> {
        self.fallback.as_deref()
    }

    /// 自身を先頭にしたフォールバックチェーン
    pub fn chain(&self) -> impl Iterator<Item = &CameraQualityConfig> {
        std::iter::successors(Some(self), |c| c.fallback.as_deref())
    }

    pub fn chain_len(&self) -> usize {
        self.chain().count()
    }

    /// フォールバックを除いたこのティア単体の説明
    pub fn label(&self) -> String {
        let (w, h) = self.resolution.dimensions();
        format!("{}x{}@{}", w, h, self.target_fps)
    }
}

impl Default for CameraQualityConfig {
    fn default() -> Self {
        Self::high()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_strictly_descending(config: &CameraQualityConfig) {
        let rates: Vec<u64> = config.chain().map(|c| c.pixel_rate()).collect();
        for pair in rates.windows(2) {
            assert!(pair[0] > pair[1], "chain not descending: {:?}", rates);
        }
    }

    #[test]
    fn test_builtin_chains_descend_and_terminate() {
        for config in [
            CameraQualityConfig::very_high(),
            CameraQualityConfig::high(),
            CameraQualityConfig::medium(),
            CameraQualityConfig::medium_reduced_fps(),
            CameraQualityConfig::low(),
        ] {
            assert_strictly_descending(&config);
            assert!(config.chain_len() <= 5);
            assert!(config.chain().last().map_or(false, |c| c.is_terminal()));
        }
    }

    #[test]
    fn test_repeated_fallback_reaches_none() {
        let mut current = Some(CameraQualityConfig::very_high());
        let mut steps = 0;
        while let Some(config) = current {
            current = config.fallback.map(|b| *b);
            steps += 1;
            assert!(steps <= 5);
        }
        assert_eq!(steps, 5);
    }

    #[test]
    fn test_low_is_terminal() {
        assert!(CameraQualityConfig::low().is_terminal());
        assert!(CameraQualityConfig::low().next_tier().is_none());
    }

    #[test]
    fn test_from_preset_skips_heavier_tiers() {
        // 640x480@15 は medium_reduced_fps(640x480@20) より軽いので、後続は low のみ
        let config = CameraQualityConfig::from_preset(ResolutionPreset::Medium, 15);
        assert_eq!(config.label(), "640x480@15");
        assert_eq!(config.next_tier().map(|c| c.label()), Some("320x240@15".to_string()));
        assert_strictly_descending(&config);

        let config = CameraQualityConfig::from_preset(ResolutionPreset::Low, 10);
        assert!(config.is_terminal());
    }

    #[test]
    fn test_from_preset_keeps_default_chain() {
        let config = CameraQualityConfig::from_preset(ResolutionPreset::High, 30);
        assert_eq!(config, CameraQualityConfig::high());
    }
}
