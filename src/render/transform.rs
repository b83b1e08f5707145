use serde::{Deserialize, Serialize};

use crate::camera::{DeviceOrientation, LensDirection, Size};
use crate::pose::{Landmark, PoseFrame};

/// 画面座標 (または正規化座標) 上の点
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// 画面座標の矩形
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl BoundingBox {
    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    pub fn center(&self) -> Point {
        Point::new((self.left + self.right) / 2.0, (self.top + self.bottom) / 2.0)
    }
}

/// プレビューの画面への合わせ方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// 画面を埋める (はみ出しはクロップ)
    #[default]
    Cover,
    /// 全体を収める (余白あり)
    Contain,
}

/// 変換に必要なカメラ・画面の状態
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParams {
    pub image_size: Size,
    pub screen_size: Size,
    pub lens_direction: LensDirection,
    pub device_orientation: DeviceOrientation,
    /// センサー取り付け角 (度)
    pub sensor_orientation: u32,
}

/// 正規化ランドマーク空間 → 画面空間の変換
///
/// 状態を持たない。端末やカメラの向きが変わったら作り直す。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransformer {
    params: TransformParams,
    rotation: u32,
}

impl CoordinateTransformer {
    pub fn new(params: TransformParams) -> Self {
        let rotation = Self::rotation_angle(
            params.lens_direction,
            params.device_orientation,
            params.sensor_orientation,
        );
        Self { params, rotation }
    }

    pub fn params(&self) -> &TransformParams {
        &self.params
    }

    /// 画像を正立させる回転角 (0/90/180/270)
    ///
    /// 前面: (sensor + device) mod 360
    /// 背面: (sensor - device + 360) mod 360
    pub fn rotation_angle(lens: LensDirection, device: DeviceOrientation, sensor_orientation: u32) -> u32 {
        let sensor = sensor_orientation % 360;
        let device = device.degrees();
        match lens {
            LensDirection::Front => (sensor + device) % 360,
            LensDirection::Back => (sensor + 360 - device) % 360,
        }
    }

    pub fn rotation(&self) -> u32 {
        self.rotation
    }

    /// 正規化座標を (0.5, 0.5) 中心に回転し、前面カメラならX反転してから画面サイズでスケール
    pub fn transform_point(&self, x: f64, y: f64) -> Point {
        let (mut x, y) = rotate_normalized(x, y, self.rotation);
        if self.params.lens_direction.is_front() {
            x = 1.0 - x;
        }
        Point::new(x * self.params.screen_size.width, y * self.params.screen_size.height)
    }

    pub fn transform_landmark(&self, landmark: &Landmark) -> Point {
        self.transform_point(landmark.x, landmark.y)
    }

    /// 使用可能なランドマークを囲む矩形。`padding` は矩形自身の幅・高さに対する比率
    ///
    /// 使用可能なランドマークが無ければ None。結果は画面内にクリップされる。
    pub fn get_bounding_box(&self, pose: &PoseFrame, padding: f64) -> Option<BoundingBox> {
        let mut min_x = f64::MAX;
        let mut min_y = f64::MAX;
        let mut max_x = f64::MIN;
        let mut max_y = f64::MIN;
        let mut count = 0u32;

        for lm in pose.usable_landmarks() {
            let p = self.transform_landmark(lm);
            min_x = min_x.min(p.x);
            min_y = min_y.min(p.y);
            max_x = max_x.max(p.x);
            max_y = max_y.max(p.y);
            count += 1;
        }

        if count == 0 {
            return None;
        }

        let pad_x = (max_x - min_x) * padding;
        let pad_y = (max_y - min_y) * padding;
        let screen = self.params.screen_size;

        Some(BoundingBox {
            left: (min_x - pad_x).clamp(0.0, screen.width),
            top: (min_y - pad_y).clamp(0.0, screen.height),
            right: (max_x + pad_x).clamp(0.0, screen.width),
            bottom: (max_y + pad_y).clamp(0.0, screen.height),
        })
    }

    /// 画像のアスペクト比を保ったまま画面に合わせたプレビューサイズ
    ///
    /// 90/270度回転時は画像の縦横を入れ替えて比較する。
    pub fn get_preview_size(&self, fit: FitMode) -> Size {
        let image = self.params.image_size;
        let screen = self.params.screen_size;
        let image_aspect = if self.rotation % 180 == 90 {
            Size::new(image.height, image.width).aspect_ratio()
        } else {
            image.aspect_ratio()
        };
        if image_aspect == 0.0 {
            return screen;
        }

        let screen_aspect = screen.aspect_ratio();
        let fit_height = match fit {
            FitMode::Cover => image_aspect > screen_aspect,
            FitMode::Contain => image_aspect <= screen_aspect,
        };

        if fit_height {
            Size::new(screen.height * image_aspect, screen.height)
        } else {
            Size::new(screen.width, screen.width / image_aspect)
        }
    }
}

fn rotate_normalized(x: f64, y: f64, rotation: u32) -> (f64, f64) {
    // 90度単位は sin/cos の丸め誤差を避ける
    let (sin, cos) = match rotation % 360 {
        0 => return (x, y),
        90 => (1.0, 0.0),
        180 => (0.0, -1.0),
        270 => (-1.0, 0.0),
        deg => (deg as f64).to_radians().sin_cos(),
    };
    let dx = x - 0.5;
    let dy = y - 0.5;
    (dx * cos - dy * sin + 0.5, dx * sin + dy * cos + 0.5)
}

fn usable(landmark: Option<&Landmark>) -> Option<&Landmark> {
    landmark.filter(|lm| lm.is_usable())
}

/// `vertex` での角度 (度, 0〜180)。正規化座標上で計算する
///
/// いずれかが欠けている・信頼度不足・長さ0のベクトルなら None。
pub fn calculate_angle(p1: Option<&Landmark>, vertex: Option<&Landmark>, p2: Option<&Landmark>) -> Option<f64> {
    let (a, v, b) = (usable(p1)?, usable(vertex)?, usable(p2)?);

    let v1 = (a.x - v.x, a.y - v.y);
    let v2 = (b.x - v.x, b.y - v.y);
    let len1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
    let len2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
    if len1 == 0.0 || len2 == 0.0 {
        return None;
    }

    let dot = v1.0 * v2.0 + v1.1 * v2.1;
    let cos = (dot / (len1 * len2)).clamp(-1.0, 1.0);
    Some(cos.acos().to_degrees())
}

/// 2点間のユークリッド距離 (正規化座標)
pub fn calculate_distance(a: Option<&Landmark>, b: Option<&Landmark>) -> Option<f64> {
    let (a, b) = (usable(a)?, usable(b)?);
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    Some((dx * dx + dy * dy).sqrt())
}

/// 2点の中点 (正規化座標)
pub fn calculate_midpoint(a: Option<&Landmark>, b: Option<&Landmark>) -> Option<Point> {
    let (a, b) = (usable(a)?, usable(b)?);
    Some(Point::new((a.x + b.x) / 2.0, (a.y + b.y) / 2.0))
}

/// `from` → `to` の線分が鉛直からどれだけ傾いているか (度, 0〜180)
pub fn calculate_vertical_angle(from: Option<&Landmark>, to: Option<&Landmark>) -> Option<f64> {
    let (a, b) = (usable(from)?, usable(to)?);
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    if dx == 0.0 && dy == 0.0 {
        return None;
    }
    // 画像Yは下向き正。真下を0度とする
    Some(f64::atan2(dx.abs(), dy).to_degrees())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::LandmarkType;
    use proptest::prelude::*;

    fn lm(x: f64, y: f64) -> Landmark {
        Landmark::new(LandmarkType::Nose, x, y, 0.0, 0.9)
    }

    fn params(lens: LensDirection, device: DeviceOrientation, sensor: u32) -> TransformParams {
        TransformParams {
            image_size: Size::new(480.0, 640.0),
            screen_size: Size::new(390.0, 844.0),
            lens_direction: lens,
            device_orientation: device,
            sensor_orientation: sensor,
        }
    }

    #[test]
    fn test_rotation_angle_front() {
        use DeviceOrientation::*;
        assert_eq!(CoordinateTransformer::rotation_angle(LensDirection::Front, PortraitUp, 270), 270);
        assert_eq!(CoordinateTransformer::rotation_angle(LensDirection::Front, LandscapeLeft, 270), 0);
        assert_eq!(CoordinateTransformer::rotation_angle(LensDirection::Front, PortraitDown, 270), 90);
        assert_eq!(CoordinateTransformer::rotation_angle(LensDirection::Front, LandscapeRight, 270), 180);
    }

    #[test]
    fn test_rotation_angle_back() {
        use DeviceOrientation::*;
        assert_eq!(CoordinateTransformer::rotation_angle(LensDirection::Back, PortraitUp, 90), 90);
        assert_eq!(CoordinateTransformer::rotation_angle(LensDirection::Back, LandscapeLeft, 90), 0);
        assert_eq!(CoordinateTransformer::rotation_angle(LensDirection::Back, PortraitDown, 90), 270);
        assert_eq!(CoordinateTransformer::rotation_angle(LensDirection::Back, LandscapeRight, 90), 180);
    }

    #[test]
    fn test_identity_transform_is_plain_scale() {
        let t = CoordinateTransformer::new(params(LensDirection::Back, DeviceOrientation::PortraitUp, 0));
        assert_eq!(t.rotation(), 0);
        let p = t.transform_landmark(&lm(0.3, 0.7));
        assert_eq!(p, Point::new(0.3 * 390.0, 0.7 * 844.0));
    }

    #[test]
    fn test_front_camera_mirrors_x() {
        let t = CoordinateTransformer::new(params(LensDirection::Front, DeviceOrientation::PortraitUp, 0));
        let p = t.transform_landmark(&lm(0.25, 0.5));
        assert!((p.x - 0.75 * 390.0).abs() < 1e-9);
        assert!((p.y - 0.5 * 844.0).abs() < 1e-9);
    }

    #[test]
    fn test_rotation_90_about_center() {
        let t = CoordinateTransformer::new(params(LensDirection::Back, DeviceOrientation::PortraitUp, 90));
        // (1.0, 0.5) は中心から右 → 90度回転で下
        let p = t.transform_point(1.0, 0.5);
        assert!((p.x - 0.5 * 390.0).abs() < 1e-9);
        assert!((p.y - 1.0 * 844.0).abs() < 1e-9);
        // 中心は動かない
        let c = t.transform_point(0.5, 0.5);
        assert!((c.x - 195.0).abs() < 1e-9);
        assert!((c.y - 422.0).abs() < 1e-9);
    }

    #[test]
    fn test_bounding_box_padding_and_clamp() {
        let mut p = params(LensDirection::Back, DeviceOrientation::PortraitUp, 0);
        p.screen_size = Size::new(100.0, 100.0);
        let t = CoordinateTransformer::new(p);
        let pose = PoseFrame::new(
            [
                Landmark::new(LandmarkType::LeftShoulder, 0.2, 0.2, 0.0, 0.9),
                Landmark::new(LandmarkType::RightAnkle, 0.6, 0.8, 0.0, 0.9),
                // 信頼度不足は無視
                Landmark::new(LandmarkType::Nose, 0.99, 0.01, 0.0, 0.1),
            ],
            0,
        );

        let bbox = t.get_bounding_box(&pose, 0.1).unwrap();
        assert!((bbox.left - 16.0).abs() < 1e-9);
        assert!((bbox.right - 64.0).abs() < 1e-9);
        assert!((bbox.top - 14.0).abs() < 1e-9);
        assert!((bbox.bottom - 86.0).abs() < 1e-9);

        let bbox = t.get_bounding_box(&pose, 1.0).unwrap();
        assert_eq!(bbox.left, 0.0);
        assert_eq!(bbox.top, 0.0);
        assert_eq!(bbox.right, 100.0);
        assert_eq!(bbox.bottom, 100.0);
    }

    #[test]
    fn test_bounding_box_empty_pose() {
        let t = CoordinateTransformer::new(params(LensDirection::Back, DeviceOrientation::PortraitUp, 0));
        assert!(t.get_bounding_box(&PoseFrame::empty(0), 0.1).is_none());
    }

    #[test]
    fn test_preview_size_cover_and_contain() {
        let t = CoordinateTransformer::new(TransformParams {
            image_size: Size::new(640.0, 480.0),
            screen_size: Size::new(400.0, 400.0),
            lens_direction: LensDirection::Back,
            device_orientation: DeviceOrientation::PortraitUp,
            sensor_orientation: 0,
        });
        let cover = t.get_preview_size(FitMode::Cover);
        assert!((cover.height - 400.0).abs() < 1e-9);
        assert!((cover.width - 400.0 * 640.0 / 480.0).abs() < 1e-9);

        let contain = t.get_preview_size(FitMode::Contain);
        assert!((contain.width - 400.0).abs() < 1e-9);
        assert!((contain.height - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_preview_size_swaps_for_rotated_sensor() {
        let t = CoordinateTransformer::new(TransformParams {
            image_size: Size::new(640.0, 480.0),
            screen_size: Size::new(300.0, 600.0),
            lens_direction: LensDirection::Back,
            device_orientation: DeviceOrientation::PortraitUp,
            sensor_orientation: 90,
        });
        // 回転後は 480x640 (縦長)
        let contain = t.get_preview_size(FitMode::Contain);
        assert!((contain.width - 300.0).abs() < 1e-9);
        assert!((contain.height - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_calculate_angle_right_angle() {
        let a = lm(0.5, 0.2);
        let v = lm(0.5, 0.5);
        let b = lm(0.8, 0.5);
        let angle = calculate_angle(Some(&a), Some(&v), Some(&b)).unwrap();
        assert!((angle - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_calculate_angle_straight_line_no_nan() {
        // 同一直線上: cos が -1 をわずかに超えても NaN にならない
        let a = lm(0.1, 0.1);
        let v = lm(0.2, 0.2);
        let b = lm(0.3 + 1e-17, 0.3);
        let angle = calculate_angle(Some(&a), Some(&v), Some(&b)).unwrap();
        assert!(!angle.is_nan());
        assert!((angle - 180.0).abs() < 1e-6);
    }

    #[test]
    fn test_helpers_reject_missing_or_low_confidence() {
        let good = lm(0.5, 0.5);
        let weak = Landmark::new(LandmarkType::LeftKnee, 0.4, 0.4, 0.0, 0.3);
        assert!(calculate_angle(None, Some(&good), Some(&good)).is_none());
        assert!(calculate_angle(Some(&good), Some(&weak), Some(&good)).is_none());
        assert!(calculate_distance(Some(&good), Some(&weak)).is_none());
        assert!(calculate_midpoint(Some(&good), None).is_none());
        assert!(calculate_vertical_angle(Some(&good), Some(&weak)).is_none());
        // 長さ0のベクトル
        assert!(calculate_angle(Some(&good), Some(&good), Some(&lm(0.6, 0.6))).is_none());
    }

    #[test]
    fn test_distance_and_midpoint() {
        let a = lm(0.2, 0.2);
        let b = lm(0.5, 0.6);
        assert!((calculate_distance(Some(&a), Some(&b)).unwrap() - 0.5).abs() < 1e-9);
        let m = calculate_midpoint(Some(&a), Some(&b)).unwrap();
        assert!((m.x - 0.35).abs() < 1e-9);
        assert!((m.y - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_vertical_angle() {
        let hip = lm(0.5, 0.5);
        let straight_down = lm(0.5, 0.9);
        let leaning = lm(0.9, 0.9);
        assert!(calculate_vertical_angle(Some(&hip), Some(&straight_down)).unwrap().abs() < 1e-9);
        assert!((calculate_vertical_angle(Some(&hip), Some(&leaning)).unwrap() - 45.0).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_angle_is_symmetric(
            ax in 0.0f64..1.0, ay in 0.0f64..1.0,
            vx in 0.0f64..1.0, vy in 0.0f64..1.0,
            bx in 0.0f64..1.0, by in 0.0f64..1.0,
        ) {
            let (a, v, b) = (lm(ax, ay), lm(vx, vy), lm(bx, by));
            let forward = calculate_angle(Some(&a), Some(&v), Some(&b));
            let backward = calculate_angle(Some(&b), Some(&v), Some(&a));
            prop_assert_eq!(forward, backward);
        }

        #[test]
        fn prop_angle_never_nan(
            ax in 0.0f64..1.0, ay in 0.0f64..1.0,
            vx in 0.0f64..1.0, vy in 0.0f64..1.0,
            t in -2.0f64..2.0,
        ) {
            // b を v→a の直線上に置くと cos が ±1 付近になる
            let (a, v) = (lm(ax, ay), lm(vx, vy));
            let b = lm(vx + (ax - vx) * t, vy + (ay - vy) * t);
            if let Some(angle) = calculate_angle(Some(&a), Some(&v), Some(&b)) {
                prop_assert!(!angle.is_nan());
                prop_assert!(angle >= 0.0 && angle <= 180.0 + 1e-9);
            }
        }

        #[test]
        fn prop_identity_transform_scales_exactly(x in 0.0f64..1.0, y in 0.0f64..1.0) {
            let t = CoordinateTransformer::new(params(LensDirection::Back, DeviceOrientation::PortraitUp, 0));
            let p = t.transform_landmark(&lm(x, y));
            prop_assert_eq!(p.x, x * 390.0);
            prop_assert_eq!(p.y, y * 844.0);
        }

        #[test]
        fn prop_double_mirror_restores_x(x in 0.0f64..1.0, y in 0.0f64..1.0) {
            let mut p = params(LensDirection::Front, DeviceOrientation::PortraitUp, 0);
            p.screen_size = Size::new(1.0, 1.0);
            let t = CoordinateTransformer::new(p);
            let once = t.transform_landmark(&lm(x, y));
            let twice = t.transform_landmark(&lm(once.x, once.y));
            prop_assert!((twice.x - x).abs() < 1e-9);
            prop_assert!((twice.y - y).abs() < 1e-9);
        }
    }
}
