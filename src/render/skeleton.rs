use serde::Serialize;

use super::transform::{BoundingBox, CoordinateTransformer, Point};
use crate::pose::{LandmarkType, PoseFrame};

/// 骨格の接続定義 (開始ランドマーク, 終了ランドマーク)
pub const SKELETON_CONNECTIONS: [(LandmarkType, LandmarkType); 35] = [
    // 顔
    (LandmarkType::LeftEar, LandmarkType::LeftEyeOuter),
    (LandmarkType::LeftEyeOuter, LandmarkType::LeftEye),
    (LandmarkType::LeftEye, LandmarkType::LeftEyeInner),
    (LandmarkType::LeftEyeInner, LandmarkType::Nose),
    (LandmarkType::Nose, LandmarkType::RightEyeInner),
    (LandmarkType::RightEyeInner, LandmarkType::RightEye),
    (LandmarkType::RightEye, LandmarkType::RightEyeOuter),
    (LandmarkType::RightEyeOuter, LandmarkType::RightEar),
    (LandmarkType::MouthLeft, LandmarkType::MouthRight),
    // 上半身
    (LandmarkType::LeftShoulder, LandmarkType::RightShoulder),
    (LandmarkType::LeftShoulder, LandmarkType::LeftElbow),
    (LandmarkType::LeftElbow, LandmarkType::LeftWrist),
    (LandmarkType::RightShoulder, LandmarkType::RightElbow),
    (LandmarkType::RightElbow, LandmarkType::RightWrist),
    // 手
    (LandmarkType::LeftWrist, LandmarkType::LeftPinky),
    (LandmarkType::LeftWrist, LandmarkType::LeftIndex),
    (LandmarkType::LeftWrist, LandmarkType::LeftThumb),
    (LandmarkType::LeftPinky, LandmarkType::LeftIndex),
    (LandmarkType::RightWrist, LandmarkType::RightPinky),
    (LandmarkType::RightWrist, LandmarkType::RightIndex),
    (LandmarkType::RightWrist, LandmarkType::RightThumb),
    (LandmarkType::RightPinky, LandmarkType::RightIndex),
    // 胴体
    (LandmarkType::LeftShoulder, LandmarkType::LeftHip),
    (LandmarkType::RightShoulder, LandmarkType::RightHip),
    (LandmarkType::LeftHip, LandmarkType::RightHip),
    // 下半身
    (LandmarkType::LeftHip, LandmarkType::LeftKnee),
    (LandmarkType::LeftKnee, LandmarkType::LeftAnkle),
    (LandmarkType::RightHip, LandmarkType::RightKnee),
    (LandmarkType::RightKnee, LandmarkType::RightAnkle),
    // 足
    (LandmarkType::LeftAnkle, LandmarkType::LeftHeel),
    (LandmarkType::LeftHeel, LandmarkType::LeftFootIndex),
    (LandmarkType::LeftAnkle, LandmarkType::LeftFootIndex),
    (LandmarkType::RightAnkle, LandmarkType::RightHeel),
    (LandmarkType::RightHeel, LandmarkType::RightFootIndex),
    (LandmarkType::RightAnkle, LandmarkType::RightFootIndex),
];

/// 簡易描画モードで使う主要関節のみの接続
pub const SIMPLIFIED_CONNECTIONS: [(LandmarkType, LandmarkType); 12] = [
    (LandmarkType::LeftShoulder, LandmarkType::RightShoulder),
    (LandmarkType::LeftShoulder, LandmarkType::LeftElbow),
    (LandmarkType::LeftElbow, LandmarkType::LeftWrist),
    (LandmarkType::RightShoulder, LandmarkType::RightElbow),
    (LandmarkType::RightElbow, LandmarkType::RightWrist),
    (LandmarkType::LeftShoulder, LandmarkType::LeftHip),
    (LandmarkType::RightShoulder, LandmarkType::RightHip),
    (LandmarkType::LeftHip, LandmarkType::RightHip),
    (LandmarkType::LeftHip, LandmarkType::LeftKnee),
    (LandmarkType::LeftKnee, LandmarkType::LeftAnkle),
    (LandmarkType::RightHip, LandmarkType::RightKnee),
    (LandmarkType::RightKnee, LandmarkType::RightAnkle),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverlayPoint {
    pub landmark_type: LandmarkType,
    pub position: Point,
    pub confidence: f64,
    /// 採点に使える信頼度か。UI側の色分け用
    pub reliable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OverlayLine {
    pub from: LandmarkType,
    pub to: LandmarkType,
    pub start: Point,
    pub end: Point,
}

/// 画面座標に変換済みの骨格オーバーレイ
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct SkeletonOverlay {
    pub points: Vec<OverlayPoint>,
    pub lines: Vec<OverlayLine>,
    pub bounding_box: Option<BoundingBox>,
    pub simplified: bool,
}

impl SkeletonOverlay {
    /// 姿勢をオーバーレイに変換
    ///
    /// 最低信頼度未満のランドマークは描かない。線は両端が描けるときのみ。
    pub fn build(pose: &PoseFrame, transformer: &CoordinateTransformer, padding: f64, simplified: bool) -> Self {
        let connections: &[(LandmarkType, LandmarkType)] = if simplified {
            &SIMPLIFIED_CONNECTIONS
        } else {
            &SKELETON_CONNECTIONS
        };

        let points = pose
            .usable_landmarks()
            .filter(|lm| !simplified || connections.iter().any(|(a, b)| *a == lm.landmark_type || *b == lm.landmark_type))
            .map(|lm| OverlayPoint {
                landmark_type: lm.landmark_type,
                position: transformer.transform_landmark(lm),
                confidence: lm.confidence,
                reliable: lm.is_reliable(),
            })
            .collect();

        let lines = connections
            .iter()
            .filter_map(|(from, to)| {
                let start = pose.get(*from).filter(|lm| lm.is_usable())?;
                let end = pose.get(*to).filter(|lm| lm.is_usable())?;
                Some(OverlayLine {
                    from: *from,
                    to: *to,
                    start: transformer.transform_landmark(start),
                    end: transformer.transform_landmark(end),
                })
            })
            .collect();

        Self {
            points,
            lines,
            bounding_box: transformer.get_bounding_box(pose, padding),
            simplified,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{DeviceOrientation, LensDirection, Size};
    use crate::pose::Landmark;
    use crate::render::transform::TransformParams;

    fn transformer() -> CoordinateTransformer {
        CoordinateTransformer::new(TransformParams {
            image_size: Size::new(480.0, 640.0),
            screen_size: Size::new(100.0, 200.0),
            lens_direction: LensDirection::Back,
            device_orientation: DeviceOrientation::PortraitUp,
            sensor_orientation: 0,
        })
    }

    fn arm_pose(elbow_confidence: f64) -> PoseFrame {
        PoseFrame::new(
            [
                Landmark::new(LandmarkType::LeftShoulder, 0.4, 0.3, 0.0, 0.9),
                Landmark::new(LandmarkType::LeftElbow, 0.4, 0.5, 0.0, elbow_confidence),
                Landmark::new(LandmarkType::LeftWrist, 0.4, 0.7, 0.0, 0.6),
                Landmark::new(LandmarkType::LeftEye, 0.45, 0.1, 0.0, 0.9),
            ],
            0,
        )
    }

    #[test]
    fn test_connections_are_distinct_pairs() {
        for (i, a) in SKELETON_CONNECTIONS.iter().enumerate() {
            assert_ne!(a.0, a.1);
            for b in SKELETON_CONNECTIONS.iter().skip(i + 1) {
                assert!(a != b && (a.0, a.1) != (b.1, b.0), "duplicate connection {:?}", a);
            }
        }
        for c in SIMPLIFIED_CONNECTIONS.iter() {
            assert!(SKELETON_CONNECTIONS.contains(c));
        }
    }

    #[test]
    fn test_overlay_projects_points_and_lines() {
        let overlay = SkeletonOverlay::build(&arm_pose(0.9), &transformer(), 0.0, false);
        assert_eq!(overlay.points.len(), 4);
        assert_eq!(overlay.lines.len(), 2);
        let shoulder = overlay
            .points
            .iter()
            .find(|p| p.landmark_type == LandmarkType::LeftShoulder)
            .unwrap();
        assert!((shoulder.position.x - 40.0).abs() < 1e-9);
        assert!((shoulder.position.y - 60.0).abs() < 1e-9);
        assert!(shoulder.reliable);
        assert!(overlay.bounding_box.is_some());
    }

    #[test]
    fn test_overlay_skips_lines_with_weak_endpoint() {
        let overlay = SkeletonOverlay::build(&arm_pose(0.2), &transformer(), 0.0, false);
        assert_eq!(overlay.points.len(), 3);
        assert!(overlay.lines.is_empty());
    }

    #[test]
    fn test_simplified_overlay_drops_face() {
        let overlay = SkeletonOverlay::build(&arm_pose(0.9), &transformer(), 0.0, true);
        assert!(overlay.simplified);
        assert!(overlay.points.iter().all(|p| p.landmark_type != LandmarkType::LeftEye));
        assert_eq!(overlay.lines.len(), 2);
    }

    #[test]
    fn test_empty_pose_gives_empty_overlay() {
        let overlay = SkeletonOverlay::build(&PoseFrame::empty(0), &transformer(), 0.1, false);
        assert!(overlay.is_empty());
        assert!(overlay.bounding_box.is_none());
    }
}
