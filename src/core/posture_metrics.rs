// Pure posture geometry over a complete keypoint set

use crate::models::pose::{BodyLandmark, Keypoint, KeypointSet, PoseMetrics};

/// Angle of the segment p1 -> p2 away from the image vertical, in degrees (absolute).
pub fn angle_from_vertical(p1: Keypoint, p2: Keypoint) -> f64 {
    let dx = p2.x - p1.x;
    let dy = p2.y - p1.y;
    dx.atan2(dy).to_degrees().abs()
}

fn midpoint(a: Keypoint, b: Keypoint) -> Keypoint {
    Keypoint::new(a.index, (a.x + b.x) / 2.0, (a.y + b.y) / 2.0)
}

/// Computes the five posture metrics for one frame
pub fn calculate_metrics(keypoints: &KeypointSet) -> PoseMetrics {
    let nose = keypoints.get(BodyLandmark::Nose);
    let left_shoulder = keypoints.get(BodyLandmark::LeftShoulder);
    let right_shoulder = keypoints.get(BodyLandmark::RightShoulder);
    let left_hip = keypoints.get(BodyLandmark::LeftHip);
    let right_hip = keypoints.get(BodyLandmark::RightHip);

    let shoulder_center = midpoint(left_shoulder, right_shoulder);
    let hip_center = midpoint(left_hip, right_hip);
    let shoulder_dy = (left_shoulder.y - right_shoulder.y).abs();

    PoseMetrics {
        torso_tilt: angle_from_vertical(shoulder_center, hip_center),
        shoulder_tilt: shoulder_dy * 100.0,
        neck_flex: angle_from_vertical(nose, shoulder_center),
        head_z_delta: nose.y - shoulder_center.y,
        shoulder_asym_y: shoulder_dy,
    }
}

/// Face-to-shoulder height ratio normalized by shoulder width.
///
/// The face center averages the nose and both eyes. Returns `None` when the
/// shoulders collapse to a point or any coordinate is not finite.
pub fn posture_ratio(keypoints: &KeypointSet) -> Option<f64> {
    let nose = keypoints.get(BodyLandmark::Nose);
    let left_eye = keypoints.get(BodyLandmark::LeftEye);
    let right_eye = keypoints.get(BodyLandmark::RightEye);
    let left_shoulder = keypoints.get(BodyLandmark::LeftShoulder);
    let right_shoulder = keypoints.get(BodyLandmark::RightShoulder);

    let face_center_y = (nose.y + left_eye.y + right_eye.y) / 3.0;
    let shoulder_center_y = (left_shoulder.y + right_shoulder.y) / 2.0;
    let shoulder_width = (left_shoulder.x - right_shoulder.x).hypot(left_shoulder.y - right_shoulder.y);

    if !shoulder_width.is_finite() || shoulder_width <= 0.0 {
        return None;
    }

    let ratio = (face_center_y - shoulder_center_y).abs() / shoulder_width;
    ratio.is_finite().then_some(ratio)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::pose::KEYPOINT_COUNT;

    /// Upright seated pose: head straight above level shoulders, hips below.
    pub(crate) fn upright_pose() -> KeypointSet {
        let mut points: Vec<Keypoint> = (0..KEYPOINT_COUNT)
            .map(|i| Keypoint::new(i as u8, 0.5, 0.5))
            .collect();
        let mut set = |landmark: BodyLandmark, x: f64, y: f64| {
            points[landmark.index()] = Keypoint::new(landmark as u8, x, y);
        };
        set(BodyLandmark::Nose, 0.5, 0.3);
        set(BodyLandmark::LeftEye, 0.47, 0.27);
        set(BodyLandmark::RightEye, 0.53, 0.27);
        set(BodyLandmark::LeftShoulder, 0.6, 0.5);
        set(BodyLandmark::RightShoulder, 0.4, 0.5);
        set(BodyLandmark::LeftHip, 0.58, 0.9);
        set(BodyLandmark::RightHip, 0.42, 0.9);
        KeypointSet::new(points, 0).unwrap()
    }

    pub(crate) fn with_point(base: &KeypointSet, landmark: BodyLandmark, x: f64, y: f64) -> KeypointSet {
        let mut points = base.points().to_vec();
        points[landmark.index()] = Keypoint::new(landmark as u8, x, y);
        KeypointSet::new(points, base.timestamp).unwrap()
    }

    #[test]
    fn test_angle_from_vertical() {
        let a = Keypoint::new(0, 0.5, 0.0);
        assert!((angle_from_vertical(a, Keypoint::new(0, 0.5, 1.0)) - 0.0).abs() < 1e-9);
        assert!((angle_from_vertical(a, Keypoint::new(0, 1.5, 1.0)) - 45.0).abs() < 1e-9);
        // absolute value: leaning either way reads the same
        assert!((angle_from_vertical(a, Keypoint::new(0, -0.5, 1.0)) - 45.0).abs() < 1e-9);
    }

    #[test]
    fn test_upright_metrics() {
        let metrics = calculate_metrics(&upright_pose());
        assert!(metrics.torso_tilt.abs() < 1e-9);
        assert!(metrics.neck_flex.abs() < 1e-9);
        assert_eq!(metrics.shoulder_tilt, 0.0);
        assert_eq!(metrics.shoulder_asym_y, 0.0);
        assert!((metrics.head_z_delta - (-0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_tilted_shoulders() {
        let pose = with_point(&upright_pose(), BodyLandmark::LeftShoulder, 0.6, 0.55);
        let metrics = calculate_metrics(&pose);
        assert!((metrics.shoulder_asym_y - 0.05).abs() < 1e-9);
        assert!((metrics.shoulder_tilt - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_forward_head_raises_neck_flex() {
        let pose = with_point(&upright_pose(), BodyLandmark::Nose, 0.6, 0.35);
        let metrics = calculate_metrics(&pose);
        // nose (0.6, 0.35) to shoulder center (0.5, 0.5)
        let expected = (-0.1f64).atan2(0.15).to_degrees().abs();
        assert!((metrics.neck_flex - expected).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_deterministic() {
        let pose = upright_pose();
        assert_eq!(calculate_metrics(&pose), calculate_metrics(&pose));
    }

    #[test]
    fn test_posture_ratio() {
        let ratio = posture_ratio(&upright_pose()).unwrap();
        // face center y = (0.3 + 0.27 + 0.27) / 3 = 0.28, shoulder width 0.2
        assert!((ratio - 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_posture_ratio_degenerate_shoulders() {
        let base = upright_pose();
        let pose = with_point(&base, BodyLandmark::LeftShoulder, 0.4, 0.5);
        assert_eq!(posture_ratio(&pose), None);

        let pose = with_point(&base, BodyLandmark::Nose, f64::NAN, f64::NAN);
        assert_eq!(posture_ratio(&pose), None);
    }
}
