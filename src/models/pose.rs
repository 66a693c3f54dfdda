// Data models for body keypoints, derived posture metrics, and scoring

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Number of landmarks in a complete body pose
pub const KEYPOINT_COUNT: usize = 33;

// ==============================================================================
// Keypoints
// ==============================================================================

/// MediaPipe Pose Landmark indices (33 total)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BodyLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl BodyLandmark {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A normalized 2D body landmark
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub index: u8,
    pub x: f64, // Normalized [0, 1] for image coordinates
    pub y: f64, // Normalized [0, 1] for image coordinates
}

impl Keypoint {
    pub fn new(index: u8, x: f64, y: f64) -> Self {
        Self { index, x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// An immutable, complete set of 33 keypoints for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeypointSet {
    points: Vec<Keypoint>,
    pub timestamp: i64,
}

impl KeypointSet {
    /// Builds a set from exactly 33 points; anything else is rejected.
    pub fn new(points: Vec<Keypoint>, timestamp: i64) -> Option<Self> {
        if points.len() != KEYPOINT_COUNT {
            return None;
        }
        Some(Self { points, timestamp })
    }

    pub fn get(&self, landmark: BodyLandmark) -> Keypoint {
        self.points[landmark.index()]
    }

    pub fn points(&self) -> &[Keypoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

// ==============================================================================
// Derived Metrics
// ==============================================================================

/// Posture metrics derived from a single keypoint set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseMetrics {
    pub torso_tilt: f64,      // degrees from vertical, shoulder center to hip center
    pub shoulder_tilt: f64,   // |ly - ry| * 100
    pub neck_flex: f64,       // degrees from vertical, nose to shoulder center
    pub head_z_delta: f64,    // nose.y - shoulderCenter.y, signed
    pub shoulder_asym_y: f64, // |ly - ry|
}

impl PoseMetrics {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::TorsoTilt => self.torso_tilt,
            Metric::ShoulderTilt => self.shoulder_tilt,
            Metric::NeckFlex => self.neck_flex,
            Metric::HeadZDelta => self.head_z_delta,
            Metric::ShoulderAsymY => self.shoulder_asym_y,
        }
    }

    pub fn is_finite(&self) -> bool {
        Metric::ALL.iter().all(|m| self.get(*m).is_finite())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    TorsoTilt,
    ShoulderTilt,
    NeckFlex,
    HeadZDelta,
    ShoulderAsymY,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::TorsoTilt,
        Metric::ShoulderTilt,
        Metric::NeckFlex,
        Metric::HeadZDelta,
        Metric::ShoulderAsymY,
    ];

    pub fn to_string(&self) -> &'static str {
        match self {
            Metric::TorsoTilt => "torsoTilt",
            Metric::ShoulderTilt => "shoulderTilt",
            Metric::NeckFlex => "neckFlex",
            Metric::HeadZDelta => "headZDelta",
            Metric::ShoulderAsymY => "shoulderAsymY",
        }
    }
}

/// Active per-metric thresholds for the metrics-threshold strategy.
///
/// Always replaced as a whole value; there is no API for patching a single metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSet {
    pub torso_tilt: f64,
    pub shoulder_tilt: f64,
    pub neck_flex: f64,
    pub head_z_delta: f64,
    pub shoulder_asym_y: f64,
}

impl ThresholdSet {
    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::TorsoTilt => self.torso_tilt,
            Metric::ShoulderTilt => self.shoulder_tilt,
            Metric::NeckFlex => self.neck_flex,
            Metric::HeadZDelta => self.head_z_delta,
            Metric::ShoulderAsymY => self.shoulder_asym_y,
        }
    }
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            torso_tilt: 10.0,
            shoulder_tilt: 7.0,
            neck_flex: 12.0,
            head_z_delta: -0.05,
            shoulder_asym_y: 0.03,
        }
    }
}

// ==============================================================================
// Scores
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PostureStatus {
    Good,
    Ok,
    Bad,
}

impl PostureStatus {
    pub fn to_string(&self) -> &'static str {
        match self {
            PostureStatus::Good => "GOOD",
            PostureStatus::Ok => "OK",
            PostureStatus::Bad => "BAD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: u8, // always within [0, 100]
    pub status: PostureStatus,
}

/// Which scoring strategy drives the live score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    #[default]
    MetricsThreshold,
    Ratio,
    TiltOnly,
}

impl ScoringMode {
    pub fn to_string(&self) -> &'static str {
        match self {
            ScoringMode::MetricsThreshold => "metrics_threshold",
            ScoringMode::Ratio => "ratio",
            ScoringMode::TiltOnly => "tilt_only",
        }
    }
}

// ==============================================================================
// Worker / Tracking State
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    NotStarted,
    Starting,
    Ready,
    Detecting,
    Dead,
}

/// Externally visible tracking status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum TrackingStatus {
    Idle,
    Starting,
    Tracking,
    PersonNotInFrame,
    Unavailable(String),
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingStatus::Idle => write!(f, "Idle"),
            TrackingStatus::Starting => write!(f, "Starting"),
            TrackingStatus::Tracking => write!(f, "Tracking"),
            TrackingStatus::PersonNotInFrame => write!(f, "Person not in frame"),
            TrackingStatus::Unavailable(reason) => write!(f, "Tracking unavailable: {}", reason),
        }
    }
}

// ==============================================================================
// Error Types
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("Pose worker not found (searched {} locations)", searched.len())]
    WorkerNotFound { searched: Vec<PathBuf> },

    #[error("Pose worker failed to start: {0}")]
    WorkerStartupFailure(String),

    #[error("Pose worker died: {0}")]
    WorkerDied(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid calibration: {0}")]
    InvalidCalibration(String),

    #[error("Connection failed: {0}")]
    ConnectionFailure(String),

    #[error("Worker reported error: {0}")]
    WorkerReported(String),

    #[error("Frame encoding failed: {0}")]
    EncodeFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Tracking already running")]
    AlreadyRunning,

    #[error("Tracking not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PoseError {
    /// Errors after which tracking cannot continue without a fresh start.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PoseError::WorkerNotFound { .. }
                | PoseError::WorkerStartupFailure(_)
                | PoseError::WorkerDied(_)
                | PoseError::ConnectionFailure(_)
        )
    }
}

pub type PoseResult<T> = Result<T, PoseError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn points(n: usize) -> Vec<Keypoint> {
        (0..n).map(|i| Keypoint::new(i as u8, 0.5, 0.5)).collect()
    }

    #[test]
    fn test_keypoint_set_requires_33_points() {
        assert!(KeypointSet::new(points(33), 0).is_some());
        assert!(KeypointSet::new(points(20), 0).is_none());
        assert!(KeypointSet::new(points(34), 0).is_none());
    }

    #[test]
    fn test_landmark_lookup() {
        let mut pts = points(33);
        pts[11] = Keypoint::new(11, 0.4, 0.6);
        let set = KeypointSet::new(pts, 0).unwrap();
        let shoulder = set.get(BodyLandmark::LeftShoulder);
        assert_eq!(shoulder.x, 0.4);
        assert_eq!(shoulder.y, 0.6);
    }

    #[test]
    fn test_threshold_defaults() {
        let thresholds = ThresholdSet::default();
        assert_eq!(thresholds.get(Metric::TorsoTilt), 10.0);
        assert_eq!(thresholds.get(Metric::HeadZDelta), -0.05);
        assert_eq!(thresholds.get(Metric::ShoulderAsymY), 0.03);
    }

    #[test]
    fn test_error_fatality() {
        assert!(PoseError::WorkerNotFound { searched: vec![] }.is_fatal());
        assert!(PoseError::ConnectionFailure("refused".into()).is_fatal());
        assert!(!PoseError::MalformedResponse("bad".into()).is_fatal());
        assert!(!PoseError::InvalidCalibration("nan".into()).is_fatal());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(TrackingStatus::PersonNotInFrame.to_string(), "Person not in frame");
        assert_eq!(
            TrackingStatus::Unavailable("worker died".into()).to_string(),
            "Tracking unavailable: worker died"
        );
    }
}
