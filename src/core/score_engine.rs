// Posture scoring strategies and calibration state
//
// Each strategy keeps its own formula and status cutoffs (85/70 for
// metrics, 80/60 for ratio and tilt).

use crate::models::pose::{
    Metric, PoseError, PoseMetrics, PoseResult, PostureStatus, ScoreResult, ScoringMode, ThresholdSet,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Score for an invalid ratio
pub const NEUTRAL_SCORE: u8 = 50;

/// Default tilt threshold in degrees for single-axis mode
pub const DEFAULT_TILT_THRESHOLD: f64 = 12.0;

const TILT_CALIBRATION_MARGIN: f64 = 8.0;
const TILT_CALIBRATION_LIMIT: f64 = 30.0;

const UNCALIBRATED_RATIO_CUTOFF: f64 = 0.98;

// ==============================================================================
// Metrics-threshold strategy
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Above,
    Below,
}

struct PenaltyRule {
    metric: Metric,
    direction: Direction,
    range: f64,
    weight: f64,
    calibration_margin: f64,
}

// headZDelta penalises values below its threshold; the rest penalise values above.
const PENALTY_RULES: [PenaltyRule; 5] = [
    PenaltyRule {
        metric: Metric::TorsoTilt,
        direction: Direction::Above,
        range: 20.0,
        weight: 25.0,
        calibration_margin: 2.0,
    },
    PenaltyRule {
        metric: Metric::ShoulderTilt,
        direction: Direction::Above,
        range: 20.0,
        weight: 15.0,
        calibration_margin: 2.0,
    },
    PenaltyRule {
        metric: Metric::NeckFlex,
        direction: Direction::Above,
        range: 20.0,
        weight: 35.0,
        calibration_margin: 2.0,
    },
    PenaltyRule {
        metric: Metric::HeadZDelta,
        direction: Direction::Below,
        range: 0.10,
        weight: 45.0,
        calibration_margin: -0.02,
    },
    PenaltyRule {
        metric: Metric::ShoulderAsymY,
        direction: Direction::Above,
        range: 0.07,
        weight: 15.0,
        calibration_margin: 0.01,
    },
];

impl PenaltyRule {
    fn penalty(&self, value: f64, threshold: f64) -> i32 {
        let excess = match self.direction {
            Direction::Above => value - threshold,
            Direction::Below => threshold - value,
        };
        if !(excess > 0.0) {
            return 0;
        }
        // the cap equals the weight: a full range of excess costs the whole weight
        ((excess / self.range) * self.weight).min(self.weight) as i32
    }
}

pub fn score_metrics(metrics: &PoseMetrics, thresholds: &ThresholdSet) -> ScoreResult {
    let mut score: i32 = 100;
    for rule in &PENALTY_RULES {
        score -= rule.penalty(metrics.get(rule.metric), thresholds.get(rule.metric));
    }
    let score = clamp_score(score);
    ScoreResult {
        score,
        status: status_for(ScoringMode::MetricsThreshold, score),
    }
}

// ==============================================================================
// Ratio strategy
// ==============================================================================

pub fn score_ratio(current: f64, baseline: Option<f64>) -> ScoreResult {
    let score = match baseline {
        Some(calibrated) => ratio_score_calibrated(current, calibrated),
        None if current.is_nan() || current <= 0.0 => NEUTRAL_SCORE,
        None if current >= UNCALIBRATED_RATIO_CUTOFF => 85,
        None => 30,
    };
    ScoreResult {
        score,
        status: status_for(ScoringMode::Ratio, score),
    }
}

fn ratio_score_calibrated(current: f64, calibrated: f64) -> u8 {
    if calibrated.is_nan() || current.is_nan() || calibrated <= 0.0 || current <= 0.0 {
        return NEUTRAL_SCORE;
    }
    let drop = calibrated - current;
    if drop <= 0.0 {
        return 100;
    }
    clamp_score((100.0 - drop * 200.0) as i32)
}

// ==============================================================================
// Tilt-only strategy
// ==============================================================================

/// (upper bound of the band as excess over the threshold, per-degree slope, band floor)
const TILT_BANDS: [(f64, f64, f64); 3] = [(5.0, 3.0, 80.0), (10.0, 4.0, 60.0), (20.0, 2.0, 30.0)];

pub fn score_tilt(tilt: f64, threshold: f64) -> ScoreResult {
    let magnitude = tilt.abs();
    let score = if magnitude.is_nan() {
        NEUTRAL_SCORE
    } else if magnitude <= threshold {
        100
    } else {
        let excess = magnitude - threshold;
        // each band starts at the previous band's floor and only counts degrees past its own start
        let mut start = 100.0;
        let mut band_start = 0.0;
        let mut banded = None;
        for (limit, slope, floor) in TILT_BANDS {
            if excess <= limit {
                banded = Some((start - (excess - band_start) * slope).max(floor));
                break;
            }
            start = floor;
            band_start = limit;
        }
        let raw = banded.unwrap_or_else(|| (start - (excess - band_start)).max(0.0));
        clamp_score(raw as i32)
    };
    ScoreResult {
        score,
        status: status_for(ScoringMode::TiltOnly, score),
    }
}

/// Status band for `score` under the cutoffs of `mode`
pub fn status_for(mode: ScoringMode, score: u8) -> PostureStatus {
    let (good, ok) = match mode {
        ScoringMode::MetricsThreshold => (85, 70),
        ScoringMode::Ratio | ScoringMode::TiltOnly => (80, 60),
    };
    if score >= good {
        PostureStatus::Good
    } else if score >= ok {
        PostureStatus::Ok
    } else {
        PostureStatus::Bad
    }
}

pub(crate) fn clamp_score(score: i32) -> u8 {
    score.clamp(0, 100) as u8
}

// ==============================================================================
// Calibration
// ==============================================================================

/// Everything calibration can set. Swapped as one value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub thresholds: ThresholdSet,
    pub baseline_ratio: Option<f64>,
    pub tilt_threshold: Option<f64>,
}

/// The live inputs a calibration reads from
#[derive(Debug, Clone, Copy, Default)]
pub struct LiveSnapshot {
    pub metrics: Option<PoseMetrics>,
    pub ratio: Option<f64>,
    pub tilt: Option<f64>,
}

pub fn thresholds_from_metrics(metrics: &PoseMetrics) -> PoseResult<ThresholdSet> {
    if !metrics.is_finite() {
        return Err(PoseError::InvalidCalibration(
            "pose metrics are not finite".to_string(),
        ));
    }
    let value = |metric: Metric| {
        let rule = PENALTY_RULES.iter().find(|r| r.metric == metric);
        metrics.get(metric) + rule.map(|r| r.calibration_margin).unwrap_or(0.0)
    };
    Ok(ThresholdSet {
        torso_tilt: value(Metric::TorsoTilt),
        shoulder_tilt: value(Metric::ShoulderTilt),
        neck_flex: value(Metric::NeckFlex),
        head_z_delta: value(Metric::HeadZDelta),
        shoulder_asym_y: value(Metric::ShoulderAsymY),
    })
}

/// Read-mostly calibration store shared between the scoring loop and callers
#[derive(Debug, Clone, Default)]
pub struct CalibrationStore {
    inner: Arc<RwLock<Arc<Calibration>>>,
}

impl CalibrationStore {
    pub fn new(initial: Calibration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
        }
    }

    pub fn snapshot(&self) -> Arc<Calibration> {
        self.inner.read().clone()
    }

    /// Captures the live snapshot as the new baseline for `mode`.
    ///
    /// Leaves the current calibration untouched and returns `InvalidCalibration`
    /// when the snapshot cannot serve as a baseline.
    pub fn calibrate(&self, mode: ScoringMode, live: &LiveSnapshot) -> PoseResult<Arc<Calibration>> {
        let current = self.snapshot();
        let mut next = (*current).clone();

        match mode {
            ScoringMode::MetricsThreshold => {
                let metrics = live.metrics.ok_or_else(|| {
                    PoseError::InvalidCalibration("no pose metrics available".to_string())
                })?;
                next.thresholds = thresholds_from_metrics(&metrics)?;
            }
            ScoringMode::Ratio => {
                let ratio = live
                    .ratio
                    .filter(|r| !r.is_nan() && *r > 0.0)
                    .ok_or_else(|| PoseError::InvalidCalibration(format!("invalid ratio: {:?}", live.ratio)))?;
                next.baseline_ratio = Some(ratio);
            }
            ScoringMode::TiltOnly => {
                let tilt = live
                    .tilt
                    .filter(|t| t.is_finite() && t.abs() < TILT_CALIBRATION_LIMIT)
                    .ok_or_else(|| PoseError::InvalidCalibration(format!("invalid tilt: {:?}", live.tilt)))?;
                next.tilt_threshold = Some(tilt.abs() + TILT_CALIBRATION_MARGIN);
            }
        }

        let next = Arc::new(next);
        *self.inner.write() = next.clone();
        info!("Calibrated {} scoring", mode.to_string());
        debug!("Calibration now {:?}", next);
        Ok(next)
    }

    pub fn reset(&self) {
        *self.inner.write() = Arc::new(Calibration::default());
    }
}

/// Scores the live snapshot with the strategy for `mode`.
///
/// Returns `None` when the mode's input is missing from the snapshot.
pub fn score(mode: ScoringMode, live: &LiveSnapshot, calibration: &Calibration) -> Option<ScoreResult> {
    match mode {
        ScoringMode::MetricsThreshold => live
            .metrics
            .map(|metrics| score_metrics(&metrics, &calibration.thresholds)),
        ScoringMode::Ratio => live
            .ratio
            .map(|ratio| score_ratio(ratio, calibration.baseline_ratio)),
        ScoringMode::TiltOnly => live.tilt.map(|tilt| {
            score_tilt(tilt, calibration.tilt_threshold.unwrap_or(DEFAULT_TILT_THRESHOLD))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(torso: f64, shoulder: f64, neck: f64, head: f64, asym: f64) -> PoseMetrics {
        PoseMetrics {
            torso_tilt: torso,
            shoulder_tilt: shoulder,
            neck_flex: neck,
            head_z_delta: head,
            shoulder_asym_y: asym,
        }
    }

    #[test]
    fn test_perfect_posture_scores_100() {
        let result = score_metrics(&metrics(0.0, 0.0, 0.0, 0.0, 0.0), &ThresholdSet::default());
        assert_eq!(result.score, 100);
        assert_eq!(result.status, PostureStatus::Good);
    }

    #[test]
    fn test_neck_penalty() {
        // neck 22 vs threshold 12: excess 10 / 20 * 35 = 17.5 -> 17
        let result = score_metrics(&metrics(0.0, 0.0, 22.0, 0.0, 0.0), &ThresholdSet::default());
        assert_eq!(result.score, 83);
        assert_eq!(result.status, PostureStatus::Ok);
    }

    #[test]
    fn test_head_z_penalises_below_threshold() {
        // -0.10 vs -0.05: excess 0.05 / 0.10 * 45 = 22.5 -> 22
        let result = score_metrics(&metrics(0.0, 0.0, 0.0, -0.10, 0.0), &ThresholdSet::default());
        assert_eq!(result.score, 78);

        // a value above the threshold is never penalised
        let result = score_metrics(&metrics(0.0, 0.0, 0.0, 0.2, 0.0), &ThresholdSet::default());
        assert_eq!(result.score, 100);
    }

    #[test]
    fn test_penalties_are_capped() {
        let result = score_metrics(&metrics(90.0, 90.0, 90.0, -5.0, 1.0), &ThresholdSet::default());
        // 25 + 15 + 35 + 45 + 15 = 135 > 100
        assert_eq!(result.score, 0);
        assert_eq!(result.status, PostureStatus::Bad);
    }

    #[test]
    fn test_ratio_scores() {
        assert_eq!(score_ratio(1.2, Some(1.1)).score, 100);
        assert_eq!(score_ratio(1.0, Some(1.125)).score, 75);
        assert_eq!(score_ratio(1.25, Some(1.5)).score, 50);
        assert_eq!(score_ratio(0.4, Some(1.1)).score, 0);
        assert_eq!(score_ratio(f64::NAN, Some(1.1)).score, 50);
        assert_eq!(score_ratio(0.0, Some(1.1)).score, 50);
        assert_eq!(score_ratio(1.0, Some(f64::NAN)).score, 50);
    }

    #[test]
    fn test_ratio_uncalibrated_fallback() {
        assert_eq!(score_ratio(1.0, None).score, 85);
        assert_eq!(score_ratio(0.5, None).score, 30);
        assert_eq!(score_ratio(f64::NAN, None).score, 50);
    }

    #[test]
    fn test_tilt_bands() {
        assert_eq!(score_tilt(10.0, 12.0).score, 100);
        assert_eq!(score_tilt(-12.0, 12.0).score, 100);
        // band 1: excess 3 -> 100 - 9
        assert_eq!(score_tilt(15.0, 12.0).score, 91);
        // band 2: excess 6 -> 80 - 1 * 4
        assert_eq!(score_tilt(18.0, 12.0).score, 76);
        // band 2: excess 8 -> 80 - 3 * 4
        assert_eq!(score_tilt(20.0, 12.0).score, 68);
        // band 3: excess 15 -> 60 - 5 * 2
        assert_eq!(score_tilt(27.0, 12.0).score, 50);
        // beyond: excess 25 -> 30 - 5
        assert_eq!(score_tilt(37.0, 12.0).score, 25);
        assert_eq!(score_tilt(170.0, 12.0).score, 0);
        assert_eq!(score_tilt(15.0, 12.0).status, PostureStatus::Good);
        assert_eq!(score_tilt(20.0, 12.0).status, PostureStatus::Ok);
        assert_eq!(score_tilt(27.0, 12.0).status, PostureStatus::Bad);
    }

    #[test]
    fn test_scores_stay_in_range() {
        let extremes = [f64::MAX, f64::MIN, 0.0, -1e9, 1e9, f64::INFINITY, f64::NEG_INFINITY, f64::NAN];
        for value in extremes {
            let m = metrics(value, value, value, value, value);
            assert!(score_metrics(&m, &ThresholdSet::default()).score <= 100);
            assert!(score_ratio(value, Some(1.0)).score <= 100);
            assert!(score_ratio(value, None).score <= 100);
            assert!(score_tilt(value, DEFAULT_TILT_THRESHOLD).score <= 100);
        }
        assert_eq!(score_tilt(f64::INFINITY, DEFAULT_TILT_THRESHOLD).score, 0);
    }

    #[test]
    fn test_calibrate_metrics_adds_margins() {
        let store = CalibrationStore::default();
        let live = LiveSnapshot {
            metrics: Some(metrics(5.0, 3.0, 8.0, -0.1, 0.02)),
            ..Default::default()
        };
        let calibration = store.calibrate(ScoringMode::MetricsThreshold, &live).unwrap();
        assert!((calibration.thresholds.torso_tilt - 7.0).abs() < 1e-9);
        assert!((calibration.thresholds.shoulder_tilt - 5.0).abs() < 1e-9);
        assert!((calibration.thresholds.neck_flex - 10.0).abs() < 1e-9);
        assert!((calibration.thresholds.head_z_delta - (-0.12)).abs() < 1e-9);
        assert!((calibration.thresholds.shoulder_asym_y - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_calibration_is_idempotent() {
        let store = CalibrationStore::default();
        let live = LiveSnapshot {
            metrics: Some(metrics(5.0, 3.0, 8.0, -0.1, 0.02)),
            ratio: Some(1.05),
            tilt: Some(-6.0),
        };
        for mode in [ScoringMode::MetricsThreshold, ScoringMode::Ratio, ScoringMode::TiltOnly] {
            let first = store.calibrate(mode, &live).unwrap();
            let second = store.calibrate(mode, &live).unwrap();
            assert_eq!(first, second);
        }
        let calibration = store.snapshot();
        assert_eq!(calibration.baseline_ratio, Some(1.05));
        assert_eq!(calibration.tilt_threshold, Some(14.0));
    }

    #[test]
    fn test_invalid_calibration_is_reported_and_ignored() {
        let store = CalibrationStore::default();
        let before = store.snapshot();

        let nan = LiveSnapshot {
            metrics: Some(metrics(f64::NAN, 0.0, 0.0, 0.0, 0.0)),
            ratio: Some(f64::NAN),
            tilt: Some(45.0),
        };
        for mode in [ScoringMode::MetricsThreshold, ScoringMode::Ratio, ScoringMode::TiltOnly] {
            assert!(matches!(
                store.calibrate(mode, &nan),
                Err(PoseError::InvalidCalibration(_))
            ));
        }
        assert!(matches!(
            store.calibrate(ScoringMode::Ratio, &LiveSnapshot::default()),
            Err(PoseError::InvalidCalibration(_))
        ));
        assert_eq!(*store.snapshot(), *before);
    }

    #[test]
    fn test_score_dispatch_uses_calibration() {
        let calibration = Calibration {
            baseline_ratio: Some(1.125),
            tilt_threshold: Some(20.0),
            ..Default::default()
        };
        let live = LiveSnapshot {
            metrics: None,
            ratio: Some(1.0),
            tilt: Some(18.0),
        };
        assert_eq!(score(ScoringMode::Ratio, &live, &calibration).unwrap().score, 75);
        assert_eq!(score(ScoringMode::TiltOnly, &live, &calibration).unwrap().score, 100);
        assert!(score(ScoringMode::MetricsThreshold, &live, &calibration).is_none());
    }

    #[test]
    fn test_status_cutoffs_per_mode() {
        assert_eq!(status_for(ScoringMode::MetricsThreshold, 80), PostureStatus::Ok);
        assert_eq!(status_for(ScoringMode::Ratio, 80), PostureStatus::Good);
        assert_eq!(status_for(ScoringMode::TiltOnly, 65), PostureStatus::Ok);
        assert_eq!(status_for(ScoringMode::MetricsThreshold, 65), PostureStatus::Bad);
    }
}
