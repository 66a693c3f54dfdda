// Scoring pipeline - one sampling tick from keypoints to a smoothed score
//
// Presence gates scoring: while nobody is in frame the smoother is not fed,
// so the last smoothed value survives a short gap.

use crate::core::posture_metrics::{calculate_metrics, posture_ratio};
use crate::core::presence_detector::PresenceDetector;
use crate::core::score_engine::{score, status_for, Calibration, LiveSnapshot};
use crate::core::score_smoother::ScoreSmoother;
use crate::models::pose::{KeypointSet, ScoreResult, ScoringMode};

/// What one tick produced
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOutput {
    pub live: LiveSnapshot,
    /// Unsmoothed engine output, `None` when absent or the mode lacks input
    pub raw: Option<ScoreResult>,
    pub smoothed: Option<ScoreResult>,
    pub present: bool,
    /// Set only on the tick the person came back
    pub returned: bool,
    pub returned_notice: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScoringPipeline {
    presence: PresenceDetector,
    smoother: ScoreSmoother,
    tick: u64,
}

/// Derives every scoring input from the latest keypoints
pub fn live_snapshot(keypoints: Option<&KeypointSet>, external_tilt: Option<f64>) -> LiveSnapshot {
    let metrics = keypoints.map(calculate_metrics);
    LiveSnapshot {
        metrics,
        ratio: keypoints.and_then(posture_ratio),
        tilt: external_tilt.or(metrics.map(|m| m.neck_flex)),
    }
}

impl ScoringPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(
        &mut self,
        now_ms: i64,
        keypoints: Option<&KeypointSet>,
        external_tilt: Option<f64>,
        mode: ScoringMode,
        calibration: &Calibration,
    ) -> PipelineOutput {
        let tick = self.tick;
        self.tick += 1;

        let live = live_snapshot(keypoints, external_tilt);
        let keypoint_count = keypoints.map_or(0, |k| k.len());
        let presence = self.presence.update(now_ms, live.ratio, keypoint_count);

        let raw = if presence.present {
            score(mode, &live, calibration)
        } else {
            None
        };
        let smoothed = match raw {
            Some(result) => self.smoother.update(result.score, tick),
            None => None,
        }
        .map(|value| ScoreResult {
            score: value,
            status: status_for(mode, value),
        });

        PipelineOutput {
            live,
            raw,
            smoothed,
            present: presence.present,
            returned: presence.returned,
            returned_notice: self.presence.returned_notice_active(now_ms),
        }
    }

    pub fn presence(&self) -> &PresenceDetector {
        &self.presence
    }

    pub fn smoother(&self) -> &ScoreSmoother {
        &self.smoother
    }

    /// Drops history, smoothing state and the tick counter
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
