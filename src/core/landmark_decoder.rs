// Landmark decoding - validates detection payloads into complete keypoint sets

use crate::models::pose::{Keypoint, KeypointSet, KEYPOINT_COUNT};
use crate::models::protocol::DetectionPayload;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    Accepted(KeypointSet),
    /// Treated as "no person detected"; the caller keeps its previous snapshot
    Rejected { reason: String, point_count: usize },
}

/// Decodes one detection payload.
///
/// Landmarks missing either coordinate are skipped; the remainder must be
/// exactly 33 points.
pub fn decode_detection(payload: &DetectionPayload, timestamp: i64) -> DetectionOutcome {
    if !payload.success {
        return DetectionOutcome::Rejected {
            reason: payload
                .message
                .clone()
                .unwrap_or_else(|| "No pose detected".to_string()),
            point_count: 0,
        };
    }

    let points: Vec<Keypoint> = payload
        .landmarks
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|lm| Some((lm.x?, lm.y?)))
        .enumerate()
        .map(|(i, (x, y))| Keypoint::new(i as u8, x, y))
        .collect();

    let point_count = points.len();
    match KeypointSet::new(points, timestamp) {
        Some(set) => DetectionOutcome::Accepted(set),
        None => DetectionOutcome::Rejected {
            reason: format!("expected {} landmarks, got {}", KEYPOINT_COUNT, point_count),
            point_count,
        },
    }
}

/// Latest accepted keypoint snapshot, shared between the response
/// dispatcher and the sampling loop
#[derive(Debug, Clone, Default)]
pub struct LandmarkStore {
    inner: Arc<RwLock<StoreState>>,
}

#[derive(Debug, Default)]
struct StoreState {
    latest: Option<Arc<KeypointSet>>,
}

impl LandmarkStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a decoded detection. Rejected detections leave the snapshot as it was.
    pub fn apply(&self, outcome: DetectionOutcome) -> bool {
        match outcome {
            DetectionOutcome::Accepted(set) => {
                let mut state = self.inner.write();
                state.latest = Some(Arc::new(set));
                true
            }
            DetectionOutcome::Rejected { .. } => false,
        }
    }

    pub fn latest(&self) -> Option<Arc<KeypointSet>> {
        self.inner.read().latest.clone()
    }

    pub fn clear(&self) {
        let mut state = self.inner.write();
        state.latest = None;
    }
}
