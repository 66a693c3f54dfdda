// Presence detection - decides whether a person is in frame from the ratio stream
//
// A frozen face-to-shoulder ratio means the worker keeps returning the same
// pose (camera covered, user gone), so presence is inferred from the ratio
// continuing to move.

/// Minimum absolute ratio change between consecutive samples that counts as movement
pub const RATIO_EPSILON: f64 = 0.002;

/// How long the ratio must stay frozen before the person is considered gone
pub const STUCK_AFTER_MS: i64 = 2000;

/// Consecutive moving samples needed to leave the stuck state
pub const RETURN_STREAK: u32 = 3;

/// How long the "returned" notice stays visible
pub const RETURNED_NOTICE_MS: i64 = 3000;

/// Presence requires at least this many keypoints in the latest detection
pub const MIN_KEYPOINTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Active,
    StuckPending { since_ms: i64 },
    Stuck,
    ReturnPending { streak: u32 },
}

/// Outcome of one sampling tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub present: bool,
    /// True only on the tick the person came back
    pub returned: bool,
}

#[derive(Debug, Clone)]
pub struct PresenceDetector {
    state: PresenceState,
    last_ratio: Option<f64>,
    returned_at_ms: Option<i64>,
}

impl Default for PresenceDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceDetector {
    pub fn new() -> Self {
        Self {
            state: PresenceState::Active,
            last_ratio: None,
            returned_at_ms: None,
        }
    }

    /// Advance the state machine by one sample.
    ///
    /// `ratio` is `None` when the tick produced no valid ratio; that counts as
    /// no movement.
    pub fn update(&mut self, now_ms: i64, ratio: Option<f64>, keypoint_count: usize) -> PresenceUpdate {
        let moved = match (ratio, self.last_ratio) {
            (Some(current), Some(previous)) => (current - previous).abs() >= RATIO_EPSILON,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if ratio.is_some() {
            self.last_ratio = ratio;
        }

        let mut returned = false;
        self.state = match (self.state, moved) {
            (PresenceState::Active, true) => PresenceState::Active,
            (PresenceState::Active, false) => PresenceState::StuckPending { since_ms: now_ms },
            (PresenceState::StuckPending { .. }, true) => PresenceState::Active,
            (PresenceState::StuckPending { since_ms }, false) => {
                if now_ms - since_ms > STUCK_AFTER_MS {
                    PresenceState::Stuck
                } else {
                    PresenceState::StuckPending { since_ms }
                }
            }
            (PresenceState::Stuck, true) => PresenceState::ReturnPending { streak: 1 },
            (PresenceState::Stuck, false) => PresenceState::Stuck,
            (PresenceState::ReturnPending { streak }, true) => {
                let streak = streak + 1;
                if streak >= RETURN_STREAK {
                    returned = true;
                    self.returned_at_ms = Some(now_ms);
                    PresenceState::Active
                } else {
                    PresenceState::ReturnPending { streak }
                }
            }
            (PresenceState::ReturnPending { .. }, false) => PresenceState::Stuck,
        };

        PresenceUpdate {
            present: self.is_present(keypoint_count),
            returned,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn is_stuck(&self) -> bool {
        matches!(self.state, PresenceState::Stuck | PresenceState::ReturnPending { .. })
    }

    pub fn is_present(&self, keypoint_count: usize) -> bool {
        !self.is_stuck() && self.last_ratio.is_some_and(|r| r > 0.0) && keypoint_count >= MIN_KEYPOINTS
    }

    /// Whether the one-shot "returned" notice is still live at `now_ms`
    pub fn returned_notice_active(&self, now_ms: i64) -> bool {
        self.returned_at_ms
            .is_some_and(|at| now_ms - at <= RETURNED_NOTICE_MS)
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
