// Score smoothing - trend-aware rate limiting of the raw posture score

use std::collections::VecDeque;

/// Raw scores kept for trend computation
pub const HISTORY_CAPACITY: usize = 8;

/// The smoothed value only moves on every third sampling tick
pub const UPDATE_EVERY_N_TICKS: u64 = 3;

const TREND_MIN_HISTORY: usize = 6;
const TREND_WINDOW: usize = 3;

const SHORT_HISTORY_WEIGHT: f64 = 0.4;
const STEADY_WEIGHT: f64 = 0.3;

/// Smoother state for one tracking session
#[derive(Debug, Clone, Default)]
pub struct ScoreSmoother {
    history: VecDeque<u8>,
    smoothed: Option<u8>,
}

impl ScoreSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the raw score observed on `tick`.
    ///
    /// Ticks that are not a multiple of three leave the state untouched and
    /// return the previous smoothed value. The first accepted score seeds the
    /// output directly. Returns `None` until a score has been accepted.
    pub fn update(&mut self, raw: u8, tick: u64) -> Option<u8> {
        if tick % UPDATE_EVERY_N_TICKS != 0 {
            return self.smoothed;
        }

        let raw = raw.min(100);
        self.history.push_back(raw);
        while self.history.len() > HISTORY_CAPACITY {
            self.history.pop_front();
        }

        let previous = match self.smoothed {
            Some(previous) => previous as i32,
            None => {
                self.smoothed = Some(raw);
                return self.smoothed;
            }
        };

        let next = if self.history.len() >= TREND_MIN_HISTORY {
            let step = match self.trend() {
                t if t > 8.0 => 4,
                t if t > 4.0 => 3,
                t if t > 2.0 => 2,
                t if t < -8.0 => -4,
                t if t < -4.0 => -3,
                t if t < -2.0 => -2,
                _ => blend(raw as i32, previous, STEADY_WEIGHT) - previous,
            };
            previous + step
        } else {
            blend(raw as i32, previous, SHORT_HISTORY_WEIGHT)
        };

        self.smoothed = Some(next.clamp(0, 100) as u8);
        self.smoothed
    }

    pub fn current(&self) -> Option<u8> {
        self.smoothed
    }

    pub fn history(&self) -> impl Iterator<Item = u8> + '_ {
        self.history.iter().copied()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.smoothed = None;
    }

    /// avg(last 3) - avg(previous 3)
    fn trend(&self) -> f64 {
        let len = self.history.len();
        let window_avg = |start: usize| {
            self.history.range(start..start + TREND_WINDOW).map(|&s| s as f64).sum::<f64>() / TREND_WINDOW as f64
        };
        window_avg(len - TREND_WINDOW) - window_avg(len - 2 * TREND_WINDOW)
    }
}

/// Weighted blend of `raw` into `previous`, rounded away from `previous`
/// so that a constant input is eventually reached exactly.
fn blend(raw: i32, previous: i32, weight: f64) -> i32 {
    let delta = (raw - previous) as f64 * weight;
    let step = if delta > 0.0 { delta.ceil() } else { delta.floor() };
    previous + step as i32
}
